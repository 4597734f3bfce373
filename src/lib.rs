//! # companion-voice
//!
//! Client-side realtime voice sessions for an AI companion: microphone audio
//! goes out to a live conversational endpoint as PCM16 frames, and the
//! companion's spoken replies come back and are played gaplessly, with
//! barge-in interruption.
//!
//! ## Architecture:
//! - **config**: layered configuration (defaults, `companion.toml`, environment)
//! - **error**: the `VoiceError` taxonomy
//! - **audio**: capture, encoding, playback scheduling, device backends
//! - **realtime**: the bidirectional channel to the remote endpoint
//! - **session**: the `VoiceSession` orchestrator the UI drives
//!
//! ```rust,no_run
//! use companion_voice::VoiceConfig;
//!
//! let config = VoiceConfig::load().expect("config");
//! config.validate().expect("valid config");
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod realtime;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use config::VoiceConfig;
pub use error::{VoiceError, VoiceResult};
pub use realtime::{Connector, GeminiLiveConnector};
pub use session::{SessionState, SessionStatsSummary, VoiceEvent, VoiceSession};
