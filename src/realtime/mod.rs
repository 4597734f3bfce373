//! # Realtime Channel
//!
//! Everything between encoded audio frames and the remote conversational
//! endpoint.
//!
//! ## Key Components:
//! - **protocol**: setup/audio/stream-end messages and the server message parser
//! - **connection**: the `Connector` seam and the queue pair a channel consists of
//! - **session**: `RealtimeSession`, the one-shot owner of a channel
//! - **gemini**: websocket connector for the Gemini Live endpoint

pub mod connection;
pub mod gemini;
pub mod protocol;
pub mod session;

pub use connection::{Channel, ChannelEvent, Connector, FrameDelivery, FrameSender, OutboundMessage};
pub use gemini::GeminiLiveConnector;
pub use protocol::{ServerEvent, SessionSetup};
pub use session::{ChannelState, RealtimeSession};
