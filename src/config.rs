//! # Configuration Management
//!
//! Loads voice session settings from multiple sources:
//! - Built-in defaults (the values the companion endpoint expects)
//! - An optional `companion.toml` file
//! - Environment variables with the `COMPANION_` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `GEMINI_API_KEY` (special case, matches the provider's own convention)
//! 2. Environment variables (`COMPANION_AUDIO__FRAME_SIZE=640`, ...)
//! 3. Configuration file (`companion.toml`)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys use a double underscore because field names already contain
//! single underscores.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};  // For reading companion.toml and env values
use std::env;                         // For the GEMINI_API_KEY override

/// Sample rate the remote endpoint expects for microphone audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of the audio the remote endpoint sends back.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Complete configuration for one voice session.
///
/// ## Rust Concepts:
/// - **#[derive(Serialize, Deserialize)]**: the `config` crate builds this
///   struct from the merged sources, and the defaults are fed back in
///   through `Serialize`
/// - **nested structs**: each table in `companion.toml` maps to one field
///
/// ## Sections:
/// - `endpoint`: where to connect and what to ask the model for
/// - `audio`: sample rates, frame size, gains and devices
/// - `session`: queue sizes and playback housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub endpoint: EndpointConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
}

/// Remote conversational endpoint settings.
///
/// ## Fields:
/// - `url`: websocket URL of the bidirectional generate-content service
/// - `model`: model name sent in the setup message (without the `models/` prefix)
/// - `api_key`: appended as `?key=` when connecting; usually comes from `GEMINI_API_KEY`
/// - `system_prompt`: persona instruction for the companion
/// - `voice_name`: optional prebuilt voice for synthesized speech
/// - `setup_timeout_secs`: how long to wait for `setupComplete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    pub model: String,
    pub api_key: String,
    pub system_prompt: String,
    pub voice_name: Option<String>,
    pub setup_timeout_secs: u64,
}

/// Capture and playback parameters.
///
/// The sample rates must match the endpoint exactly (16 kHz in, 24 kHz out);
/// they are configurable so tests and alternative endpoints can change them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    /// Channel count of inbound audio (1 = mono)
    pub output_channels: u16,
    /// Samples per captured frame (320 = 20ms at 16kHz)
    pub frame_size: usize,
    pub input_gain: f32,
    pub output_gain: f32,
    /// Upper bound on waiting for microphone access
    pub microphone_timeout_ms: u64,
    /// Device name, or "default"
    pub input_device: String,
    pub output_device: String,
}

/// Orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Outbound frames buffered before new frames are dropped
    pub outbound_queue_capacity: usize,
    /// Inbound events buffered between the network task and the owner task
    pub inbound_queue_capacity: usize,
    /// How often finished playback handles are pruned while idle
    pub playback_prune_interval_ms: u64,
    /// Cancel scheduled playback on `stop()` as well as on `reset()`/interruption
    pub stop_cancels_playback: bool,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig {
                url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
                model: "gemini-2.0-flash-live-001".to_string(),
                api_key: String::new(),
                system_prompt: "You are a warm, supportive AI companion. Keep spoken replies short and natural.".to_string(),
                voice_name: None,
                setup_timeout_secs: 15,
            },
            audio: AudioConfig {
                input_sample_rate: INPUT_SAMPLE_RATE,
                output_sample_rate: OUTPUT_SAMPLE_RATE,
                output_channels: 1,
                frame_size: 320,
                input_gain: 1.0,
                output_gain: 1.0,
                microphone_timeout_ms: 10_000,
                input_device: "default".to_string(),
                output_device: "default".to_string(),
            },
            session: SessionConfig {
                outbound_queue_capacity: 256,
                inbound_queue_capacity: 256,
                playback_prune_interval_ms: 100,
                stop_cancels_playback: false,
            },
        }
    }
}

impl VoiceConfig {
    /// Load configuration from defaults, `companion.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `COMPANION_ENDPOINT__MODEL=gemini-2.0-flash-live-001`
    /// - `COMPANION_AUDIO__OUTPUT_GAIN=0.8`
    /// - `COMPANION_SESSION__STOP_CANCELS_PLAYBACK=true`
    /// - `GEMINI_API_KEY=...`
    pub fn load() -> VoiceResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&VoiceConfig::default())?)
            .add_source(config::File::with_name("companion").required(false))
            .add_source(
                config::Environment::with_prefix("COMPANION")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(key) = env::var("GEMINI_API_KEY") {
            settings = settings.set_override("endpoint.api_key", key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Endpoint URL is a websocket URL
    /// - Sample rates and frame size are non-zero
    /// - Output is mono or stereo
    /// - Gains are within [0, 4]
    /// - Queues can hold at least one item
    pub fn validate(&self) -> VoiceResult<()> {
        let url = self.endpoint.url.trim();
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(VoiceError::Config(format!(
                "endpoint.url must be a ws:// or wss:// URL, got '{}'",
                self.endpoint.url
            )));
        }

        if self.audio.input_sample_rate == 0 || self.audio.output_sample_rate == 0 {
            return Err(VoiceError::Config("sample rates must be greater than 0".to_string()));
        }

        if !(1..=2).contains(&self.audio.output_channels) {
            return Err(VoiceError::Config(format!(
                "audio.output_channels must be 1 or 2, got {}",
                self.audio.output_channels
            )));
        }

        if self.audio.frame_size == 0 {
            return Err(VoiceError::Config("audio.frame_size must be greater than 0".to_string()));
        }

        for (name, gain) in [("input_gain", self.audio.input_gain), ("output_gain", self.audio.output_gain)] {
            if !(0.0..=4.0).contains(&gain) {
                return Err(VoiceError::Config(format!("audio.{} must be within [0, 4], got {}", name, gain)));
            }
        }

        if self.session.outbound_queue_capacity == 0 || self.session.inbound_queue_capacity == 0 {
            return Err(VoiceError::Config("queue capacities must be greater than 0".to_string()));
        }

        if self.session.playback_prune_interval_ms == 0 {
            return Err(VoiceError::Config(
                "session.playback_prune_interval_ms must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Connection URL with the API key attached, if one is configured.
    pub fn connect_url(&self) -> String {
        if self.endpoint.api_key.is_empty() {
            self.endpoint.url.clone()
        } else {
            format!("{}?key={}", self.endpoint.url, self.endpoint.api_key)
        }
    }
}
