//! # Error Handling
//!
//! Error taxonomy for the voice core. Every failure that can happen while a
//! voice chat is running maps onto one of these variants, and the orchestrator
//! turns them into error events instead of returning them to the UI layer.
//!
//! ## Error Categories:
//! - **Microphone**: `PermissionDenied`, `DeviceUnavailable` (fatal for the attempt)
//! - **Connection**: `ConnectionFailed` (fatal), `RemoteError`, `RemoteClose`
//! - **Data**: `Decode` (one bad inbound chunk, never fatal)
//! - **Usage**: `NotConnected` (sending on a channel that is not open)
//! - **Setup**: `Config`
//!
//! ## Key Rust Concepts for Error Handling:
//! - **Result<T, E>**: every fallible operation returns `VoiceResult<T>`
//! - **From trait**: lets `?` turn library errors into `VoiceError`
//! - **Display trait**: the message that ends up in the UI error event

use std::fmt;  // For implementing Display trait

/// Errors produced by the voice session components.
///
/// ## Rust Concepts:
/// - **enum**: one variant per failure kind, most carrying a message
/// - **Clone + PartialEq**: errors travel inside events and are compared in tests
/// - **unit variant**: `NotConnected` needs no extra data
///
/// ## Usage Example:
/// ```rust
/// use companion_voice::VoiceError;
/// let err = VoiceError::PermissionDenied("microphone access was denied".to_string());
/// assert_eq!(err.code(), "permission_denied");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceError {
    /// The platform refused microphone access
    PermissionDenied(String),

    /// No usable audio device, or the device rejected the stream configuration
    DeviceUnavailable(String),

    /// The realtime channel could not be opened
    ConnectionFailed(String),

    /// Channel-level error reported while the session was open
    RemoteError(String),

    /// The remote endpoint closed the channel
    RemoteClose(String),

    /// An inbound audio chunk could not be decoded
    Decode(String),

    /// Tried to send on a channel that is not open
    NotConnected,

    /// Invalid or unreadable configuration
    Config(String),
}

impl VoiceError {
    /// Machine-readable error code, used in error events and log fields.
    pub fn code(&self) -> &'static str {
        match self {
            VoiceError::PermissionDenied(_) => "permission_denied",
            VoiceError::DeviceUnavailable(_) => "device_unavailable",
            VoiceError::ConnectionFailed(_) => "connection_failed",
            VoiceError::RemoteError(_) => "remote_error",
            VoiceError::RemoteClose(_) => "remote_close",
            VoiceError::Decode(_) => "decode_error",
            VoiceError::NotConnected => "not_connected",
            VoiceError::Config(_) => "config_error",
        }
    }

    /// Whether the error ends the current voice chat attempt.
    ///
    /// ## Fatal vs recoverable:
    /// - Microphone and connection failures end the attempt
    /// - A remote error leaves the channel open but unreliable
    /// - Decode failures drop one chunk and the session continues
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VoiceError::PermissionDenied(_)
                | VoiceError::DeviceUnavailable(_)
                | VoiceError::ConnectionFailed(_)
                | VoiceError::RemoteClose(_)
                | VoiceError::Config(_)
        )
    }
}

impl fmt::Display for VoiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoiceError::PermissionDenied(msg) => write!(f, "Microphone permission denied: {}", msg),
            VoiceError::DeviceUnavailable(msg) => write!(f, "Audio device unavailable: {}", msg),
            VoiceError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            VoiceError::RemoteError(msg) => write!(f, "Remote error: {}", msg),
            VoiceError::RemoteClose(reason) => write!(f, "Connection closed: {}", reason),
            VoiceError::Decode(msg) => write!(f, "Audio decode error: {}", msg),
            VoiceError::NotConnected => write!(f, "Realtime channel is not open"),
            VoiceError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for VoiceError {}

/// Configuration loading failures (bad `companion.toml`, unparsable env values).
impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

/// JSON failures only happen while building or reading wire messages.
impl From<serde_json::Error> for VoiceError {
    fn from(err: serde_json::Error) -> Self {
        VoiceError::Decode(format!("JSON error: {}", err))
    }
}

impl From<base64::DecodeError> for VoiceError {
    fn from(err: base64::DecodeError) -> Self {
        VoiceError::Decode(format!("invalid base64 payload: {}", err))
    }
}

/// Shorthand for results carrying a [`VoiceError`].
pub type VoiceResult<T> = Result<T, VoiceError>;
