//! Transport seam between the realtime session and whatever carries the
//! bytes. A [`Connector`] opens a [`Channel`]: two queues, one per
//! direction, serviced by background tasks.

use crate::audio::encoder::AudioFrame;
use crate::error::{VoiceError, VoiceResult};
use crate::realtime::protocol::{ServerEvent, SessionSetup};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

/// Messages queued for the outbound task.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Audio(AudioFrame),
    /// Microphone stopped; lets the model flush buffered input
    AudioStreamEnd,
    Close,
}

/// What the inbound task reports.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Server(ServerEvent),
    /// Transport-level failure while open
    Error(String),
    /// The channel is gone. `reason` comes from the close frame when present.
    Closed { reason: Option<String> },
}

/// An open bidirectional channel.
#[derive(Debug)]
pub struct Channel {
    pub outbound: mpsc::Sender<OutboundMessage>,
    pub inbound: mpsc::Receiver<ChannelEvent>,
}

/// Opens channels to the remote endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a channel and complete the setup handshake.
    ///
    /// Fails with `VoiceError::ConnectionFailed`.
    async fn connect(&self, setup: SessionSetup) -> VoiceResult<Channel>;
}

/// Outcome of a non-blocking frame send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDelivery {
    Queued,
    /// Outbound queue full; the frame was discarded
    Dropped,
}

/// Cloneable, non-blocking handle for pushing audio frames from the
/// capture thread.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<OutboundMessage>,
}

impl FrameSender {
    pub fn new(tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self { tx }
    }

    /// Queue a frame without waiting.
    ///
    /// ## Returns:
    /// - `Ok(FrameDelivery::Queued)` on success
    /// - `Ok(FrameDelivery::Dropped)` when the queue is full
    /// - `Err(VoiceError::NotConnected)` when the outbound task is gone
    pub fn send(&self, frame: AudioFrame) -> VoiceResult<FrameDelivery> {
        match self.tx.try_send(OutboundMessage::Audio(frame)) {
            Ok(()) => Ok(FrameDelivery::Queued),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound audio queue full, dropping frame");
                Ok(FrameDelivery::Dropped)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(VoiceError::NotConnected),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
