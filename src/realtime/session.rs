//! # Realtime Session
//!
//! Owns one bidirectional channel to the remote endpoint. A session is
//! one-shot: it connects at most once, and after it closes a new session
//! must be created. There is no reconnect or resume.
//!
//! ## State Flow:
//! ```text
//! Idle ──connect──▶ Connecting ──ok──▶ Open ──close / remote close──▶ Closed
//!                        └──err──▶ Failed
//! ```

use crate::audio::encoder::AudioFrame;
use crate::error::{VoiceError, VoiceResult};
use crate::realtime::connection::{
    Channel, ChannelEvent, Connector, FrameDelivery, FrameSender, OutboundMessage,
};
use crate::realtime::protocol::SessionSetup;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

/// Lifecycle of the channel held by a [`RealtimeSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closed,
    Failed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Idle => "idle",
            ChannelState::Connecting => "connecting",
            ChannelState::Open => "open",
            ChannelState::Closed => "closed",
            ChannelState::Failed => "failed",
        }
    }
}

pub struct RealtimeSession {
    session_id: String,
    state: ChannelState,
    outbound: Option<mpsc::Sender<OutboundMessage>>,
    inbound: Option<mpsc::Receiver<ChannelEvent>>,
}

impl RealtimeSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            state: ChannelState::Idle,
            outbound: None,
            inbound: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ChannelState::Open
    }

    /// Open the channel and send the setup handshake.
    ///
    /// Only valid once, from `Idle`. Any failure, including a second call,
    /// is reported as `VoiceError::ConnectionFailed`.
    pub async fn connect(&mut self, connector: &dyn Connector, setup: SessionSetup) -> VoiceResult<()> {
        if self.state != ChannelState::Idle {
            return Err(VoiceError::ConnectionFailed(format!(
                "realtime session already {}",
                self.state.as_str()
            )));
        }

        self.state = ChannelState::Connecting;
        info!(session_id = %self.session_id, model = %setup.model, "Opening realtime channel");

        match connector.connect(setup).await {
            Ok(Channel { outbound, inbound }) => {
                self.outbound = Some(outbound);
                self.inbound = Some(inbound);
                self.state = ChannelState::Open;
                info!(session_id = %self.session_id, "Realtime channel open");
                Ok(())
            }
            Err(e) => {
                self.state = ChannelState::Failed;
                warn!(session_id = %self.session_id, error = %e, "Realtime channel failed to open");
                Err(match e {
                    VoiceError::ConnectionFailed(msg) => VoiceError::ConnectionFailed(msg),
                    other => VoiceError::ConnectionFailed(other.to_string()),
                })
            }
        }
    }

    /// Queue one frame for sending. Never blocks.
    ///
    /// Returns `VoiceError::NotConnected` unless the channel is open.
    pub fn send_audio_frame(&self, frame: AudioFrame) -> VoiceResult<FrameDelivery> {
        match (&self.outbound, self.state) {
            (Some(tx), ChannelState::Open) => FrameSender::new(tx.clone()).send(frame),
            _ => {
                trace!(session_id = %self.session_id, "Dropping frame, channel not open");
                Err(VoiceError::NotConnected)
            }
        }
    }

    /// Handle for the capture thread. `None` unless the channel is open.
    pub fn frame_sender(&self) -> Option<FrameSender> {
        match (&self.outbound, self.state) {
            (Some(tx), ChannelState::Open) => Some(FrameSender::new(tx.clone())),
            _ => None,
        }
    }

    /// Wait for the next inbound event.
    ///
    /// Returns `None` when there is no channel to read from. If the inbound
    /// task ends without reporting, a single `Closed` event is synthesized.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        let inbound = self.inbound.as_mut()?;

        let event = match inbound.recv().await {
            Some(event) => event,
            None => ChannelEvent::Closed { reason: None },
        };

        if let ChannelEvent::Closed { reason } = &event {
            debug!(session_id = %self.session_id, reason = ?reason, "Realtime channel closed by remote");
            self.state = ChannelState::Closed;
            self.outbound = None;
            self.inbound = None;
        }

        Some(event)
    }

    /// Close the channel. Safe from any state and safe to repeat.
    ///
    /// An open channel gets `audioStreamEnd` followed by a close request.
    pub fn close(&mut self) {
        if let Some(tx) = self.outbound.take() {
            if self.state == ChannelState::Open {
                let _ = tx.try_send(OutboundMessage::AudioStreamEnd);
                let _ = tx.try_send(OutboundMessage::Close);
                info!(session_id = %self.session_id, "Realtime channel closing");
            }
        }
        self.inbound = None;

        if matches!(self.state, ChannelState::Idle | ChannelState::Connecting | ChannelState::Open) {
            self.state = ChannelState::Closed;
        }
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.close();
    }
}
