//! Gemini Live websocket connector.
//!
//! Opens the socket, performs the setup handshake on the unsplit stream,
//! then splits it and spawns one task per direction. The tasks talk to the
//! session exclusively through the [`Channel`] queues.

use crate::config::VoiceConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::realtime::connection::{Channel, ChannelEvent, Connector, OutboundMessage};
use crate::realtime::protocol::{
    audio_message_json, audio_stream_end_json, build_setup_message, parse_binary_message,
    parse_server_message, ServerEvent, SessionSetup,
};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct GeminiLiveConnector {
    url: String,
    setup_timeout: Duration,
    outbound_capacity: usize,
    inbound_capacity: usize,
}

impl GeminiLiveConnector {
    pub fn new(config: &VoiceConfig) -> Self {
        Self {
            url: config.connect_url(),
            setup_timeout: Duration::from_secs(config.endpoint.setup_timeout_secs),
            outbound_capacity: config.session.outbound_queue_capacity,
            inbound_capacity: config.session.inbound_queue_capacity,
        }
    }

    /// Send the setup message and wait for `setupComplete`.
    async fn handshake(&self, ws: &mut WsStream, setup: &SessionSetup) -> VoiceResult<()> {
        let setup_json = serde_json::to_string(&build_setup_message(setup))
            .map_err(|e| VoiceError::ConnectionFailed(format!("Failed to encode setup: {}", e)))?;

        ws.send(WsMessage::Text(setup_json))
            .await
            .map_err(|e| VoiceError::ConnectionFailed(format!("Failed to send setup message: {}", e)))?;

        let wait = async {
            while let Some(message) = ws.next().await {
                let events = match message {
                    Ok(WsMessage::Text(text)) => parse_server_message(&text),
                    Ok(WsMessage::Binary(data)) => parse_binary_message(&data),
                    Ok(WsMessage::Close(frame)) => {
                        let reason = frame.map(|f| f.reason.to_string()).unwrap_or_default();
                        return Err(VoiceError::ConnectionFailed(format!(
                            "Connection closed before setupComplete: {}",
                            reason
                        )));
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        return Err(VoiceError::ConnectionFailed(format!(
                            "WebSocket error before setupComplete: {}",
                            e
                        )))
                    }
                };

                for event in events {
                    match event {
                        ServerEvent::SetupComplete => return Ok(()),
                        ServerEvent::Error { message } => return Err(VoiceError::ConnectionFailed(message)),
                        other => debug!(event = ?other, "Ignoring event during setup"),
                    }
                }
            }
            Err(VoiceError::ConnectionFailed("Stream ended before setupComplete".to_string()))
        };

        match tokio::time::timeout(self.setup_timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(VoiceError::ConnectionFailed(format!(
                "setupComplete timeout ({}s)",
                self.setup_timeout.as_secs()
            ))),
        }
    }
}

#[async_trait]
impl Connector for GeminiLiveConnector {
    async fn connect(&self, setup: SessionSetup) -> VoiceResult<Channel> {
        info!(model = %setup.model, "Connecting to Gemini Live");

        let (mut ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(|e| VoiceError::ConnectionFailed(format!("Failed to connect: {}", e)))?;

        self.handshake(&mut ws, &setup).await?;
        info!("Gemini Live setup complete, ready to stream");

        let (sink, stream) = ws.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(self.inbound_capacity);
        let (peer_closed_tx, peer_closed_rx) = oneshot::channel();

        tokio::spawn(outbound_loop(outbound_rx, sink, peer_closed_rx));
        tokio::spawn(inbound_loop(stream, inbound_tx, peer_closed_tx));

        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Drain the outbound queue onto the socket until asked to close, the
/// session drops its sender, or the inbound side stops reading.
///
/// Closing the sink flushes the close reply tungstenite queues when the
/// peer closes first.
async fn outbound_loop(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut sink: SplitSink<WsStream, WsMessage>,
    mut peer_closed: oneshot::Receiver<()>,
) {
    let mut frames: u64 = 0;
    let mut bytes: u64 = 0;

    loop {
        let message = tokio::select! {
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
            _ = &mut peer_closed => {
                debug!("Inbound side finished, completing close handshake");
                break;
            }
        };

        let json = match message {
            OutboundMessage::Audio(frame) => {
                frames += 1;
                bytes += frame.pcm_bytes() as u64;
                if frames == 1 || frames % 250 == 0 {
                    debug!(frames, bytes, "Streaming microphone audio");
                }
                audio_message_json(&frame)
            }
            OutboundMessage::AudioStreamEnd => {
                info!("Sending audioStreamEnd");
                audio_stream_end_json()
            }
            OutboundMessage::Close => break,
        };

        match json {
            Ok(json) => {
                if let Err(e) = sink.send(WsMessage::Text(json)).await {
                    warn!(error = %e, "WebSocket send failed, closing outbound loop");
                    break;
                }
            }
            Err(e) => error!(error = %e, "Failed to serialize outbound message"),
        }
    }

    if let Err(e) = sink.close().await {
        debug!(error = %e, "WebSocket close after shutdown");
    }
    debug!(frames, bytes, "Outbound loop terminated");
}

/// Forward parsed server events to the session. Always ends with a
/// `Closed` event unless the session already went away, and tells the
/// outbound loop to shut down once reading stops.
async fn inbound_loop(
    mut stream: SplitStream<WsStream>,
    tx: mpsc::Sender<ChannelEvent>,
    peer_closed: oneshot::Sender<()>,
) {
    let mut audio_chunks: u64 = 0;
    let mut close_reason = None;

    while let Some(message) = stream.next().await {
        let events = match message {
            Ok(WsMessage::Text(text)) => parse_server_message(&text),
            Ok(WsMessage::Binary(data)) => {
                let events = parse_binary_message(&data);
                if events.is_empty() && data.first() != Some(&b'{') {
                    warn!(len = data.len(), "Unexpected non-JSON binary frame, skipping");
                }
                events
            }
            Ok(WsMessage::Close(frame)) => {
                info!(close_frame = ?frame, "Gemini Live connection closed");
                close_reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                error!(error = %e, "Gemini Live WebSocket error");
                let _ = tx.send(ChannelEvent::Error(format!("WebSocket error: {}", e))).await;
                close_reason = Some(e.to_string());
                break;
            }
        };

        for event in events {
            if matches!(event, ServerEvent::AudioChunk(_)) {
                audio_chunks += 1;
            }
            if tx.send(ChannelEvent::Server(event)).await.is_err() {
                debug!("Event receiver dropped, closing inbound loop");
                return;
            }
        }
    }

    let _ = peer_closed.send(());
    let _ = tx.send(ChannelEvent::Closed { reason: close_reason }).await;
    debug!(audio_chunks, "Inbound loop terminated");
}
