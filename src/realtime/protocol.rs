//! Wire messages for the bidirectional generate-content websocket.
//!
//! ## Message Flow
//!
//! 1. client → `{"setup": {...}}` (model, audio modality, persona, voice)
//! 2. server → `{"setupComplete": {}}`
//! 3. client → `{"realtimeInput": {"mediaChunks": [{"mimeType", "data"}]}}` per frame
//! 4. server → `{"serverContent": {"modelTurn": {"parts": [{"inlineData": {...}}]}}}`,
//!    `{"serverContent": {"interrupted": true}}`, `{"serverContent": {"turnComplete": true}}`
//! 5. client → `{"realtimeInput": {"audioStreamEnd": true}}` when the mic stops
//!
//! The server may send any of these JSON documents in binary frames.

use crate::audio::encoder::AudioFrame;
use crate::audio::playback::InboundAudioChunk;
use crate::error::VoiceResult;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What the client asks for when the channel opens.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSetup {
    /// Model name without the `models/` prefix
    pub model: String,
    pub system_prompt: String,
    pub voice_name: Option<String>,
}

// ── Outbound ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: SetupPayload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupPayload {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceSelection,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSelection {
    pub prebuilt_voice_config: PrebuiltVoice,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoice {
    pub voice_name: String,
}

#[derive(Debug, Serialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInputMessage<'a> {
    realtime_input: RealtimeInput<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RealtimeInput<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    media_chunks: Option<[&'a AudioFrame; 1]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio_stream_end: Option<bool>,
}

/// Build the first message sent on a new channel.
pub fn build_setup_message(setup: &SessionSetup) -> SetupMessage {
    let model = if setup.model.starts_with("models/") {
        setup.model.clone()
    } else {
        format!("models/{}", setup.model)
    };

    let system_instruction = if setup.system_prompt.trim().is_empty() {
        None
    } else {
        Some(Content {
            parts: vec![TextPart {
                text: setup.system_prompt.clone(),
            }],
        })
    };

    SetupMessage {
        setup: SetupPayload {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: setup.voice_name.as_ref().map(|name| SpeechConfig {
                    voice_config: VoiceSelection {
                        prebuilt_voice_config: PrebuiltVoice {
                            voice_name: name.clone(),
                        },
                    },
                }),
            },
            system_instruction,
        },
    }
}

/// `{"realtimeInput":{"mediaChunks":[{"data":..,"mimeType":..}]}}`
pub fn audio_message_json(frame: &AudioFrame) -> VoiceResult<String> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: Some([frame]),
            audio_stream_end: None,
        },
    };
    Ok(serde_json::to_string(&message)?)
}

/// `{"realtimeInput":{"audioStreamEnd":true}}`
pub fn audio_stream_end_json() -> VoiceResult<String> {
    let message = RealtimeInputMessage {
        realtime_input: RealtimeInput {
            media_chunks: None,
            audio_stream_end: Some(true),
        },
    };
    Ok(serde_json::to_string(&message)?)
}

// ── Inbound ────────────────────────────────────────────────────────

/// Events the remote endpoint can deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    SetupComplete,
    AudioChunk(InboundAudioChunk),
    /// The user started speaking over the model; drop queued playback
    Interrupted,
    TurnComplete,
    Error { message: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    data: String,
    #[serde(default)]
    mime_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerError {
    message: Option<String>,
}

/// Parse one server document into events.
///
/// A single message can carry several events; they come out in the order
/// interruption, audio parts, turn completion. Malformed or unrecognised
/// messages yield no events.
pub fn parse_server_message(text: &str) -> Vec<ServerEvent> {
    let message: ServerMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, len = text.len(), "Ignoring malformed server message");
            return Vec::new();
        }
    };

    let mut events = Vec::new();

    if message.setup_complete.is_some() {
        events.push(ServerEvent::SetupComplete);
    }

    if let Some(content) = message.server_content {
        if content.interrupted {
            events.push(ServerEvent::Interrupted);
        }

        let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
        for part in parts {
            let Some(inline) = part.inline_data else { continue };
            let is_audio = inline
                .mime_type
                .as_deref()
                .map_or(true, |mime| mime.starts_with("audio/"));
            if is_audio && !inline.data.is_empty() {
                events.push(ServerEvent::AudioChunk(InboundAudioChunk::new(inline.data)));
            }
        }

        if content.turn_complete {
            events.push(ServerEvent::TurnComplete);
        }
    }

    if let Some(error) = message.error {
        events.push(ServerEvent::Error {
            message: error.message.unwrap_or_else(|| "Unknown server error".to_string()),
        });
    }

    events
}

/// Parse a binary frame that may hold JSON. Non-JSON payloads yield nothing.
pub fn parse_binary_message(data: &[u8]) -> Vec<ServerEvent> {
    if data.first() != Some(&b'{') {
        return Vec::new();
    }
    match std::str::from_utf8(data) {
        Ok(text) => parse_server_message(text),
        Err(_) => Vec::new(),
    }
}
