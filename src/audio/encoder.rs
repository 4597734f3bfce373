//! # PCM16 Encoding
//!
//! Converts captured float32 frames into the base64 PCM16 payload the remote
//! endpoint expects, and back again for inbound audio.
//!
//! ## Wire Format:
//! - **Sample type**: signed 16-bit integers, little-endian
//! - **Scaling**: `round(x * 32768)` clamped to `[-32768, 32767]`
//! - **Transport**: standard-alphabet base64 string
//! - **Descriptor**: `audio/pcm;rate=16000` for outbound frames

use crate::error::{VoiceError, VoiceResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// MIME descriptor attached to every outbound frame.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Full-scale value used for both directions of the conversion.
const PCM16_SCALE: f32 = 32768.0;

/// One encoded microphone frame, ready to send.
///
/// Consumed exactly once by the outbound send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFrame {
    /// Base64 of little-endian PCM16 bytes
    pub data: String,

    pub mime_type: String,

    #[serde(skip)]
    pub sample_count: usize,
}

impl AudioFrame {
    /// Payload size in bytes before base64 encoding.
    pub fn pcm_bytes(&self) -> usize {
        self.sample_count * 2
    }
}

/// Quantize one float sample to PCM16.
///
/// Values outside [-1, 1] are clamped instead of wrapping around.
pub fn float_to_pcm16(sample: f32) -> i16 {
    let scaled = (sample * PCM16_SCALE).round();
    scaled.clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Inverse of [`float_to_pcm16`].
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 / PCM16_SCALE
}

/// Frame encoder with a reusable scratch buffer.
///
/// The capture callback runs once per frame, so the byte buffer is kept
/// between calls and only the output string is allocated.
#[derive(Debug, Default)]
pub struct Encoder {
    scratch: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode a float32 frame into an [`AudioFrame`].
    pub fn encode_frame(&mut self, samples: &[f32]) -> AudioFrame {
        self.scratch.clear();
        self.scratch.reserve(samples.len() * 2);

        for &sample in samples {
            // Writing into a Vec cannot fail
            let _ = self.scratch.write_i16::<LittleEndian>(float_to_pcm16(sample));
        }

        AudioFrame {
            data: STANDARD.encode(&self.scratch),
            mime_type: INPUT_MIME_TYPE.to_string(),
            sample_count: samples.len(),
        }
    }
}

/// Stateless convenience wrapper around [`Encoder::encode_frame`].
pub fn encode_frame(samples: &[f32]) -> AudioFrame {
    Encoder::new().encode_frame(samples)
}

/// Decode a base64 PCM16 payload into normalized float samples.
///
/// ## Errors:
/// - invalid base64
/// - odd byte count (a truncated sample)
pub fn decode_pcm16(payload: &str) -> VoiceResult<Vec<f32>> {
    let bytes = STANDARD.decode(payload.trim())?;

    if bytes.len() % 2 != 0 {
        return Err(VoiceError::Decode(format!(
            "PCM16 payload has odd byte count {}",
            bytes.len()
        )));
    }

    let mut cursor = Cursor::new(bytes.as_slice());
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(pcm16_to_float(sample));
    }

    Ok(samples)
}

/// Mean absolute amplitude of a frame, clamped to [0, 1].
///
/// An empty frame has level 0.
pub fn audio_level(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s.abs()).sum();
    (sum / samples.len() as f32).clamp(0.0, 1.0)
}
