//! # Audio Module
//!
//! Capture, encoding and scheduled playback for the voice session.
//!
//! ## Key Components:
//! - **encoder**: float32 ↔ PCM16 ↔ base64, plus the level meter
//! - **buffer**: decoded multi-channel playback buffers
//! - **capture**: the microphone trait, frame chunking and resampling
//! - **playback**: the output trait and the gapless playback scheduler
//! - **graph**: input, output and gain stages owned by one session
//! - **device** / **cpal_backend**: real devices (feature `device-audio`)
//!
//! ## Audio Format Requirements:
//! - **Input**: 16 kHz mono PCM16, little-endian
//! - **Output**: 24 kHz PCM16, mono unless configured otherwise

pub mod buffer;
pub mod capture;
pub mod device;
pub mod encoder;
pub mod graph;
pub mod playback;

#[cfg(feature = "device-audio")]
pub mod cpal_backend;

pub use buffer::PcmBuffer;
pub use capture::{AudioInput, FrameSink};
pub use encoder::{audio_level, decode_pcm16, encode_frame, AudioFrame, Encoder};
pub use graph::AudioGraph;
pub use playback::{AudioOutput, InboundAudioChunk, PlaybackHandle, PlaybackId, PlaybackScheduler};
