//! # Playback Buffers
//!
//! Decoded inbound audio, laid out per channel so the output side can mix
//! it without re-interpreting the interleaved wire order.

use crate::audio::encoder::decode_pcm16;           // base64 PCM16 → f32
use crate::error::{VoiceError, VoiceResult};

/// Multi-channel float buffer at a fixed sample rate.
///
/// ## Rust Concepts:
/// - **Vec<Vec<f32>>**: one owned vector per channel, no shared storage
/// - **private fields**: construction goes through `from_interleaved` so
///   the equal-length invariant always holds
///
/// ## Layout:
/// `channels[c][i]` is sample `i` of channel `c`. All channels have the same
/// length. Mono chunks are copied directly into channel 0.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl PcmBuffer {
    /// Split interleaved samples into per-channel vectors.
    ///
    /// ## Errors:
    /// - `channel_count` of zero
    /// - a sample count that is not a multiple of the channel count
    pub fn from_interleaved(samples: &[f32], channel_count: u16, sample_rate: u32) -> VoiceResult<Self> {
        if channel_count == 0 {
            return Err(VoiceError::Decode("channel count must be at least 1".to_string()));
        }

        let count = channel_count as usize;
        if samples.len() % count != 0 {
            return Err(VoiceError::Decode(format!(
                "{} samples cannot be split into {} channels",
                samples.len(),
                count
            )));
        }

        let frames = samples.len() / count;
        let channels = if count == 1 {
            vec![samples.to_vec()]
        } else {
            let mut channels = vec![Vec::with_capacity(frames); count];
            for frame in samples.chunks_exact(count) {
                for (channel, &sample) in channels.iter_mut().zip(frame) {
                    channel.push(sample);
                }
            }
            channels
        };

        Ok(Self { channels, sample_rate })
    }

    /// Decode a base64 PCM16 payload straight into a buffer.
    pub fn from_base64(payload: &str, channel_count: u16, sample_rate: u32) -> VoiceResult<Self> {
        let samples = decode_pcm16(payload)?;
        Self::from_interleaved(&samples, channel_count, sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(|c| c.as_slice())
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds: frames / sample_rate.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample at `frame` for output channel `out_channel`.
    ///
    /// Mono buffers feed every output channel; extra output channels beyond
    /// the buffer's layout repeat its last channel.
    pub fn sample_for(&self, out_channel: usize, frame: usize) -> f32 {
        let last = self.channels.len().saturating_sub(1);
        self.channels
            .get(out_channel.min(last))
            .and_then(|c| c.get(frame))
            .copied()
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encoder::encode_frame;

    #[test]
    fn test_mono_is_direct_copy() {
        let samples = vec![0.1, 0.2, 0.3, 0.4];
        let buffer = PcmBuffer::from_interleaved(&samples, 1, 24_000).unwrap();
        assert_eq!(buffer.channel_count(), 1);
        assert_eq!(buffer.channel(0).unwrap(), samples.as_slice());
    }

    #[test]
    fn test_stereo_is_deinterleaved() {
        let samples = vec![0.1, -0.1, 0.2, -0.2, 0.3, -0.3];
        let buffer = PcmBuffer::from_interleaved(&samples, 2, 24_000).unwrap();
        assert_eq!(buffer.frames(), 3);
        assert_eq!(buffer.channel(0).unwrap(), &[0.1, 0.2, 0.3]);
        assert_eq!(buffer.channel(1).unwrap(), &[-0.1, -0.2, -0.3]);
        assert_eq!(buffer.sample_for(1, 2), -0.3);
    }

    #[test]
    fn test_uneven_channel_split_is_rejected() {
        let result = PcmBuffer::from_interleaved(&[0.0; 5], 2, 24_000);
        assert!(matches!(result, Err(VoiceError::Decode(_))));
        assert!(PcmBuffer::from_interleaved(&[0.0; 4], 0, 24_000).is_err());
    }

    #[test]
    fn test_duration_from_base64() {
        // 12,000 samples at 24 kHz is half a second
        let frame = encode_frame(&vec![0.25; 12_000]);
        let buffer = PcmBuffer::from_base64(&frame.data, 1, 24_000).unwrap();
        assert!((buffer.duration() - 0.5).abs() < 1e-9);
        assert_eq!(buffer.sample_rate(), 24_000);
    }

    #[test]
    fn test_mono_feeds_every_output_channel() {
        let buffer = PcmBuffer::from_interleaved(&[0.5, 0.25], 1, 24_000).unwrap();
        assert_eq!(buffer.sample_for(0, 1), 0.25);
        assert_eq!(buffer.sample_for(1, 1), 0.25);
        assert_eq!(buffer.sample_for(0, 9), 0.0);
    }
}
