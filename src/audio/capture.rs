//! # Microphone Capture
//!
//! The capture side pushes fixed-length mono float32 frames at 16 kHz into a
//! sink callback. Backends implement [`AudioInput`]; the helpers here turn
//! whatever a device delivers (any rate, any channel count, any callback
//! size) into those frames.

use crate::error::VoiceResult;
use async_trait::async_trait;

/// Receives every captured frame. Runs on the device thread, so it must not
/// block and must be `Send`.
pub type FrameSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A microphone source.
///
/// ## Lifecycle:
/// 1. `open(sink)` requests access and starts delivering frames
/// 2. frames arrive through `sink` until `close()`
/// 3. `close()` releases the device; calling it again does nothing
///
/// Device streams are frequently `!Send`, so the futures returned here are
/// not required to be `Send` either.
#[async_trait(?Send)]
pub trait AudioInput {
    /// Acquire the microphone and start pushing frames.
    ///
    /// ## Errors:
    /// - `VoiceError::PermissionDenied` when access is refused
    /// - `VoiceError::DeviceUnavailable` when no usable device exists
    async fn open(&mut self, sink: FrameSink) -> VoiceResult<()>;

    /// Stop delivering frames and release the device.
    fn close(&mut self);

    fn is_active(&self) -> bool;

    /// Samples per frame handed to the sink.
    fn frame_size(&self) -> usize;
}

/// Regroups arbitrary sample runs into fixed-length frames.
#[derive(Debug)]
pub struct FrameChunker {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameChunker {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and emit every frame that is now complete.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let wanted = self.frame_size - self.pending.len();
            let take = wanted.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_size {
                emit(&self.pending);
                self.pending.clear();
            }
        }
    }

    /// Samples held back waiting for a full frame.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}

/// Streaming linear-interpolation resampler with mono downmix.
///
/// Keeps the last input sample and the fractional read position between
/// calls so consecutive device buffers join without clicks.
#[derive(Debug)]
pub struct LinearResampler {
    step: f64,
    channels: usize,
    position: f64,
    previous: f32,
    mono: Vec<f32>,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32, channels: u16) -> Self {
        Self {
            step: from_rate.max(1) as f64 / to_rate.max(1) as f64,
            channels: channels.max(1) as usize,
            position: 0.0,
            previous: 0.0,
            mono: Vec::new(),
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.step == 1.0 && self.channels == 1
    }

    /// Convert one interleaved device buffer, appending output to `out`.
    pub fn process(&mut self, interleaved: &[f32], out: &mut Vec<f32>) {
        self.mono.clear();
        if self.channels == 1 {
            self.mono.extend_from_slice(interleaved);
        } else {
            let scale = 1.0 / self.channels as f32;
            self.mono.extend(
                interleaved
                    .chunks_exact(self.channels)
                    .map(|frame| frame.iter().sum::<f32>() * scale),
            );
        }

        if self.step == 1.0 {
            out.extend_from_slice(&self.mono);
            return;
        }

        let n = self.mono.len();
        if n == 0 {
            return;
        }

        // mono[-1] is the last sample of the previous buffer
        let last_index = (n - 1) as f64;
        while self.position < last_index {
            let base = self.position.floor();
            let frac = (self.position - base) as f32;
            let i = base as isize;
            let a = if i < 0 { self.previous } else { self.mono[i as usize] };
            let b = self.mono[(i + 1) as usize];
            out.push(a + (b - a) * frac);
            self.position += self.step;
        }

        self.position -= n as f64;
        self.previous = self.mono[n - 1];
    }
}

/// Device buffer → mono 16 kHz → fixed frames → sink.
///
/// Owned by the device callback; nothing in here blocks.
pub struct CapturePipeline {
    resampler: LinearResampler,
    chunker: FrameChunker,
    resampled: Vec<f32>,
    sink: FrameSink,
}

impl CapturePipeline {
    pub fn new(device_rate: u32, device_channels: u16, target_rate: u32, frame_size: usize, sink: FrameSink) -> Self {
        Self {
            resampler: LinearResampler::new(device_rate, target_rate, device_channels),
            chunker: FrameChunker::new(frame_size),
            resampled: Vec::with_capacity(frame_size * 2),
            sink,
        }
    }

    pub fn push(&mut self, interleaved: &[f32]) {
        self.resampled.clear();
        self.resampler.process(interleaved, &mut self.resampled);
        let sink = &mut self.sink;
        self.chunker.push(&self.resampled, |frame| sink(frame));
    }
}
