//! # Playback Scheduling
//!
//! Inbound chunks are decoded and queued back to back against the output
//! device's clock so consecutive chunks play without gaps or overlap.
//!
//! ## Scheduling Rule:
//! ```text
//! start_at        = max(next_start_time, now)
//! next_start_time = start_at + duration
//! ```
//! An interruption (barge-in) stops everything still pending and pulls
//! `next_start_time` back to the current clock.

use crate::audio::buffer::PcmBuffer;
use crate::error::{VoiceError, VoiceResult};
use std::collections::BTreeMap;
use tracing::{debug, trace};

/// Stable identifier for one scheduled buffer.
pub type PlaybackId = u64;

/// An audio output with its own clock.
///
/// Implementations own the device side; the scheduler only decides when
/// each buffer starts.
pub trait AudioOutput {
    /// Rate the output plays decoded buffers at.
    fn sample_rate(&self) -> u32;

    /// Output clock in seconds. Monotonic while the output is open.
    fn current_time(&self) -> f64;

    /// Start `buffer` at clock time `when`.
    fn start_at(&mut self, id: PlaybackId, buffer: PcmBuffer, when: f64) -> VoiceResult<()>;

    /// Cancel a scheduled or playing buffer. Unknown ids are ignored.
    fn stop(&mut self, id: PlaybackId);

    /// Ids that finished playing since the last call.
    fn drain_finished(&mut self) -> Vec<PlaybackId>;

    fn set_gain(&mut self, gain: f32);

    /// Release the device. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// A buffer handed to the output, tracked until it finishes or is cancelled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackHandle {
    pub id: PlaybackId,
    pub start_at: f64,
    pub duration: f64,
}

impl PlaybackHandle {
    pub fn end_at(&self) -> f64 {
        self.start_at + self.duration
    }
}

/// Inbound base64 PCM16 payload, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundAudioChunk {
    pub data: String,
}

impl InboundAudioChunk {
    pub fn new(data: impl Into<String>) -> Self {
        Self { data: data.into() }
    }
}

/// Gapless sequential scheduler.
///
/// Owned by the orchestrator; never shared across tasks.
#[derive(Debug)]
pub struct PlaybackScheduler {
    next_start_time: f64,
    pending: BTreeMap<PlaybackId, PlaybackHandle>,
    next_id: PlaybackId,
    channels: u16,
    sample_rate: u32,
}

impl PlaybackScheduler {
    /// Create a scheduler anchored at the output's current clock.
    pub fn new<O: AudioOutput + ?Sized>(output: &O, channels: u16) -> Self {
        Self {
            next_start_time: output.current_time(),
            pending: BTreeMap::new(),
            next_id: 1,
            channels,
            sample_rate: output.sample_rate(),
        }
    }

    /// Decode `chunk` and schedule it right after everything already queued.
    ///
    /// ## Errors:
    /// - `VoiceError::Decode` for bad base64, odd byte counts, uneven channel
    ///   splits or an empty payload. Nothing is scheduled and the clock is
    ///   left untouched.
    /// - errors from the output's `start_at`
    pub fn enqueue<O: AudioOutput + ?Sized>(
        &mut self,
        output: &mut O,
        chunk: &InboundAudioChunk,
    ) -> VoiceResult<PlaybackHandle> {
        let buffer = PcmBuffer::from_base64(&chunk.data, self.channels, self.sample_rate)?;
        if buffer.is_empty() {
            return Err(VoiceError::Decode("empty audio chunk".to_string()));
        }

        let now = output.current_time();
        let start_at = self.next_start_time.max(now);
        let duration = buffer.duration();

        let id = self.next_id;
        output.start_at(id, buffer, start_at)?;
        self.next_id += 1;

        let handle = PlaybackHandle { id, start_at, duration };
        self.pending.insert(id, handle);
        self.next_start_time = handle.end_at();

        trace!(
            id,
            start_at,
            duration,
            pending = self.pending.len(),
            "Scheduled playback chunk"
        );

        Ok(handle)
    }

    /// Stop every pending buffer and restart the clock at `now`.
    ///
    /// Returns how many handles were cancelled.
    pub fn interrupt<O: AudioOutput + ?Sized>(&mut self, output: &mut O) -> usize {
        let cancelled = self.pending.len();
        for id in self.pending.keys() {
            output.stop(*id);
        }
        self.pending.clear();
        self.next_start_time = output.current_time();

        debug!(cancelled, next_start_time = self.next_start_time, "Playback interrupted");
        cancelled
    }

    /// Forget handles the output reports as finished.
    pub fn prune<O: AudioOutput + ?Sized>(&mut self, output: &mut O) -> usize {
        let finished = output.drain_finished();
        let before = self.pending.len();
        for id in finished {
            self.pending.remove(&id);
        }
        before - self.pending.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn pending(&self) -> impl Iterator<Item = &PlaybackHandle> {
        self.pending.values()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}
