//! Capture and playback sides plus their gain stages, held together for the
//! lifetime of one orchestrator.

use crate::audio::capture::AudioInput;
use crate::audio::playback::AudioOutput;
use tracing::debug;

/// Input device, output device and the two gain nodes between them and
/// the session.
pub struct AudioGraph<I, O> {
    pub input: I,
    pub output: O,
    input_gain: f32,
    output_gain: f32,
    closed: bool,
}

impl<I: AudioInput, O: AudioOutput> AudioGraph<I, O> {
    pub fn new(input: I, mut output: O) -> Self {
        output.set_gain(1.0);
        Self {
            input,
            output,
            input_gain: 1.0,
            output_gain: 1.0,
            closed: false,
        }
    }

    pub fn with_gains(mut self, input_gain: f32, output_gain: f32) -> Self {
        self.input_gain = input_gain;
        self.set_output_gain(output_gain);
        self
    }

    /// Gain applied to captured frames before encoding.
    pub fn input_gain(&self) -> f32 {
        self.input_gain
    }

    pub fn output_gain(&self) -> f32 {
        self.output_gain
    }

    pub fn set_output_gain(&mut self, gain: f32) {
        self.output_gain = gain;
        self.output.set_gain(gain);
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release both sides. Safe to call any number of times.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.input.close();
        self.output.close();
        self.closed = true;
        debug!("Audio graph closed");
    }
}

/// Apply a gain stage in place. Unity gain is a no-op.
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    if gain == 1.0 {
        return;
    }
    for sample in samples.iter_mut() {
        *sample *= gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeInput, ManualOutput, MicBehaviour};

    #[tokio::test]
    async fn test_close_releases_both_sides_once() {
        let mut graph = AudioGraph::new(FakeInput::new(MicBehaviour::Grant), ManualOutput::new(24_000));
        graph.input.open(Box::new(|_: &[f32]| {})).await.unwrap();
        assert!(graph.input.is_active());
        assert!(graph.output.is_open());

        graph.close();
        graph.close();

        assert!(graph.is_closed());
        assert!(!graph.input.is_active());
        assert!(!graph.output.is_open());
        assert_eq!(graph.input.close_calls(), 1);
        assert_eq!(graph.output.close_calls(), 1);
    }

    #[test]
    fn test_output_gain_reaches_device() {
        let graph = AudioGraph::new(FakeInput::new(MicBehaviour::Grant), ManualOutput::new(24_000))
            .with_gains(0.5, 0.8);
        assert_eq!(graph.input_gain(), 0.5);
        assert_eq!(graph.output.gain(), 0.8);
    }

    #[test]
    fn test_apply_gain() {
        let mut samples = [0.5, -0.25];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples, [1.0, -0.5]);
    }
}
