//! Microphone capture and speaker output on top of cpal.
//!
//! The input stream runs the [`CapturePipeline`] inside the device callback.
//! The output stream is a small mixer: scheduled buffers are kept in a
//! voice list that the callback reads with `try_lock`, and the clock is the
//! number of device frames rendered so far.

use crate::audio::buffer::PcmBuffer;
use crate::audio::capture::{AudioInput, CapturePipeline, FrameSink};
use crate::audio::device::{classify_device_error, select_input_device, select_output_device, DeviceSelection};
use crate::audio::playback::{AudioOutput, PlaybackId};
use crate::config::AudioConfig;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

fn stream_error(err: impl std::fmt::Display) -> VoiceError {
    classify_device_error(err.to_string())
}

// ── Input ──────────────────────────────────────────────────────────

pub struct CpalInput {
    selection: DeviceSelection,
    target_rate: u32,
    frame_size: usize,
    stream: Option<cpal::Stream>,
}

impl CpalInput {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            selection: config.input_device.parse().unwrap_or_default(),
            target_rate: config.input_sample_rate,
            frame_size: config.frame_size,
            stream: None,
        }
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mut pipeline: CapturePipeline,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: SizedSample,
        f32: FromSample<T>,
    {
        let mut converted: Vec<f32> = Vec::new();
        device.build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                converted.clear();
                converted.extend(data.iter().map(|s| s.to_sample::<f32>()));
                pipeline.push(&converted);
            },
            |e| error!(error = %e, "Input stream error"),
            None,
        )
    }
}

#[async_trait(?Send)]
impl AudioInput for CpalInput {
    async fn open(&mut self, sink: FrameSink) -> VoiceResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let device = select_input_device(&self.selection)?;
        let supported = device.default_input_config().map_err(stream_error)?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        let pipeline = CapturePipeline::new(
            config.sample_rate.0,
            config.channels,
            self.target_rate,
            self.frame_size,
            sink,
        );

        let stream = match sample_format {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, pipeline),
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, pipeline),
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, pipeline),
            other => {
                return Err(VoiceError::DeviceUnavailable(format!(
                    "unsupported input sample format {:?}",
                    other
                )))
            }
        }
        .map_err(stream_error)?;

        stream.play().map_err(stream_error)?;
        info!(
            device_rate = config.sample_rate.0,
            channels = config.channels,
            target_rate = self.target_rate,
            "Microphone capture started"
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            info!("Microphone capture stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

// ── Output ─────────────────────────────────────────────────────────

struct Voice {
    id: PlaybackId,
    start_at: f64,
    buffer: PcmBuffer,
}

impl Voice {
    fn end_at(&self) -> f64 {
        self.start_at + self.buffer.duration()
    }
}

struct Mixer {
    voices: Vec<Voice>,
    finished: Vec<PlaybackId>,
    gain: f32,
}

impl Mixer {
    /// Render `out.len() / channels` frames starting at device frame `first`.
    fn render(&mut self, out: &mut [f32], channels: usize, first: u64, device_rate: f64) {
        out.fill(0.0);
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let t = (first + i as u64) as f64 / device_rate;
            for voice in &self.voices {
                if t < voice.start_at {
                    continue;
                }
                let index = ((t - voice.start_at) * voice.buffer.sample_rate() as f64) as usize;
                if index >= voice.buffer.frames() {
                    continue;
                }
                for (channel, sample) in frame.iter_mut().enumerate() {
                    *sample += voice.buffer.sample_for(channel, index) * self.gain;
                }
            }
        }

        let frames = (out.len() / channels.max(1)) as u64;
        let now = (first + frames) as f64 / device_rate;
        let finished = &mut self.finished;
        self.voices.retain(|voice| {
            if now >= voice.end_at() {
                finished.push(voice.id);
                false
            } else {
                true
            }
        });
    }
}

fn lock_mixer(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    match mixer.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct CpalOutput {
    stream: Option<cpal::Stream>,
    mixer: Arc<Mutex<Mixer>>,
    frames_played: Arc<AtomicU64>,
    device_rate: u32,
    buffer_rate: u32,
}

impl CpalOutput {
    /// Open the output device and start rendering silence.
    pub fn open(config: &AudioConfig) -> VoiceResult<Self> {
        let selection: DeviceSelection = config.output_device.parse().unwrap_or_default();
        let device = select_output_device(&selection)?;
        let supported = device.default_output_config().map_err(stream_error)?;
        let sample_format = supported.sample_format();
        let stream_config: cpal::StreamConfig = supported.into();

        let mixer = Arc::new(Mutex::new(Mixer {
            voices: Vec::new(),
            finished: Vec::new(),
            gain: config.output_gain,
        }));
        let frames_played = Arc::new(AtomicU64::new(0));

        let stream = match sample_format {
            cpal::SampleFormat::F32 => Self::build_stream::<f32>(&device, &stream_config, &mixer, &frames_played),
            cpal::SampleFormat::I16 => Self::build_stream::<i16>(&device, &stream_config, &mixer, &frames_played),
            cpal::SampleFormat::U16 => Self::build_stream::<u16>(&device, &stream_config, &mixer, &frames_played),
            other => {
                return Err(VoiceError::DeviceUnavailable(format!(
                    "unsupported output sample format {:?}",
                    other
                )))
            }
        }
        .map_err(stream_error)?;

        stream.play().map_err(stream_error)?;
        info!(
            device_rate = stream_config.sample_rate.0,
            channels = stream_config.channels,
            "Speaker output started"
        );

        Ok(Self {
            stream: Some(stream),
            mixer,
            frames_played,
            device_rate: stream_config.sample_rate.0,
            buffer_rate: config.output_sample_rate,
        })
    }

    fn build_stream<T>(
        device: &cpal::Device,
        config: &cpal::StreamConfig,
        mixer: &Arc<Mutex<Mixer>>,
        frames_played: &Arc<AtomicU64>,
    ) -> Result<cpal::Stream, cpal::BuildStreamError>
    where
        T: SizedSample + FromSample<f32>,
    {
        let mixer = Arc::clone(mixer);
        let frames_played = Arc::clone(frames_played);
        let channels = config.channels.max(1) as usize;
        let device_rate = config.sample_rate.0 as f64;
        let mut scratch: Vec<f32> = Vec::new();

        device.build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                let first = frames_played.load(Ordering::Acquire);

                // Never block the device thread; a contended tick renders silence
                match mixer.try_lock() {
                    Ok(mut mixer) => mixer.render(&mut scratch, channels, first, device_rate),
                    Err(_) => scratch.fill(0.0),
                }

                for (out, sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = T::from_sample(*sample);
                }
                frames_played.fetch_add((data.len() / channels) as u64, Ordering::Release);
            },
            |e| error!(error = %e, "Output stream error"),
            None,
        )
    }
}

impl AudioOutput for CpalOutput {
    fn sample_rate(&self) -> u32 {
        self.buffer_rate
    }

    fn current_time(&self) -> f64 {
        self.frames_played.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn start_at(&mut self, id: PlaybackId, buffer: PcmBuffer, when: f64) -> VoiceResult<()> {
        if self.stream.is_none() {
            return Err(VoiceError::DeviceUnavailable("output device closed".to_string()));
        }
        lock_mixer(&self.mixer).voices.push(Voice {
            id,
            start_at: when,
            buffer,
        });
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        lock_mixer(&self.mixer).voices.retain(|voice| voice.id != id);
    }

    fn drain_finished(&mut self) -> Vec<PlaybackId> {
        std::mem::take(&mut lock_mixer(&self.mixer).finished)
    }

    fn set_gain(&mut self, gain: f32) {
        lock_mixer(&self.mixer).gain = gain;
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            lock_mixer(&self.mixer).voices.clear();
            info!("Speaker output stopped");
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
