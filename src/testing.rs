//! In-memory stand-ins for the microphone, the output device and the
//! remote endpoint. Compiled for tests only.

use crate::audio::capture::{AudioInput, FrameSink};
use crate::audio::encoder::encode_frame;
use crate::audio::playback::{AudioOutput, InboundAudioChunk, PlaybackId};
use crate::audio::buffer::PcmBuffer;
use crate::error::{VoiceError, VoiceResult};
use crate::realtime::connection::{Channel, ChannelEvent, Connector, OutboundMessage};
use crate::realtime::protocol::{ServerEvent, SessionSetup};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Inbound chunk of silence-ish audio lasting `seconds` at 24 kHz mono.
pub fn audio_chunk(seconds: f64) -> InboundAudioChunk {
    let samples = vec![0.1f32; (seconds * 24_000.0).round() as usize];
    InboundAudioChunk::new(encode_frame(&samples).data)
}

// ── Microphone ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MicBehaviour {
    Grant,
    Deny,
    Unavailable,
    /// The permission prompt never resolves
    Hang,
}

#[derive(Default)]
struct MicState {
    sink: Option<FrameSink>,
    active: bool,
    open_calls: usize,
    close_calls: usize,
}

/// Scripted microphone. Clones share state so a test can keep a handle
/// after moving one into the session.
#[derive(Clone)]
pub struct FakeInput {
    behaviour: MicBehaviour,
    frame_size: usize,
    state: Arc<Mutex<MicState>>,
}

impl FakeInput {
    pub fn new(behaviour: MicBehaviour) -> Self {
        Self {
            behaviour,
            frame_size: 320,
            state: Arc::new(Mutex::new(MicState::default())),
        }
    }

    /// Deliver one frame as the device thread would. Returns false when
    /// the microphone is not open.
    pub fn push_frame(&self, samples: &[f32]) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.active {
            return false;
        }
        match state.sink.as_mut() {
            Some(sink) => {
                sink(samples);
                true
            }
            None => false,
        }
    }

    pub fn open_calls(&self) -> usize {
        self.state.lock().unwrap().open_calls
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }
}

#[async_trait(?Send)]
impl AudioInput for FakeInput {
    async fn open(&mut self, sink: FrameSink) -> VoiceResult<()> {
        self.state.lock().unwrap().open_calls += 1;
        match self.behaviour {
            MicBehaviour::Grant => {
                let mut state = self.state.lock().unwrap();
                state.sink = Some(sink);
                state.active = true;
                Ok(())
            }
            MicBehaviour::Deny => Err(VoiceError::PermissionDenied("Permission denied by user".to_string())),
            MicBehaviour::Unavailable => Err(VoiceError::DeviceUnavailable("no input device".to_string())),
            MicBehaviour::Hang => std::future::pending().await,
        }
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.active {
            state.close_calls += 1;
        }
        state.active = false;
        state.sink = None;
    }

    fn is_active(&self) -> bool {
        self.state.lock().unwrap().active
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

// ── Output ─────────────────────────────────────────────────────────

#[derive(Debug)]
struct OutputState {
    time: f64,
    gain: f32,
    open: bool,
    scheduled: Vec<(PlaybackId, f64, f64)>,
    stopped: Vec<PlaybackId>,
    finished: Vec<PlaybackId>,
    close_calls: usize,
}

/// Output device with a hand-driven clock.
#[derive(Debug, Clone)]
pub struct ManualOutput {
    sample_rate: u32,
    state: Arc<Mutex<OutputState>>,
}

impl ManualOutput {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Arc::new(Mutex::new(OutputState {
                time: 0.0,
                gain: 1.0,
                open: true,
                scheduled: Vec::new(),
                stopped: Vec::new(),
                finished: Vec::new(),
                close_calls: 0,
            })),
        }
    }

    pub fn set_time(&self, time: f64) {
        self.state.lock().unwrap().time = time;
    }

    pub fn advance(&self, seconds: f64) {
        self.state.lock().unwrap().time += seconds;
    }

    /// Report `id` as played to the end.
    pub fn finish(&self, id: PlaybackId) {
        self.state.lock().unwrap().finished.push(id);
    }

    /// Finish every scheduled, unstopped buffer whose end is at or before now.
    pub fn finish_due(&self) {
        let mut state = self.state.lock().unwrap();
        let now = state.time;
        let due: Vec<PlaybackId> = state
            .scheduled
            .iter()
            .filter(|(id, start, duration)| start + duration <= now + 1e-9 && !state.stopped.contains(id))
            .map(|(id, _, _)| *id)
            .collect();
        state.finished.extend(due);
    }

    /// `(id, start_at, duration)` in scheduling order.
    pub fn scheduled(&self) -> Vec<(PlaybackId, f64, f64)> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<PlaybackId> {
        self.state.lock().unwrap().stopped.clone()
    }

    pub fn gain(&self) -> f32 {
        self.state.lock().unwrap().gain
    }

    pub fn close_calls(&self) -> usize {
        self.state.lock().unwrap().close_calls
    }
}

impl AudioOutput for ManualOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().time
    }

    fn start_at(&mut self, id: PlaybackId, buffer: PcmBuffer, when: f64) -> VoiceResult<()> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(VoiceError::DeviceUnavailable("output closed".to_string()));
        }
        state.scheduled.push((id, when, buffer.duration()));
        Ok(())
    }

    fn stop(&mut self, id: PlaybackId) {
        self.state.lock().unwrap().stopped.push(id);
    }

    fn drain_finished(&mut self) -> Vec<PlaybackId> {
        std::mem::take(&mut self.state.lock().unwrap().finished)
    }

    fn set_gain(&mut self, gain: f32) {
        self.state.lock().unwrap().gain = gain;
    }

    fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.open {
            state.close_calls += 1;
        }
        state.open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}

// ── Remote endpoint ────────────────────────────────────────────────

/// The far side of a fake channel.
pub struct RemoteEnd {
    pub outbound: mpsc::Receiver<OutboundMessage>,
    pub inbound: mpsc::Sender<ChannelEvent>,
}

impl RemoteEnd {
    pub fn send(&self, event: ServerEvent) {
        let _ = self.inbound.try_send(ChannelEvent::Server(event));
    }

    pub fn send_audio(&self, seconds: f64) {
        self.send(ServerEvent::AudioChunk(audio_chunk(seconds)));
    }

    pub fn interrupt(&self) {
        self.send(ServerEvent::Interrupted);
    }

    pub fn transport_error(&self, message: &str) {
        let _ = self.inbound.try_send(ChannelEvent::Error(message.to_string()));
    }

    pub fn close(&self, reason: Option<&str>) {
        let _ = self.inbound.try_send(ChannelEvent::Closed {
            reason: reason.map(str::to_string),
        });
    }

    /// Everything the session has queued so far.
    pub fn drain_outbound(&mut self) -> Vec<OutboundMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

/// Connector backed by in-memory queues.
pub struct FakeConnector {
    failure: Option<String>,
    capacity: usize,
    remote: Mutex<Option<RemoteEnd>>,
    last_setup: Mutex<Option<SessionSetup>>,
    calls: AtomicUsize,
}

impl FakeConnector {
    pub fn new(capacity: usize) -> Self {
        Self {
            failure: None,
            capacity,
            remote: Mutex::new(None),
            last_setup: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: &str) -> Self {
        Self {
            failure: Some(reason.to_string()),
            ..Self::new(8)
        }
    }

    pub fn take_remote(&self) -> Option<RemoteEnd> {
        self.remote.lock().unwrap().take()
    }

    pub fn last_setup(&self) -> Option<SessionSetup> {
        self.last_setup.lock().unwrap().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, setup: SessionSetup) -> VoiceResult<Channel> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_setup.lock().unwrap() = Some(setup);

        if let Some(reason) = &self.failure {
            return Err(VoiceError::ConnectionFailed(reason.clone()));
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        *self.remote.lock().unwrap() = Some(RemoteEnd {
            outbound: outbound_rx,
            inbound: inbound_tx,
        });

        Ok(Channel {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
