//! # Voice Session Orchestrator
//!
//! `VoiceSession` wires the microphone, encoder, realtime channel and
//! playback scheduler together and is the only thing the UI layer talks to.
//!
//! ## Lifecycle
//! ```text
//! Idle → RequestingMicrophone → Connecting → Listening → Stopping → Closed
//!   ▲            │ mic failure                   │
//!   └────────────┘                               └─ connect failure → Errored
//! ```
//!
//! ## Threading
//! The session lives on a single owner task. The audio device thread only
//! touches the frame forwarder (a cloned queue handle behind a mutex, a
//! gain value and atomic counters). Inbound events are pulled from the
//! channel queue by [`VoiceSession::process_next_event`] or
//! [`VoiceSession::run_until_closed`], never pushed through callbacks.
//!
//! ## Failures
//! Public operations never return errors. Every failure is turned into a
//! [`VoiceEvent::Error`] plus the matching state change.

use crate::audio::capture::{AudioInput, FrameSink};
use crate::audio::encoder::{audio_level, Encoder};
use crate::audio::graph::{apply_gain, AudioGraph};
use crate::audio::playback::{AudioOutput, InboundAudioChunk, PlaybackScheduler};
use crate::config::VoiceConfig;
use crate::error::VoiceError;
use crate::realtime::connection::{ChannelEvent, Connector, FrameDelivery, FrameSender};
use crate::realtime::protocol::{ServerEvent, SessionSetup};
use crate::realtime::session::RealtimeSession;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Where a voice chat currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    RequestingMicrophone,
    Connecting,
    Listening,
    Stopping,
    Closed,
    Errored,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::RequestingMicrophone => "requesting_microphone",
            SessionState::Connecting => "connecting",
            SessionState::Listening => "listening",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
            SessionState::Errored => "errored",
        }
    }

    /// Human-readable status line for the UI.
    pub fn status_text(&self) -> &'static str {
        match self {
            SessionState::Idle => "Ready",
            SessionState::RequestingMicrophone => "Requesting microphone access...",
            SessionState::Connecting => "Connecting...",
            SessionState::Listening => "Listening...",
            SessionState::Stopping => "Stopping...",
            SessionState::Closed => "Voice chat ended",
            SessionState::Errored => "Error",
        }
    }

    /// The recording flag: set from the start request until the chat stops.
    pub fn is_recording(&self) -> bool {
        matches!(
            self,
            SessionState::RequestingMicrophone
                | SessionState::Connecting
                | SessionState::Listening
                | SessionState::Stopping
        )
    }
}

/// Notifications for the UI layer.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Status { state: SessionState, text: String },
    Error { code: &'static str, message: String },
    /// Mean absolute level of one captured frame, in [0, 1]
    AudioLevel(f32),
}

/// Counters touched from the audio device thread.
#[derive(Debug, Default)]
struct CaptureCounters {
    frames_captured: AtomicU64,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
}

impl CaptureCounters {
    fn clear(&self) {
        self.frames_captured.store(0, Ordering::Relaxed);
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
    }
}

/// Counters owned by the session task.
#[derive(Debug, Default, Clone)]
struct SessionPerformance {
    chunks_received: u64,
    chunks_scheduled: u64,
    chunks_dropped: u64,
    interruptions: u64,
    error_count: u64,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

/// Snapshot of one session's activity.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatsSummary {
    pub session_id: String,
    pub state: SessionState,
    pub frames_captured: u64,
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
    pub chunks_received: u64,
    pub chunks_scheduled: u64,
    pub chunks_dropped: u64,
    pub interruptions: u64,
    pub error_count: u64,
    pub pending_playback: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub listening_duration_seconds: f64,
}

/// One voice chat: microphone in, companion audio out.
///
/// ## Rust Concepts:
/// - **Generics `<I, O>`**: the device backends are type parameters, so
///   tests plug in fakes and the binary plugs in cpal without dynamic dispatch
/// - **Arc<dyn Connector>**: the transport is a trait object, shared with
///   whoever builds the session
/// - **Arc<Mutex<Option<FrameSender>>>**: the device thread reads the
///   current sender; the session swaps it in on connect and takes it out
///   on stop
/// - **&mut self on every operation**: one owner drives the session, so the
///   scheduler and state need no locking
pub struct VoiceSession<I: AudioInput, O: AudioOutput> {
    id: Uuid,
    config: VoiceConfig,
    state: SessionState,
    graph: AudioGraph<I, O>,
    connector: Arc<dyn Connector>,
    realtime: RealtimeSession,
    scheduler: PlaybackScheduler,
    frame_tx: Arc<Mutex<Option<FrameSender>>>,
    capture: Arc<CaptureCounters>,
    performance: SessionPerformance,
    created_at: DateTime<Utc>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    destroyed: bool,
}

impl<I: AudioInput, O: AudioOutput> VoiceSession<I, O> {
    /// Build a session around an audio graph and a connector.
    ///
    /// Returns the session and the receiving end of its event queue.
    pub fn new(
        config: VoiceConfig,
        graph: AudioGraph<I, O>,
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<VoiceEvent>) {
        let id = Uuid::new_v4();
        let (events, rx) = mpsc::unbounded_channel();
        let scheduler = PlaybackScheduler::new(&graph.output, config.audio.output_channels);

        info!(session_id = %id, "Voice session created");

        let session = Self {
            id,
            realtime: RealtimeSession::new(id.to_string()),
            config,
            state: SessionState::Idle,
            graph,
            connector,
            scheduler,
            frame_tx: Arc::new(Mutex::new(None)),
            capture: Arc::new(CaptureCounters::default()),
            performance: SessionPerformance::default(),
            created_at: Utc::now(),
            events,
            destroyed: false,
        };
        (session, rx)
    }

    pub fn session_id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub fn playback(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Begin a voice chat. Only acts from `Idle`.
    pub async fn start(&mut self) {
        if self.destroyed {
            warn!(session_id = %self.id, "start() on a destroyed session ignored");
            return;
        }
        if self.state != SessionState::Idle {
            debug!(session_id = %self.id, state = self.state.as_str(), "start() ignored");
            return;
        }

        self.set_state(SessionState::RequestingMicrophone);

        let sink = self.frame_sink();
        let timeout = Duration::from_millis(self.config.audio.microphone_timeout_ms);
        let opened = match tokio::time::timeout(timeout, self.graph.input.open(sink)).await {
            Ok(result) => result,
            Err(_) => Err(VoiceError::PermissionDenied(format!(
                "no answer to the microphone request after {}ms",
                timeout.as_millis()
            ))),
        };

        if let Err(e) = opened {
            self.graph.input.close();
            self.report_error(&e);
            self.set_state(SessionState::Idle);
            return;
        }

        self.set_state(SessionState::Connecting);

        let setup = SessionSetup {
            model: self.config.endpoint.model.clone(),
            system_prompt: self.config.endpoint.system_prompt.clone(),
            voice_name: self.config.endpoint.voice_name.clone(),
        };
        let connector = Arc::clone(&self.connector);

        match self.realtime.connect(connector.as_ref(), setup).await {
            Ok(()) => {
                *lock(&self.frame_tx) = self.realtime.frame_sender();
                self.performance.started_at = Some(Utc::now());
                self.set_state(SessionState::Listening);
            }
            Err(e) => {
                self.release_capture();
                self.report_error(&e);
                self.set_state(SessionState::Errored);
            }
        }
    }

    /// End the voice chat. Only acts while listening.
    ///
    /// Audio already scheduled keeps playing unless
    /// `session.stop_cancels_playback` is set.
    pub async fn stop(&mut self) {
        if self.state != SessionState::Listening {
            debug!(session_id = %self.id, state = self.state.as_str(), "stop() ignored");
            return;
        }

        self.set_state(SessionState::Stopping);
        self.release_capture();
        self.realtime.close();

        if self.config.session.stop_cancels_playback {
            self.scheduler.interrupt(&mut self.graph.output);
        }

        self.performance.ended_at = Some(Utc::now());
        self.set_state(SessionState::Closed);
    }

    /// Return to `Idle` with a fresh realtime session.
    ///
    /// Does nothing while recording. Otherwise cancels playback and
    /// clears the statistics.
    pub async fn reset(&mut self) {
        if self.destroyed {
            return;
        }
        if self.state.is_recording() {
            debug!(session_id = %self.id, state = self.state.as_str(), "reset() ignored while recording");
            return;
        }

        self.release_capture();
        self.realtime.close();
        self.scheduler.interrupt(&mut self.graph.output);
        self.realtime = RealtimeSession::new(self.id.to_string());

        self.capture.clear();
        self.performance = SessionPerformance::default();

        info!(session_id = %self.id, "Voice session reset");
        self.set_state(SessionState::Idle);
    }

    /// Release everything. Safe to call from any state, any number of times.
    pub async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }

        self.release_capture();
        self.realtime.close();
        self.scheduler.interrupt(&mut self.graph.output);
        self.graph.close();
        self.destroyed = true;

        if self.performance.ended_at.is_none() && self.performance.started_at.is_some() {
            self.performance.ended_at = Some(Utc::now());
        }
        if self.state != SessionState::Closed {
            self.set_state(SessionState::Closed);
        }
        info!(session_id = %self.id, "Voice session destroyed");
    }

    /// Wait for one inbound event and act on it.
    ///
    /// Returns false when there is no open channel to read from.
    pub async fn process_next_event(&mut self) -> bool {
        match self.realtime.next_event().await {
            Some(event) => {
                self.handle_channel_event(event);
                true
            }
            None => false,
        }
    }

    /// Drive the session until it leaves `Listening`, pruning finished
    /// playback on a fixed tick.
    pub async fn run_until_closed(&mut self) {
        let period = Duration::from_millis(self.config.session.playback_prune_interval_ms);
        let mut prune = tokio::time::interval(period);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.state == SessionState::Listening {
            tokio::select! {
                event = self.realtime.next_event() => match event {
                    Some(event) => self.handle_channel_event(event),
                    None => break,
                },
                _ = prune.tick() => {
                    self.prune_playback();
                }
            }
        }
    }

    /// Forget playback the output has finished.
    pub fn prune_playback(&mut self) -> usize {
        let pruned = self.scheduler.prune(&mut self.graph.output);
        if pruned > 0 {
            trace!(session_id = %self.id, pruned, pending = self.scheduler.pending_count(), "Pruned playback");
        }
        pruned
    }

    pub fn stats(&self) -> SessionStatsSummary {
        let perf = &self.performance;
        let listening_duration_seconds = match perf.started_at {
            Some(started) => {
                let end = perf.ended_at.unwrap_or_else(Utc::now);
                (end - started).num_milliseconds().max(0) as f64 / 1000.0
            }
            None => 0.0,
        };

        SessionStatsSummary {
            session_id: self.id.to_string(),
            state: self.state,
            frames_captured: self.capture.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.capture.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.capture.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: self.capture.bytes_sent.load(Ordering::Relaxed),
            chunks_received: perf.chunks_received,
            chunks_scheduled: perf.chunks_scheduled,
            chunks_dropped: perf.chunks_dropped,
            interruptions: perf.interruptions,
            error_count: perf.error_count,
            pending_playback: self.scheduler.pending_count(),
            created_at: self.created_at,
            started_at: perf.started_at,
            ended_at: perf.ended_at,
            listening_duration_seconds,
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Server(ServerEvent::AudioChunk(chunk)) => self.schedule_chunk(&chunk),
            ChannelEvent::Server(ServerEvent::Interrupted) => {
                self.performance.interruptions += 1;
                let cancelled = self.scheduler.interrupt(&mut self.graph.output);
                info!(session_id = %self.id, cancelled, "Companion interrupted");
            }
            ChannelEvent::Server(ServerEvent::TurnComplete) => {
                debug!(session_id = %self.id, "Turn complete");
            }
            ChannelEvent::Server(ServerEvent::SetupComplete) => {
                debug!(session_id = %self.id, "Late setupComplete ignored");
            }
            ChannelEvent::Server(ServerEvent::Error { message }) | ChannelEvent::Error(message) => {
                self.report_error(&VoiceError::RemoteError(message));
            }
            ChannelEvent::Closed { reason } => self.handle_remote_close(reason),
        }
    }

    fn schedule_chunk(&mut self, chunk: &InboundAudioChunk) {
        self.performance.chunks_received += 1;
        match self.scheduler.enqueue(&mut self.graph.output, chunk) {
            Ok(handle) => {
                self.performance.chunks_scheduled += 1;
                trace!(session_id = %self.id, id = handle.id, start_at = handle.start_at, "Chunk scheduled");
            }
            Err(e) => {
                self.performance.chunks_dropped += 1;
                warn!(session_id = %self.id, error = %e, "Dropping inbound audio chunk");
            }
        }
    }

    fn handle_remote_close(&mut self, reason: Option<String>) {
        if !self.state.is_recording() {
            debug!(session_id = %self.id, reason = ?reason, "Channel closed after stop");
            return;
        }

        let reason = reason.unwrap_or_else(|| "the companion ended the conversation".to_string());
        self.release_capture();
        self.realtime.close();
        self.performance.ended_at = Some(Utc::now());
        self.report_error(&VoiceError::RemoteClose(reason));
        self.set_state(SessionState::Closed);
    }

    /// Stop the microphone and detach it from the channel.
    fn release_capture(&mut self) {
        lock(&self.frame_tx).take();
        self.graph.input.close();
    }

    /// Per-frame path on the device thread: gain, level meter, encode, queue.
    fn frame_sink(&self) -> FrameSink {
        let sender = Arc::clone(&self.frame_tx);
        let counters = Arc::clone(&self.capture);
        let events = self.events.clone();
        let gain = self.graph.input_gain();
        let mut encoder = Encoder::new();
        let mut scratch: Vec<f32> = Vec::new();

        Box::new(move |samples: &[f32]| {
            scratch.clear();
            scratch.extend_from_slice(samples);
            apply_gain(&mut scratch, gain);

            counters.frames_captured.fetch_add(1, Ordering::Relaxed);
            let _ = events.send(VoiceEvent::AudioLevel(audio_level(&scratch)));

            let guard = lock(&sender);
            let Some(tx) = guard.as_ref() else {
                counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            };

            let frame = encoder.encode_frame(&scratch);
            let bytes = frame.pcm_bytes() as u64;
            match tx.send(frame) {
                Ok(FrameDelivery::Queued) => {
                    counters.frames_sent.fetch_add(1, Ordering::Relaxed);
                    counters.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
                }
                Ok(FrameDelivery::Dropped) => {
                    counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(error = %e, "Frame dropped");
                }
            }
        })
    }

    fn set_state(&mut self, state: SessionState) {
        let previous = self.state;
        self.state = state;
        info!(
            session_id = %self.id,
            from = previous.as_str(),
            to = state.as_str(),
            "Voice session state changed"
        );
        let _ = self.events.send(VoiceEvent::Status {
            state,
            text: state.status_text().to_string(),
        });
    }

    fn report_error(&mut self, err: &VoiceError) {
        self.performance.error_count += 1;
        error!(session_id = %self.id, code = err.code(), error = %err, "Voice session error");
        let _ = self.events.send(VoiceEvent::Error {
            code: err.code(),
            message: err.to_string(),
        });
    }
}

/// A poisoned forwarder lock only means a device callback panicked; the
/// slot itself is still usable.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::connection::OutboundMessage;
    use crate::testing::{audio_chunk, FakeConnector, FakeInput, ManualOutput, MicBehaviour, RemoteEnd};

    struct Harness {
        session: VoiceSession<FakeInput, ManualOutput>,
        events: mpsc::UnboundedReceiver<VoiceEvent>,
        mic: FakeInput,
        output: ManualOutput,
        connector: Arc<FakeConnector>,
    }

    fn harness_with(mic: MicBehaviour, connector: FakeConnector, config: VoiceConfig) -> Harness {
        let mic = FakeInput::new(mic);
        let output = ManualOutput::new(24_000);
        let connector = Arc::new(connector);
        let graph = AudioGraph::new(mic.clone(), output.clone());
        let dyn_connector: Arc<dyn Connector> = connector.clone();
        let (session, events) = VoiceSession::new(config, graph, dyn_connector);
        Harness {
            session,
            events,
            mic,
            output,
            connector,
        }
    }

    fn harness(mic: MicBehaviour) -> Harness {
        harness_with(mic, FakeConnector::new(64), VoiceConfig::default())
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<VoiceEvent>) -> Vec<VoiceEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn states(events: &[VoiceEvent]) -> Vec<SessionState> {
        events
            .iter()
            .filter_map(|e| match e {
                VoiceEvent::Status { state, .. } => Some(*state),
                _ => None,
            })
            .collect()
    }

    fn errors(events: &[VoiceEvent]) -> Vec<(&'static str, String)> {
        events
            .iter()
            .filter_map(|e| match e {
                VoiceEvent::Error { code, message } => Some((*code, message.clone())),
                _ => None,
            })
            .collect()
    }

    async fn listening() -> (Harness, RemoteEnd) {
        let mut h = harness(MicBehaviour::Grant);
        h.session.start().await;
        assert_eq!(h.session.state(), SessionState::Listening);
        let remote = h.connector.take_remote().unwrap();
        drain(&mut h.events);
        (h, remote)
    }

    #[tokio::test]
    async fn test_start_with_microphone_and_endpoint_reaches_listening() {
        let mut h = harness(MicBehaviour::Grant);
        assert_eq!(h.session.state(), SessionState::Idle);

        h.session.start().await;
        let events = drain(&mut h.events);
        assert_eq!(
            states(&events),
            vec![
                SessionState::RequestingMicrophone,
                SessionState::Connecting,
                SessionState::Listening
            ]
        );
        assert!(matches!(
            &events[2],
            VoiceEvent::Status { text, .. } if text == "Listening..."
        ));

        let mut remote = h.connector.take_remote().unwrap();
        for level in [0.0f32, 0.25, 0.9] {
            assert!(h.mic.push_frame(&vec![level; 320]));
        }

        let levels: Vec<f32> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                VoiceEvent::AudioLevel(level) => Some(level),
                _ => None,
            })
            .collect();
        assert_eq!(levels.len(), 3);
        assert!(levels.iter().all(|l| (0.0..=1.0).contains(l)));
        assert!((levels[1] - 0.25).abs() < 1e-6);

        let sent = remote.drain_outbound();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| matches!(m, OutboundMessage::Audio(f) if f.sample_count == 320)));

        let stats = h.session.stats();
        assert_eq!(stats.frames_captured, 3);
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.bytes_sent, 3 * 640);
    }

    #[tokio::test]
    async fn test_denied_microphone_reports_error_and_opens_no_channel() {
        let mut h = harness(MicBehaviour::Deny);
        h.session.start().await;

        let events = drain(&mut h.events);
        let errs = errors(&events);
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].0, "permission_denied");
        assert!(errs[0].1.to_lowercase().contains("permission"));

        assert!(matches!(h.session.state(), SessionState::Idle | SessionState::Errored));
        assert_eq!(h.connector.connect_calls(), 0);
        assert!(!h.mic.is_active());
    }

    #[tokio::test]
    async fn test_microphone_failure_allows_another_start() {
        let mut h = harness(MicBehaviour::Unavailable);
        h.session.start().await;
        assert_eq!(h.session.state(), SessionState::Idle);
        h.session.start().await;
        assert_eq!(h.mic.open_calls(), 2);
        let errs = errors(&drain(&mut h.events));
        assert!(errs.iter().all(|(code, _)| *code == "device_unavailable"));
    }

    #[tokio::test]
    async fn test_unanswered_permission_request_times_out() {
        let mut config = VoiceConfig::default();
        config.audio.microphone_timeout_ms = 20;
        let mut h = harness_with(MicBehaviour::Hang, FakeConnector::new(8), config);

        h.session.start().await;
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(errors(&drain(&mut h.events))[0].0, "permission_denied");
        assert_eq!(h.connector.connect_calls(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_releases_microphone_and_errors() {
        let mut h = harness_with(MicBehaviour::Grant, FakeConnector::failing("refused"), VoiceConfig::default());
        h.session.start().await;

        let events = drain(&mut h.events);
        assert_eq!(states(&events).last(), Some(&SessionState::Errored));
        assert_eq!(errors(&events)[0].0, "connection_failed");
        assert_eq!(h.session.state(), SessionState::Errored);
        assert!(!h.mic.is_active());
        assert!(!h.mic.push_frame(&[0.1; 320]));

        // Only reset leaves the errored state
        h.session.start().await;
        assert_eq!(h.connector.connect_calls(), 1);
    }

    #[tokio::test]
    async fn test_inbound_chunks_play_back_to_back() {
        let (mut h, remote) = listening().await;

        for seconds in [0.5, 0.3, 0.4] {
            remote.send_audio(seconds);
        }
        for _ in 0..3 {
            assert!(h.session.process_next_event().await);
        }

        let starts: Vec<f64> = h.output.scheduled().iter().map(|(_, start, _)| *start).collect();
        assert_eq!(starts.len(), 3);
        assert!((starts[0] - 0.0).abs() < 1e-9);
        assert!((starts[1] - 0.5).abs() < 1e-9);
        assert!((starts[2] - 0.8).abs() < 1e-9);
        assert!((h.session.playback().next_start_time() - 1.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_interruption_mid_playback_cancels_the_rest() {
        let (mut h, remote) = listening().await;
        for seconds in [0.5, 0.3, 0.4] {
            remote.send_audio(seconds);
        }
        for _ in 0..3 {
            h.session.process_next_event().await;
        }

        // Chunk 1 has played; chunk 2 is halfway through
        h.output.set_time(0.65);
        h.output.finish_due();
        assert_eq!(h.session.prune_playback(), 1);

        remote.interrupt();
        h.session.process_next_event().await;
        assert_eq!(h.output.stopped(), vec![2, 3]);
        assert_eq!(h.session.playback().pending_count(), 0);

        h.output.set_time(0.7);
        remote.send_audio(0.2);
        h.session.process_next_event().await;
        let (_, start, _) = *h.output.scheduled().last().unwrap();
        assert!((start - 0.7).abs() < 1e-9, "chunk 4 started at {}", start);

        assert_eq!(h.session.stats().interruptions, 1);
        assert_eq!(h.session.state(), SessionState::Listening);
    }

    #[tokio::test]
    async fn test_bad_chunk_is_dropped_and_session_continues() {
        let (mut h, remote) = listening().await;
        remote.send(ServerEvent::AudioChunk(InboundAudioChunk::new("***")));
        remote.send_audio(0.1);
        h.session.process_next_event().await;
        h.session.process_next_event().await;

        let stats = h.session.stats();
        assert_eq!(stats.chunks_received, 2);
        assert_eq!(stats.chunks_dropped, 1);
        assert_eq!(stats.chunks_scheduled, 1);
        assert!(errors(&drain(&mut h.events)).is_empty());
        assert_eq!(h.session.state(), SessionState::Listening);
    }

    #[tokio::test]
    async fn test_remote_error_keeps_listening() {
        let (mut h, remote) = listening().await;
        remote.transport_error("socket hiccup");
        remote.send(ServerEvent::Error {
            message: "quota".to_string(),
        });
        h.session.process_next_event().await;
        h.session.process_next_event().await;

        let errs = errors(&drain(&mut h.events));
        assert_eq!(errs.len(), 2);
        assert!(errs.iter().all(|(code, _)| *code == "remote_error"));
        assert_eq!(h.session.state(), SessionState::Listening);
    }

    #[tokio::test]
    async fn test_remote_close_ends_the_chat() {
        let (mut h, remote) = listening().await;
        remote.send_audio(0.2);
        remote.close(Some("session expired"));

        h.session.run_until_closed().await;

        assert_eq!(h.session.state(), SessionState::Closed);
        let events = drain(&mut h.events);
        let errs = errors(&events);
        assert_eq!(errs[0].0, "remote_close");
        assert!(errs[0].1.contains("session expired"));
        assert_eq!(states(&events), vec![SessionState::Closed]);
        assert!(!h.mic.is_active());
        assert_eq!(h.session.stats().chunks_scheduled, 1);
    }

    #[tokio::test]
    async fn test_stop_closes_channel_but_lets_playback_finish() {
        let (mut h, mut remote) = listening().await;
        remote.send_audio(0.5);
        h.session.process_next_event().await;

        h.session.stop().await;

        assert_eq!(h.session.state(), SessionState::Closed);
        assert_eq!(
            states(&drain(&mut h.events)),
            vec![SessionState::Stopping, SessionState::Closed]
        );
        assert_eq!(
            remote.drain_outbound(),
            vec![OutboundMessage::AudioStreamEnd, OutboundMessage::Close]
        );
        assert!(!h.mic.is_active());
        assert!(h.output.stopped().is_empty());
        assert_eq!(h.session.playback().pending_count(), 1);

        // Frames after stop go nowhere
        assert!(!h.mic.push_frame(&[0.1; 320]));
    }

    #[tokio::test]
    async fn test_stop_can_cancel_playback_when_configured() {
        let mut config = VoiceConfig::default();
        config.session.stop_cancels_playback = true;
        let mut h = harness_with(MicBehaviour::Grant, FakeConnector::new(8), config);
        h.session.start().await;
        let remote = h.connector.take_remote().unwrap();
        remote.send_audio(0.5);
        h.session.process_next_event().await;

        h.session.stop().await;
        assert_eq!(h.output.stopped(), vec![1]);
    }

    #[tokio::test]
    async fn test_reset_while_recording_changes_nothing() {
        let (mut h, mut remote) = listening().await;
        remote.send_audio(0.5);
        h.session.process_next_event().await;
        let before = h.session.stats();

        h.session.reset().await;

        assert_eq!(h.session.state(), SessionState::Listening);
        assert!(drain(&mut h.events).is_empty());
        assert_eq!(h.session.playback().pending_count(), 1);
        assert_eq!(h.session.stats().chunks_received, before.chunks_received);
        assert!(h.mic.is_active());

        assert!(h.mic.push_frame(&[0.2; 320]));
        assert!(matches!(remote.drain_outbound().as_slice(), [OutboundMessage::Audio(_)]));
    }

    #[tokio::test]
    async fn test_reset_after_stop_allows_a_new_chat() {
        let (mut h, remote) = listening().await;
        remote.send_audio(0.5);
        h.session.process_next_event().await;
        h.session.stop().await;

        h.session.reset().await;
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_eq!(h.session.playback().pending_count(), 0);
        assert_eq!(h.session.stats().chunks_received, 0);

        h.session.start().await;
        assert_eq!(h.session.state(), SessionState::Listening);
        assert_eq!(h.connector.connect_calls(), 2);
    }

    #[tokio::test]
    async fn test_destroy_twice_releases_everything_once() {
        let (mut h, remote) = listening().await;
        remote.send_audio(0.5);
        h.session.process_next_event().await;

        h.session.destroy().await;
        h.session.destroy().await;

        assert!(h.session.is_destroyed());
        assert!(!h.mic.is_active());
        assert!(!h.output.is_open());
        assert_eq!(h.mic.close_calls(), 1);
        assert_eq!(h.output.close_calls(), 1);
        assert_eq!(h.output.stopped(), vec![1]);
        assert_eq!(states(&drain(&mut h.events)), vec![SessionState::Closed]);

        h.session.start().await;
        assert_eq!(h.mic.open_calls(), 1);
    }

    #[tokio::test]
    async fn test_destroy_from_idle_is_safe() {
        let mut h = harness(MicBehaviour::Grant);
        h.session.destroy().await;
        h.session.destroy().await;
        assert!(!h.output.is_open());
        assert_eq!(h.mic.close_calls(), 0);
    }

    #[test]
    fn test_state_labels() {
        assert_eq!(SessionState::RequestingMicrophone.status_text(), "Requesting microphone access...");
        assert!(SessionState::Listening.is_recording());
        assert!(!SessionState::Closed.is_recording());
        assert_eq!(
            serde_json::to_string(&SessionState::RequestingMicrophone).unwrap(),
            "\"requesting_microphone\""
        );
    }

    #[test]
    fn test_audio_chunk_helper_duration() {
        let chunk = audio_chunk(0.25);
        let samples = crate::audio::encoder::decode_pcm16(&chunk.data).unwrap();
        assert_eq!(samples.len(), 6_000);
    }
}
