//! # companion-voice - Terminal Voice Chat
//!
//! Talks to the companion through the default microphone and speakers.
//!
//! ## What this binary does:
//! 1. **Loads configuration** from `.env`, `companion.toml` and `COMPANION_*` variables
//! 2. **Sets up logging** (`RUST_LOG`, default `companion_voice=debug`)
//! 3. **Opens the audio devices** and the realtime connection
//! 4. **Runs the voice chat** until the companion hangs up or Ctrl+C is pressed
//!
//! Pass `--list-devices` to print the available devices and exit.

use anyhow::{Context, Result};
use companion_voice::audio::cpal_backend::{CpalInput, CpalOutput};
use companion_voice::audio::device::list_devices;
use companion_voice::audio::AudioGraph;
use companion_voice::{Connector, GeminiLiveConnector, SessionState, VoiceConfig, VoiceEvent, VoiceSession};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Device streams are not `Send`, so the session runs on a single-threaded
/// runtime and is driven directly by `main` instead of a spawned task.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    if std::env::args().any(|arg| arg == "--list-devices") {
        for device in list_devices()? {
            println!(
                "{:<6} {}{}",
                if device.is_input { "input" } else { "output" },
                device.name,
                if device.is_default { " (default)" } else { "" }
            );
        }
        return Ok(());
    }

    let config = VoiceConfig::load().context("failed to load configuration")?;
    config.validate()?;
    if config.endpoint.api_key.is_empty() {
        warn!("No API key configured; set GEMINI_API_KEY or COMPANION_ENDPOINT__API_KEY");
    }

    info!("Starting companion-voice v{}", env!("CARGO_PKG_VERSION"));
    info!(model = %config.endpoint.model, "Configuration loaded");

    let input = CpalInput::new(&config.audio);
    let output = CpalOutput::open(&config.audio)?;
    let graph = AudioGraph::new(input, output).with_gains(config.audio.input_gain, config.audio.output_gain);
    let connector: Arc<dyn Connector> = Arc::new(GeminiLiveConnector::new(&config));

    let (mut session, events) = VoiceSession::new(config, graph, connector);
    info!(session_id = %session.session_id(), "Press Ctrl+C to end the voice chat");
    let printer = tokio::spawn(print_events(events));

    session.start().await;

    if session.state() == SessionState::Listening {
        tokio::select! {
            _ = session.run_until_closed() => {
                info!("Voice chat ended by the companion");
            }
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received, ending voice chat...");
            }
        }
    }

    session.stop().await;
    let stats = session.stats();
    session.destroy().await;

    match serde_json::to_string_pretty(&stats) {
        Ok(json) => info!("Session summary:\n{}", json),
        Err(e) => warn!(error = %e, "Could not render session summary"),
    }

    drop(session);
    let _ = printer.await;
    Ok(())
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` overrides the default filter of `companion_voice=debug`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "companion_voice=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Log session events until the session is dropped.
async fn print_events(mut events: mpsc::UnboundedReceiver<VoiceEvent>) {
    let mut frames: u64 = 0;
    while let Some(event) = events.recv().await {
        match event {
            VoiceEvent::Status { state, text } => info!(state = state.as_str(), "{}", text),
            VoiceEvent::Error { code, message } => error!(code, "{}", message),
            VoiceEvent::AudioLevel(level) => {
                frames += 1;
                // 50 frames per second at 20ms each
                if frames % 50 == 0 {
                    debug!("Microphone level {:.3}", level);
                }
            }
        }
    }
}

/// Resolve when SIGINT or SIGTERM arrives.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
                return;
            }
            _ => warn!("Failed to install signal handlers, falling back to Ctrl+C"),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
