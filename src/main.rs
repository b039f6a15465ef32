//! haven-daemon: community incident reporting and personal safety core
//!
//! Runs the application behind a local socket and provides:
//! - Emergency sessions: trigger, countdown, action dispatch, dismissal
//! - Voice safety: trigger phrases matched against recognized speech
//! - Live location: position tracking with share links
//! - Community reports, stories and dashboard figures
//!
//! Platform services (speech, geolocation, telephony) are simulated.

mod app;
mod community;
mod config;
mod emergency;
mod events;
mod ipc;
mod lifecycle;
mod location;
mod platform;
mod trigger;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app::AppState;
use crate::community::{Community, MAP_CENTER};
use crate::config::Config;
use crate::emergency::{Coordinator, EmergencyHandle, LoggingNotifier, Runner};
use crate::events::AppEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::location::{LocationHandle, LocationTracker};
use crate::platform::{SimulatedGeolocation, SimulatedSpeech};
use crate::trigger::{VoiceHandle, VoiceListener};

/// How long each actor gets to release its resources on shutdown
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "haven-daemon starting");

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        countdown = config.emergency.countdown_secs,
        speech = ?config.platform.speech,
        geolocation = ?config.platform.geolocation,
        "configuration loaded"
    );

    let community = Community::seeded().context("failed to load seed data")?;
    info!(
        reports = community.reports.len(),
        stories = community.stories.all().len(),
        "community data seeded"
    );

    let shutdown = ShutdownSignal::new();

    // Every component -> subscribed clients and the event log
    let (event_tx, _) = broadcast::channel::<AppEvent>(256);
    // Location tracker -> notifier (latest sample for "send location")
    let (sample_tx, sample_rx) = watch::channel(None);

    // Location tracker over the simulated position source
    let geolocation = SimulatedGeolocation::new(MAP_CENTER)
        .with_mode(config.platform.geolocation)
        .with_fix_delay(config.platform.fix_delay);
    let tracker = LocationTracker::new(
        geolocation,
        config.tracking.clone(),
        sample_tx,
        event_tx.clone(),
    );
    let (location_tx, location_rx) = mpsc::channel(32);
    let location = LocationHandle::new(location_tx);
    let location_task = tokio::spawn(tracker.run(location_rx));

    // Emergency coordinator
    let notifier = Arc::new(LoggingNotifier::new(
        config.emergency.emergency_number.clone(),
        sample_rx,
        location.clone(),
    ));
    let coordinator = Coordinator::new(config.emergency.countdown_secs, event_tx.clone());
    let (emergency_tx, emergency_rx) = mpsc::channel(32);
    let emergency = EmergencyHandle::new(emergency_tx);
    let emergency_task = tokio::spawn(Runner::new(coordinator, notifier).run(emergency_rx));

    // Voice listener over the simulated recognizer
    let (speech, speech_feed, speech_rx) = SimulatedSpeech::new(64);
    let listener = VoiceListener::new(
        speech.with_mode(config.platform.speech),
        speech_rx,
        &config.voice,
        emergency.clone(),
        event_tx.clone(),
    );
    let (voice_tx, voice_rx) = mpsc::channel(32);
    let voice_task = tokio::spawn(listener.run(voice_rx));

    let state = Arc::new(AppState::new(
        community,
        &config.emergency.emergency_number,
        emergency,
        VoiceHandle::new(voice_tx),
        location,
        speech_feed,
        event_tx.clone(),
    ));

    let server = Server::new(&config.socket_path, Arc::clone(&state), shutdown.clone())?;
    let event_rx = event_tx.subscribe();
    drop(event_tx);

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = log_events(event_rx) => {
            info!("event log exited");
        }

        // Wait for shutdown signal
        reason = shutdown.wait() => {
            let reason = reason.context("failed to register signal handlers")?;
            info!(?reason, "shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;
    drop(server);
    // Dropping the last handles ends each actor, which releases its timer,
    // speech session, or location watch on the way out. Voice holds an
    // emergency handle and the notifier holds a location handle, so they
    // stop in this order.
    drop(state);

    for (name, task) in [
        ("voice", voice_task),
        ("emergency", emergency_task),
        ("location", location_task),
    ] {
        join_actor(name, task).await;
    }

    info!("haven-daemon stopped");

    Ok(())
}

async fn log_events(mut events: broadcast::Receiver<AppEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => info!(%event, "event"),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "event log lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn join_actor(name: &str, task: JoinHandle<()>) {
    match tokio::time::timeout(TEARDOWN_GRACE, task).await {
        Ok(Ok(())) => info!(actor = name, "actor stopped"),
        Ok(Err(e)) => error!(actor = name, ?e, "actor panicked"),
        Err(_) => warn!(actor = name, "actor did not stop in time"),
    }
}
