//! Live location tracker actor
//!
//! Start requests one fix, then subscribes to continuous updates. Stop
//! clears the subscription and forgets the sample. The subscription is also
//! cleared when the tracker is dropped, so no watch outlives the daemon.
//! Locate answers with the tracked sample, or a one-shot fix when tracking
//! is off.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::TrackingConfig;
use crate::events::AppEvent;
use crate::platform::{GeoFailure, GeolocationService, Position, PositionOptions, WatchId};

use super::{
    format_duration, generate_share_code, LocationSample, ShareLink, TrackerError,
};

type Reply<T> = oneshot::Sender<T>;

/// Requests handled by the tracker
#[derive(Debug)]
pub enum TrackerCommand {
    Start {
        reply: Reply<Result<TrackingStatus, TrackerError>>,
    },
    Stop {
        reply: Reply<TrackingStatus>,
    },
    Status {
        reply: Reply<TrackingStatus>,
    },
    Share {
        reply: Reply<Result<ShareLink, TrackerError>>,
    },
    Locate {
        reply: Reply<Result<LocationSample, TrackerError>>,
    },
    AddContact {
        contact: String,
        reply: Reply<Result<Vec<String>, TrackerError>>,
    },
    RemoveContact {
        contact: String,
        reply: Reply<Vec<String>>,
    },
    Configure {
        battery_optimized: Option<bool>,
        update_interval_secs: Option<u64>,
        reply: Reply<Result<TrackingStatus, TrackerError>>,
    },
}

/// Snapshot of the live-location panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingStatus {
    pub supported: bool,
    pub tracking: bool,
    pub current: Option<LocationSample>,
    pub share_code: Option<String>,
    pub error: Option<String>,
    pub duration_secs: u64,
    pub duration: String,
    pub battery_optimized: bool,
    pub update_interval_secs: u64,
    pub trusted_contacts: Vec<String>,
}

/// Owns the geolocation service and all tracking state
pub struct LocationTracker<G: GeolocationService> {
    geo: G,
    settings: TrackingConfig,
    current: Option<LocationSample>,
    share_code: Option<String>,
    error: Option<String>,
    started_at: Option<Instant>,
    watch_id: Option<WatchId>,
    updates: Option<mpsc::Receiver<Result<Position, GeoFailure>>>,
    trusted_contacts: Vec<String>,
    sample_tx: watch::Sender<Option<LocationSample>>,
    event_tx: broadcast::Sender<AppEvent>,
}

impl<G: GeolocationService> LocationTracker<G> {
    pub fn new(
        geo: G,
        settings: TrackingConfig,
        sample_tx: watch::Sender<Option<LocationSample>>,
        event_tx: broadcast::Sender<AppEvent>,
    ) -> Self {
        Self {
            geo,
            settings,
            current: None,
            share_code: None,
            error: None,
            started_at: None,
            watch_id: None,
            updates: None,
            trusted_contacts: Vec::new(),
            sample_tx,
            event_tx,
        }
    }

    /// Process commands and position updates until every handle is dropped
    pub async fn run(mut self, mut commands: mpsc::Receiver<TrackerCommand>) {
        info!(supported = self.geo.is_supported(), "location tracker started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                update = next_update(&mut self.updates) => match update {
                    Some(update) => self.on_update(update),
                    None => self.updates = None,
                },
            }
        }

        self.stop_tracking();
        info!("location tracker stopped");
    }

    async fn handle(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Start { reply } => {
                let result = self.start_tracking().await;
                let _ = reply.send(result.map(|()| self.status()));
            }
            TrackerCommand::Stop { reply } => {
                self.stop_tracking();
                let _ = reply.send(self.status());
            }
            TrackerCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
            TrackerCommand::Share { reply } => {
                let _ = reply.send(self.share_link());
            }
            TrackerCommand::Locate { reply } => {
                let result = self.locate().await;
                let _ = reply.send(result);
            }
            TrackerCommand::AddContact { contact, reply } => {
                let _ = reply.send(self.add_contact(&contact));
            }
            TrackerCommand::RemoveContact { contact, reply } => {
                let contact = contact.trim();
                self.trusted_contacts.retain(|c| c != contact);
                let _ = reply.send(self.trusted_contacts.clone());
            }
            TrackerCommand::Configure {
                battery_optimized,
                update_interval_secs,
                reply,
            } => {
                let _ = reply.send(
                    self.configure(battery_optimized, update_interval_secs)
                        .map(|()| self.status()),
                );
            }
        }
    }

    async fn start_tracking(&mut self) -> Result<(), TrackerError> {
        if !self.geo.is_supported() {
            self.error = Some("Geolocation is not supported on this host".to_string());
            return Err(TrackerError::Unsupported);
        }
        if self.watch_id.is_some() {
            return Err(TrackerError::AlreadyTracking);
        }

        let battery = self.settings.battery_optimized;
        let position = match self.one_shot_fix().await? {
            Ok(position) => position,
            Err(failure) => {
                let err = TrackerError::StartFailed(failure);
                warn!(error = %err, "tracking start failed");
                self.error = Some(err.to_string());
                self.emit_platform_error(err.to_string());
                return Err(err);
            }
        };

        let share_code = generate_share_code(&mut rand::rng());
        self.share_code = Some(share_code.clone());
        self.error = None;
        self.started_at = Some(Instant::now());

        let (updates_tx, updates_rx) = mpsc::channel(16);
        let interval = Duration::from_secs(self.settings.update_interval_secs);
        self.watch_id = Some(
            self.geo
                .watch_position(PositionOptions::for_watch(battery, interval), updates_tx),
        );
        self.updates = Some(updates_rx);

        info!(%share_code, battery_optimized = battery, "live tracking started");
        let _ = self.event_tx.send(AppEvent::TrackingStarted { share_code });
        self.publish(LocationSample::from_position(position));
        Ok(())
    }

    /// Ask the host for a single fix with the current battery setting
    async fn one_shot_fix(&mut self) -> Result<Result<Position, GeoFailure>, TrackerError> {
        self.geo
            .current_position(PositionOptions::for_fix(self.settings.battery_optimized))
            .await
            .map_err(|_| TrackerError::FixDropped)
    }

    async fn locate(&mut self) -> Result<LocationSample, TrackerError> {
        if let Some(sample) = &self.current {
            return Ok(sample.clone());
        }
        if !self.geo.is_supported() {
            return Err(TrackerError::Unsupported);
        }
        match self.one_shot_fix().await? {
            Ok(position) => {
                let sample = LocationSample::from_position(position);
                debug!(lat = sample.latitude, lng = sample.longitude, "one-shot fix");
                Ok(sample)
            }
            Err(failure) => {
                warn!(error = %failure, "one-shot fix failed");
                Err(TrackerError::LocateFailed(failure))
            }
        }
    }

    fn stop_tracking(&mut self) {
        if let Some(id) = self.watch_id.take() {
            self.geo.clear_watch(id);
        }
        let was_tracking = self.started_at.take().is_some();
        self.updates = None;
        self.current = None;
        self.share_code = None;
        self.error = None;
        self.sample_tx.send_replace(None);

        if was_tracking {
            info!("live tracking stopped");
            let _ = self.event_tx.send(AppEvent::TrackingStopped);
        }
    }

    fn on_update(&mut self, update: Result<Position, GeoFailure>) {
        if self.watch_id.is_none() {
            return;
        }
        match update {
            Ok(position) => self.publish(LocationSample::from_position(position)),
            Err(failure) => {
                let message = format!("Tracking error: {failure}");
                warn!(%message, "location update failed");
                self.error = Some(message.clone());
                self.emit_platform_error(message);
            }
        }
    }

    /// Replace the held sample and forward it to listeners
    fn publish(&mut self, sample: LocationSample) {
        debug!(lat = sample.latitude, lng = sample.longitude, "location sample");
        self.current = Some(sample.clone());
        self.sample_tx.send_replace(Some(sample.clone()));
        let _ = self.event_tx.send(AppEvent::LocationUpdated { sample });
    }

    fn emit_platform_error(&self, message: String) {
        let _ = self.event_tx.send(AppEvent::PlatformError {
            feature: "location".to_string(),
            message,
        });
    }

    fn share_link(&self) -> Result<ShareLink, TrackerError> {
        match (&self.current, &self.share_code) {
            (Some(_), Some(code)) => Ok(ShareLink::new(&self.settings.share_origin, code)),
            _ => Err(TrackerError::NotTracking),
        }
    }

    fn add_contact(&mut self, contact: &str) -> Result<Vec<String>, TrackerError> {
        let contact = contact.trim();
        if contact.is_empty() {
            return Err(TrackerError::EmptyContact);
        }
        if self.trusted_contacts.iter().any(|c| c == contact) {
            return Err(TrackerError::DuplicateContact(contact.to_string()));
        }
        self.trusted_contacts.push(contact.to_string());
        Ok(self.trusted_contacts.clone())
    }

    /// Applies from the next start; a running watch keeps its options
    fn configure(
        &mut self,
        battery_optimized: Option<bool>,
        update_interval_secs: Option<u64>,
    ) -> Result<(), TrackerError> {
        if update_interval_secs == Some(0) {
            return Err(TrackerError::InvalidInterval);
        }
        if let Some(battery) = battery_optimized {
            self.settings.battery_optimized = battery;
        }
        if let Some(secs) = update_interval_secs {
            self.settings.update_interval_secs = secs;
        }
        Ok(())
    }

    fn status(&self) -> TrackingStatus {
        let duration_secs = self
            .started_at
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);
        TrackingStatus {
            supported: self.geo.is_supported(),
            tracking: self.watch_id.is_some(),
            current: self.current.clone(),
            share_code: self.share_code.clone(),
            error: self.error.clone(),
            duration_secs,
            duration: format_duration(duration_secs),
            battery_optimized: self.settings.battery_optimized,
            update_interval_secs: self.settings.update_interval_secs,
            trusted_contacts: self.trusted_contacts.clone(),
        }
    }
}

async fn next_update(
    updates: &mut Option<mpsc::Receiver<Result<Position, GeoFailure>>>,
) -> Option<Result<Position, GeoFailure>> {
    match updates {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Cloneable front end for the tracker task
#[derive(Clone)]
pub struct LocationHandle {
    tx: mpsc::Sender<TrackerCommand>,
}

impl LocationHandle {
    pub fn new(tx: mpsc::Sender<TrackerCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> TrackerCommand,
    ) -> Result<T, TrackerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| TrackerError::Unavailable)?;
        rx.await.map_err(|_| TrackerError::Unavailable)
    }

    pub async fn start(&self) -> Result<TrackingStatus, TrackerError> {
        self.request(|reply| TrackerCommand::Start { reply }).await?
    }

    pub async fn stop(&self) -> Result<TrackingStatus, TrackerError> {
        self.request(|reply| TrackerCommand::Stop { reply }).await
    }

    pub async fn status(&self) -> Result<TrackingStatus, TrackerError> {
        self.request(|reply| TrackerCommand::Status { reply }).await
    }

    pub async fn share(&self) -> Result<ShareLink, TrackerError> {
        self.request(|reply| TrackerCommand::Share { reply }).await?
    }

    /// Tracked sample, or a one-shot fix when tracking is off
    pub async fn locate(&self) -> Result<LocationSample, TrackerError> {
        self.request(|reply| TrackerCommand::Locate { reply }).await?
    }

    pub async fn add_contact(&self, contact: String) -> Result<Vec<String>, TrackerError> {
        self.request(|reply| TrackerCommand::AddContact { contact, reply })
            .await?
    }

    pub async fn remove_contact(&self, contact: String) -> Result<Vec<String>, TrackerError> {
        self.request(|reply| TrackerCommand::RemoveContact { contact, reply })
            .await
    }

    pub async fn configure(
        &self,
        battery_optimized: Option<bool>,
        update_interval_secs: Option<u64>,
    ) -> Result<TrackingStatus, TrackerError> {
        self.request(|reply| TrackerCommand::Configure {
            battery_optimized,
            update_interval_secs,
            reply,
        })
        .await?
    }
}
