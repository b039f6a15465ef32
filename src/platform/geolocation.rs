//! Geolocation service interface and the simulated backend

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::UnknownMode;

/// A single position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub accuracy: f64,
    /// Unix milliseconds
    pub timestamp: i64,
}

/// Failure reported for a fix or a watch update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GeoFailure {
    #[error("User denied Geolocation")]
    PermissionDenied,

    #[error("Position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("Timeout expired")]
    Timeout,
}

/// Accuracy, timeout and cache-age knobs for a position request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    /// Oldest cached fix the host may hand back
    pub maximum_age: Duration,
}

impl PositionOptions {
    /// Options for the initial one-shot fix
    pub fn for_fix(battery_optimized: bool) -> Self {
        Self {
            high_accuracy: !battery_optimized,
            timeout: Duration::from_secs(10),
            maximum_age: if battery_optimized {
                Duration::from_secs(60)
            } else {
                Duration::ZERO
            },
        }
    }

    /// Options for the continuous subscription
    pub fn for_watch(battery_optimized: bool, update_interval: Duration) -> Self {
        Self {
            high_accuracy: !battery_optimized,
            timeout: Duration::from_secs(15),
            maximum_age: if battery_optimized {
                update_interval
            } else {
                Duration::ZERO
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub u64);

/// Position queries and continuous subscriptions
pub trait GeolocationService: Send + 'static {
    fn is_supported(&self) -> bool;

    /// One-shot fix, resolved on the returned receiver
    fn current_position(
        &mut self,
        options: PositionOptions,
    ) -> oneshot::Receiver<Result<Position, GeoFailure>>;

    /// Subscribe to updates until [`clear_watch`](Self::clear_watch)
    fn watch_position(
        &mut self,
        options: PositionOptions,
        updates: mpsc::Sender<Result<Position, GeoFailure>>,
    ) -> WatchId;

    fn clear_watch(&mut self, id: WatchId);
}

/// How the simulated host answers position requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeoMode {
    #[default]
    Available,
    /// No geolocation capability at all
    Unsupported,
    /// The user refused location access
    Denied,
    /// Capability present but no fix can be obtained
    NoSignal,
}

impl FromStr for GeoMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(GeoMode::Available),
            "unsupported" => Ok(GeoMode::Unsupported),
            "denied" => Ok(GeoMode::Denied),
            "no-signal" => Ok(GeoMode::NoSignal),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Host stand-in that walks slowly around a base point
pub struct SimulatedGeolocation {
    base: (f64, f64),
    mode: GeoMode,
    /// Time the host takes to produce a fix
    fix_delay: Duration,
    next_watch: u64,
    watches: HashMap<WatchId, JoinHandle<()>>,
}

fn accuracy_for(options: &PositionOptions) -> f64 {
    if options.high_accuracy {
        5.0
    } else {
        50.0
    }
}

fn drifted(base: (f64, f64), step: u64, accuracy: f64) -> Position {
    let t = step as f64 * 0.3;
    Position {
        latitude: base.0 + 0.0005 * t.sin(),
        longitude: base.1 + 0.0005 * t.cos(),
        accuracy,
        timestamp: Utc::now().timestamp_millis(),
    }
}

/// What the host reports for a request, before any delay
fn answer(mode: GeoMode, base: (f64, f64), step: u64, accuracy: f64) -> Result<Position, GeoFailure> {
    match mode {
        GeoMode::Available => Ok(drifted(base, step, accuracy)),
        GeoMode::Denied => Err(GeoFailure::PermissionDenied),
        GeoMode::Unsupported | GeoMode::NoSignal => Err(GeoFailure::PositionUnavailable(
            "no position source available".to_string(),
        )),
    }
}

/// Wait out the fix delay, giving up once the request's timeout passes
async fn delayed(
    answer: Result<Position, GeoFailure>,
    fix_delay: Duration,
    timeout: Duration,
) -> Result<Position, GeoFailure> {
    if answer.is_err() {
        return answer;
    }
    if fix_delay > timeout {
        tokio::time::sleep(timeout).await;
        return Err(GeoFailure::Timeout);
    }
    tokio::time::sleep(fix_delay).await;
    answer
}

impl SimulatedGeolocation {
    pub fn new(base: (f64, f64)) -> Self {
        Self {
            base,
            mode: GeoMode::Available,
            fix_delay: Duration::ZERO,
            next_watch: 0,
            watches: HashMap::new(),
        }
    }

    pub fn with_mode(mut self, mode: GeoMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_fix_delay(mut self, fix_delay: Duration) -> Self {
        self.fix_delay = fix_delay;
        self
    }

    #[cfg(test)]
    fn active_watches(&self) -> usize {
        self.watches.len()
    }
}

impl GeolocationService for SimulatedGeolocation {
    fn is_supported(&self) -> bool {
        self.mode != GeoMode::Unsupported
    }

    fn current_position(
        &mut self,
        options: PositionOptions,
    ) -> oneshot::Receiver<Result<Position, GeoFailure>> {
        let (tx, rx) = oneshot::channel();
        let answer = answer(self.mode, self.base, 0, accuracy_for(&options));
        if answer.is_err() || self.fix_delay.is_zero() {
            let _ = tx.send(answer);
            return rx;
        }

        let fix_delay = self.fix_delay;
        tokio::spawn(async move {
            let _ = tx.send(delayed(answer, fix_delay, options.timeout).await);
        });
        rx
    }

    fn watch_position(
        &mut self,
        options: PositionOptions,
        updates: mpsc::Sender<Result<Position, GeoFailure>>,
    ) -> WatchId {
        self.next_watch += 1;
        let id = WatchId(self.next_watch);
        let base = self.base;
        let mode = self.mode;
        let fix_delay = self.fix_delay;
        let period = options.maximum_age.max(Duration::from_secs(1));
        let accuracy = accuracy_for(&options);

        let handle = tokio::spawn(async move {
            if mode == GeoMode::Denied {
                let _ = updates.send(Err(GeoFailure::PermissionDenied)).await;
                return;
            }
            let mut ticker = tokio::time::interval(period);
            let mut step = 1;
            loop {
                ticker.tick().await;
                let update = delayed(answer(mode, base, step, accuracy), fix_delay, options.timeout).await;
                if updates.send(update).await.is_err() {
                    debug!("watch receiver dropped");
                    break;
                }
                step += 1;
            }
        });

        info!(watch = id.0, ?period, ?mode, "position watch registered");
        self.watches.insert(id, handle);
        id
    }

    fn clear_watch(&mut self, id: WatchId) {
        if let Some(handle) = self.watches.remove(&id) {
            handle.abort();
            info!(watch = id.0, "position watch cleared");
        }
    }
}

impl Drop for SimulatedGeolocation {
    fn drop(&mut self) {
        for (_, handle) in self.watches.drain() {
            handle.abort();
        }
    }
}
