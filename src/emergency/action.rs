//! Emergency actions, trigger sources, and the notifier they dispatch to

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::location::{LocationHandle, LocationSample, TrackerError};

/// What an emergency session ends up doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmergencyAction {
    CallEmergencyNumber,
    SendLocation,
    SilentAlert,
    AlertNetwork,
    /// Fired by countdown expiry; never offered to the user
    AutoAlert,
}

impl EmergencyAction {
    pub fn is_user_selectable(&self) -> bool {
        !matches!(self, EmergencyAction::AutoAlert)
    }

    /// Message shown once the action has fired
    pub fn outcome(&self) -> &'static str {
        match self {
            EmergencyAction::CallEmergencyNumber => "Calling emergency services...",
            EmergencyAction::SendLocation => "Location sent to emergency contacts",
            EmergencyAction::SilentAlert => "Silent alert sent to your safety network",
            EmergencyAction::AlertNetwork => "Emergency contacts have been notified",
            EmergencyAction::AutoAlert => "Automatic emergency alert activated",
        }
    }

    /// Message shown when the notifier could not carry the action out
    pub fn failure(&self) -> &'static str {
        match self {
            EmergencyAction::CallEmergencyNumber => "Could not place the emergency call",
            EmergencyAction::SendLocation => "Could not send your location",
            EmergencyAction::SilentAlert => "Could not send the silent alert",
            EmergencyAction::AlertNetwork => "Could not notify your emergency contacts",
            EmergencyAction::AutoAlert => "Automatic emergency alert failed",
        }
    }
}

impl std::fmt::Display for EmergencyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmergencyAction::CallEmergencyNumber => write!(f, "call-emergency-number"),
            EmergencyAction::SendLocation => write!(f, "send-location"),
            EmergencyAction::SilentAlert => write!(f, "silent-alert"),
            EmergencyAction::AlertNetwork => write!(f, "alert-network"),
            EmergencyAction::AutoAlert => write!(f, "auto-alert"),
        }
    }
}

/// Which kind of source opened a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Voice,
    Manual,
}

/// Where a trigger came from, carrying the string shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSource {
    /// A trigger phrase heard in a final speech segment
    Voice { phrase: String },
    /// A panic button or other explicit UI action
    Manual { label: String },
}

impl TriggerSource {
    pub fn trigger(&self) -> &str {
        match self {
            TriggerSource::Voice { phrase } => phrase,
            TriggerSource::Manual { label } => label,
        }
    }

    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerSource::Voice { .. } => TriggerKind::Voice,
            TriggerSource::Manual { .. } => TriggerKind::Manual,
        }
    }
}

/// A resolved action handed to the notifier
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Session the action belongs to
    pub session: u64,
    pub action: EmergencyAction,
    pub trigger: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("could not get your location: {0}")]
    LocationUnavailable(#[source] TrackerError),
}

/// Side-effecting end of an emergency session
///
/// Called exactly once per resolved session. A real build would dial,
/// text, or page contacts here.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<(), NotifyError>;
}

/// Notifier that only logs what it would have done
pub struct LoggingNotifier {
    emergency_number: String,
    location: watch::Receiver<Option<LocationSample>>,
    locator: LocationHandle,
}

impl LoggingNotifier {
    /// `location` carries the live-tracking sample; `locator` is asked for
    /// a one-shot fix when tracking is off.
    pub fn new(
        emergency_number: String,
        location: watch::Receiver<Option<LocationSample>>,
        locator: LocationHandle,
    ) -> Self {
        Self {
            emergency_number,
            location,
            locator,
        }
    }

    async fn current_location(&self) -> Result<LocationSample, NotifyError> {
        let tracked = self.location.borrow().clone();
        match tracked {
            Some(sample) => Ok(sample),
            None => {
                debug!(target: "notifier", "no live sample, requesting a one-shot fix");
                self.locator
                    .locate()
                    .await
                    .map_err(NotifyError::LocationUnavailable)
            }
        }
    }
}

#[async_trait::async_trait]
impl Notifier for LoggingNotifier {
    async fn dispatch(&self, dispatch: &Dispatch) -> Result<(), NotifyError> {
        let trigger = dispatch.trigger.as_str();
        match dispatch.action {
            EmergencyAction::CallEmergencyNumber => {
                let intent = format!("tel:{}", self.emergency_number);
                warn!(target: "notifier", %intent, trigger, "placing emergency call (simulated)");
            }
            EmergencyAction::SendLocation => {
                let sample = self.current_location().await?;
                warn!(
                    target: "notifier",
                    lat = sample.latitude,
                    lng = sample.longitude,
                    accuracy = sample.accuracy,
                    trigger,
                    "emergency location sent to contacts (simulated)"
                );
            }
            EmergencyAction::SilentAlert => {
                warn!(target: "notifier", trigger, "silent alert sent to emergency contacts (simulated)");
            }
            EmergencyAction::AlertNetwork => {
                let intent = format!(
                    "sms:{}?body=Emergency%20alert%20triggered%20by%20%22{}%22",
                    self.emergency_number, trigger
                );
                warn!(target: "notifier", %intent, "safety network alerted (simulated)");
            }
            EmergencyAction::AutoAlert => {
                warn!(target: "notifier", trigger, "auto emergency alert activated (simulated)");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingConfig;
    use crate::location::LocationTracker;
    use crate::platform::{GeoFailure, GeoMode, SimulatedGeolocation};
    use tokio::sync::{broadcast, mpsc};
    use tokio_test::assert_ok;

    #[test]
    fn test_action_serialization() {
        let json = serde_json::to_string(&EmergencyAction::CallEmergencyNumber).unwrap();
        assert_eq!(json, r#""call-emergency-number""#);
        let parsed: EmergencyAction = serde_json::from_str(r#""alert-network""#).unwrap();
        assert_eq!(parsed, EmergencyAction::AlertNetwork);
    }

    #[test]
    fn test_auto_alert_not_selectable() {
        assert!(!EmergencyAction::AutoAlert.is_user_selectable());
        assert!(EmergencyAction::SendLocation.is_user_selectable());
        assert!(EmergencyAction::SilentAlert.is_user_selectable());
    }

    fn spawn_locator(geo: SimulatedGeolocation) -> LocationHandle {
        let (event_tx, _) = broadcast::channel(16);
        let (sample_tx, _) = watch::channel(None);
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(LocationTracker::new(geo, TrackingConfig::default(), sample_tx, event_tx).run(rx));
        LocationHandle::new(tx)
    }

    fn send_location() -> Dispatch {
        Dispatch {
            session: 1,
            action: EmergencyAction::SendLocation,
            trigger: "help".into(),
        }
    }

    #[tokio::test]
    async fn test_send_location_uses_tracked_sample() {
        let (tx, rx) = watch::channel(None);
        // the locator would fail, so success means the tracked sample was used
        let locator = spawn_locator(SimulatedGeolocation::new((0.0, 0.0)).with_mode(GeoMode::Denied));
        let notifier = LoggingNotifier::new("911".into(), rx, locator);

        tx.send_replace(Some(LocationSample {
            latitude: 1.0,
            longitude: 2.0,
            accuracy: 5.0,
            timestamp: 0,
            address: None,
        }));
        assert_ok!(notifier.dispatch(&send_location()).await);
    }

    #[tokio::test]
    async fn test_send_location_without_tracking_takes_a_fix() {
        let (_tx, rx) = watch::channel(None);
        let locator = spawn_locator(SimulatedGeolocation::new((40.0, -74.0)));
        let notifier = LoggingNotifier::new("911".into(), rx, locator);
        assert_ok!(notifier.dispatch(&send_location()).await);
    }

    #[tokio::test]
    async fn test_send_location_fails_without_fix() {
        let (_tx, rx) = watch::channel(None);
        let locator = spawn_locator(SimulatedGeolocation::new((0.0, 0.0)).with_mode(GeoMode::Denied));
        let notifier = LoggingNotifier::new("911".into(), rx, locator);

        let err = notifier.dispatch(&send_location()).await.unwrap_err();
        assert!(matches!(
            err,
            NotifyError::LocationUnavailable(TrackerError::LocateFailed(GeoFailure::PermissionDenied))
        ));
        assert!(err.to_string().starts_with("could not get your location"));

        // other actions need no location
        let call = Dispatch {
            action: EmergencyAction::CallEmergencyNumber,
            ..send_location()
        };
        assert_ok!(notifier.dispatch(&call).await);
    }

    #[test]
    fn test_trigger_source() {
        let source = TriggerSource::Voice {
            phrase: "help me".into(),
        };
        assert_eq!(source.trigger(), "help me");
        assert_eq!(source.kind(), TriggerKind::Voice);
    }
}
