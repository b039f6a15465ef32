//! Events module for everything subscribers may want pushed to them
//!
//! Covers emergency session transitions, voice trigger detection, live
//! location updates and community activity.

use serde::{Deserialize, Serialize};

use crate::community::Severity;
use crate::emergency::{EmergencyAction, TriggerKind};
use crate::location::LocationSample;

/// Events broadcast by the daemon's components
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppEvent {
    /// A trigger opened a new emergency session
    EmergencyTriggered {
        trigger: String,
        source: TriggerKind,
        countdown: u32,
    },

    /// One second elapsed in the countdown
    CountdownTick { remaining: u32 },

    /// An action fired, chosen by the user or by countdown expiry
    EmergencyResolved { action: EmergencyAction },

    /// The user cancelled before any action fired
    EmergencyCancelled { trigger: String, remaining: u32 },

    /// The resolved session was closed
    EmergencyDismissed,

    /// A trigger arrived while a session was already open
    TriggerRejected { trigger: String },

    /// A final speech segment contained a trigger phrase
    TriggerDetected { phrase: String, confidence: f32 },

    /// The speech session is listening
    VoiceListening,

    /// Voice safety was switched off
    VoiceStopped,

    /// Voice safety was forced off by the host
    VoiceDisabled { reason: String },

    /// Live tracking began
    TrackingStarted { share_code: String },

    /// A new position replaced the previous one
    LocationUpdated { sample: LocationSample },

    /// Live tracking ended and the sample was discarded
    TrackingStopped,

    /// A platform error surfaced in the voice or location panel
    PlatformError { feature: String, message: String },

    ReportSubmitted { id: u64, severity: Severity },

    StoryLiked { story_id: u64, likes: u32 },

    CommentLiked {
        story_id: u64,
        comment_id: u64,
        likes: u32,
    },

    CommentAdded { story_id: u64, comment_id: u64 },
}

impl std::fmt::Display for AppEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppEvent::EmergencyTriggered { trigger, countdown, .. } => {
                write!(f, "EMERGENCY_TRIGGERED (\"{}\", {}s)", trigger, countdown)
            }
            AppEvent::CountdownTick { remaining } => write!(f, "COUNTDOWN_TICK ({})", remaining),
            AppEvent::EmergencyResolved { action } => write!(f, "EMERGENCY_RESOLVED ({})", action),
            AppEvent::EmergencyCancelled { remaining, .. } => {
                write!(f, "EMERGENCY_CANCELLED ({}s left)", remaining)
            }
            AppEvent::EmergencyDismissed => write!(f, "EMERGENCY_DISMISSED"),
            AppEvent::TriggerRejected { trigger } => write!(f, "TRIGGER_REJECTED (\"{}\")", trigger),
            AppEvent::TriggerDetected { phrase, .. } => write!(f, "TRIGGER_DETECTED (\"{}\")", phrase),
            AppEvent::VoiceListening => write!(f, "VOICE_LISTENING"),
            AppEvent::VoiceStopped => write!(f, "VOICE_STOPPED"),
            AppEvent::VoiceDisabled { reason } => write!(f, "VOICE_DISABLED ({})", reason),
            AppEvent::TrackingStarted { share_code } => write!(f, "TRACKING_STARTED ({})", share_code),
            AppEvent::LocationUpdated { sample } => write!(
                f,
                "LOCATION_UPDATED ({:.4}, {:.4})",
                sample.latitude, sample.longitude
            ),
            AppEvent::TrackingStopped => write!(f, "TRACKING_STOPPED"),
            AppEvent::PlatformError { feature, message } => {
                write!(f, "PLATFORM_ERROR ({}: {})", feature, message)
            }
            AppEvent::ReportSubmitted { id, .. } => write!(f, "REPORT_SUBMITTED ({})", id),
            AppEvent::StoryLiked { story_id, .. } => write!(f, "STORY_LIKED ({})", story_id),
            AppEvent::CommentLiked { comment_id, .. } => write!(f, "COMMENT_LIKED ({})", comment_id),
            AppEvent::CommentAdded { comment_id, .. } => write!(f, "COMMENT_ADDED ({})", comment_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = AppEvent::EmergencyResolved {
            action: EmergencyAction::AutoAlert,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("emergency_resolved"));
        assert!(json.contains("auto-alert"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"countdown_tick","remaining":7}"#;
        let event: AppEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event, AppEvent::CountdownTick { remaining: 7 });
    }

    #[test]
    fn test_display() {
        let event = AppEvent::TriggerRejected {
            trigger: "help".into(),
        };
        assert_eq!(event.to_string(), "TRIGGER_REJECTED (\"help\")");
    }
}
