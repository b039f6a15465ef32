//! Emergency coordination
//!
//! One session at a time moves through:
//! - Idle: no session open
//! - Countdown: triggered, counting down from the configured seconds
//! - Resolved: an action fired (user choice or auto-alert on expiry)
//!
//! Cancelling a countdown returns straight to Idle; dismissing a resolved
//! session does the same.

mod action;
mod coordinator;
mod runner;

pub use action::{EmergencyAction, LoggingNotifier, TriggerKind, TriggerSource};
#[cfg(test)]
pub(crate) use action::{Dispatch, Notifier, NotifyError};
pub use coordinator::{Coordinator, Phase, SessionSnapshot};
#[cfg(test)]
pub(crate) use coordinator::Delivery;
pub use runner::{EmergencyHandle, EmergencyStatus, Runner};

/// Errors from emergency session operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmergencyError {
    #[error("an emergency session is already open")]
    SessionActive,

    #[error("no emergency session is open")]
    NoActiveSession,

    #[error("the countdown is no longer running")]
    NotCountingDown,

    #[error("the session has not been resolved yet")]
    NotResolved,

    #[error("{0} cannot be selected manually")]
    ActionNotSelectable(EmergencyAction),

    #[error("emergency coordinator is not running")]
    Unavailable,
}

impl EmergencyError {
    pub fn code(&self) -> &'static str {
        match self {
            EmergencyError::SessionActive => "session_active",
            EmergencyError::NoActiveSession => "no_active_session",
            EmergencyError::NotCountingDown => "not_counting_down",
            EmergencyError::NotResolved => "not_resolved",
            EmergencyError::ActionNotSelectable(_) => "action_not_selectable",
            EmergencyError::Unavailable => "unavailable",
        }
    }
}
