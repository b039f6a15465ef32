//! Emergency session state machine
//!
//! Handles transitions between Idle, Countdown and Resolved. The coordinator
//! has no clock and performs no side effects of its own: the runner calls
//! [`Coordinator::tick`] once per elapsed second while a countdown is
//! running, takes the [`Dispatch`] queued on resolution, and reports the
//! notifier's result back through [`Coordinator::record_delivery`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::events::AppEvent;

use super::action::{Dispatch, EmergencyAction, NotifyError, TriggerKind, TriggerSource};
use super::EmergencyError;

/// Externally visible state of the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Phase {
    /// No session open
    Idle,
    /// Counting down to the automatic alert
    Countdown { remaining: u32 },
    /// An action fired; waiting for dismissal
    Resolved { action: EmergencyAction },
}

impl Default for Phase {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Idle => write!(f, "Idle"),
            Phase::Countdown { remaining } => write!(f, "Countdown({})", remaining),
            Phase::Resolved { action } => write!(f, "Resolved({})", action),
        }
    }
}

/// Whether the notifier carried out the resolved action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Delivery {
    Pending,
    Delivered,
    Failed { reason: String },
}

/// The single open session
#[derive(Debug, Clone)]
struct Session {
    id: u64,
    source: TriggerSource,
    phase: Phase,
    delivery: Option<Delivery>,
    activated_at: DateTime<Utc>,
}

/// What clients see of the open session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub trigger: String,
    pub source: TriggerKind,
    pub phase: Phase,
    pub countdown: u32,
    pub active: bool,
    pub selected_action: Option<EmergencyAction>,
    pub delivery: Option<Delivery>,
    /// Set once the notifier has answered
    pub outcome: Option<String>,
    pub activated_at: DateTime<Utc>,
}

/// Owns at most one emergency session at a time
pub struct Coordinator {
    countdown_secs: u32,
    session: Option<Session>,
    next_session: u64,
    pending: Option<Dispatch>,
    event_tx: broadcast::Sender<AppEvent>,
}

impl Coordinator {
    pub fn new(countdown_secs: u32, event_tx: broadcast::Sender<AppEvent>) -> Self {
        Self {
            countdown_secs: countdown_secs.max(1),
            session: None,
            next_session: 0,
            pending: None,
            event_tx,
        }
    }

    pub fn phase(&self) -> Phase {
        self.session.as_ref().map_or(Phase::Idle, |s| s.phase)
    }

    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.session.as_ref().map(|s| {
            let (countdown, selected_action) = match s.phase {
                Phase::Countdown { remaining } => (remaining, None),
                Phase::Resolved { action } => (0, Some(action)),
                Phase::Idle => (0, None),
            };
            let outcome = match (selected_action, &s.delivery) {
                (Some(action), Some(Delivery::Delivered)) => Some(action.outcome().to_string()),
                (Some(action), Some(Delivery::Failed { reason })) => {
                    Some(format!("{}: {}", action.failure(), reason))
                }
                _ => None,
            };
            SessionSnapshot {
                trigger: s.source.trigger().to_string(),
                source: s.source.kind(),
                phase: s.phase,
                countdown,
                active: matches!(s.phase, Phase::Countdown { .. }),
                selected_action,
                delivery: s.delivery.clone(),
                outcome,
                activated_at: s.activated_at,
            }
        })
    }

    /// Open a session. Rejected, not queued, while one is already open.
    pub fn trigger(&mut self, source: TriggerSource) -> Result<SessionSnapshot, EmergencyError> {
        if let Some(active) = &self.session {
            warn!(
                trigger = source.trigger(),
                active = active.source.trigger(),
                phase = %active.phase,
                "trigger rejected, session already open"
            );
            let _ = self.event_tx.send(AppEvent::TriggerRejected {
                trigger: source.trigger().to_string(),
            });
            return Err(EmergencyError::SessionActive);
        }

        info!(
            trigger = source.trigger(),
            source = ?source.kind(),
            countdown = self.countdown_secs,
            "emergency session opened"
        );
        let _ = self.event_tx.send(AppEvent::EmergencyTriggered {
            trigger: source.trigger().to_string(),
            source: source.kind(),
            countdown: self.countdown_secs,
        });

        self.next_session += 1;
        self.session = Some(Session {
            id: self.next_session,
            source,
            phase: Phase::Countdown {
                remaining: self.countdown_secs,
            },
            delivery: None,
            activated_at: Utc::now(),
        });
        self.snapshot().ok_or(EmergencyError::NoActiveSession)
    }

    /// One second elapsed. Expiry resolves with [`EmergencyAction::AutoAlert`].
    pub fn tick(&mut self) -> Result<Phase, EmergencyError> {
        let remaining = self.countdown_remaining()?.saturating_sub(1);
        self.set_phase(Phase::Countdown { remaining });

        debug!(remaining, "countdown tick");
        let _ = self.event_tx.send(AppEvent::CountdownTick { remaining });

        if remaining == 0 {
            self.resolve(EmergencyAction::AutoAlert);
        }
        Ok(self.phase())
    }

    /// User picked an action during the countdown
    pub fn select_action(&mut self, action: EmergencyAction) -> Result<Phase, EmergencyError> {
        if !action.is_user_selectable() {
            return Err(EmergencyError::ActionNotSelectable(action));
        }
        self.countdown_remaining()?;
        self.resolve(action);
        Ok(self.phase())
    }

    /// Abandon the countdown; nothing is dispatched
    pub fn cancel(&mut self) -> Result<(), EmergencyError> {
        let remaining = self.countdown_remaining()?;
        if let Some(session) = self.session.take() {
            info!(
                trigger = session.source.trigger(),
                remaining,
                "emergency session cancelled"
            );
            let _ = self.event_tx.send(AppEvent::EmergencyCancelled {
                trigger: session.source.trigger().to_string(),
                remaining,
            });
        }
        Ok(())
    }

    /// Close a resolved session and return to Idle
    pub fn dismiss(&mut self) -> Result<(), EmergencyError> {
        match self.phase() {
            Phase::Resolved { .. } => {
                self.session = None;
                info!("emergency session dismissed");
                let _ = self.event_tx.send(AppEvent::EmergencyDismissed);
                Ok(())
            }
            Phase::Countdown { .. } => Err(EmergencyError::NotResolved),
            Phase::Idle => Err(EmergencyError::NoActiveSession),
        }
    }

    /// The action waiting to be handed to the notifier. Yields each
    /// resolution once.
    pub fn take_dispatch(&mut self) -> Option<Dispatch> {
        self.pending.take()
    }

    /// Notifier result for a dispatched action. A failure is broadcast
    /// even when the session was dismissed in the meantime.
    pub fn record_delivery(&mut self, session: u64, result: Result<(), NotifyError>) {
        let delivery = match &result {
            Ok(()) => Delivery::Delivered,
            Err(e) => Delivery::Failed {
                reason: e.to_string(),
            },
        };

        match &result {
            Ok(()) => info!(session, "emergency action delivered"),
            Err(e) => {
                error!(session, error = %e, "emergency action dispatch failed");
                let _ = self.event_tx.send(AppEvent::PlatformError {
                    feature: "emergency".to_string(),
                    message: e.to_string(),
                });
            }
        }

        match self.session.as_mut() {
            Some(open) if open.id == session => open.delivery = Some(delivery),
            _ => debug!(session, "delivery for a closed session"),
        }
    }

    fn countdown_remaining(&self) -> Result<u32, EmergencyError> {
        match self.phase() {
            Phase::Countdown { remaining } => Ok(remaining),
            Phase::Resolved { .. } => Err(EmergencyError::NotCountingDown),
            Phase::Idle => Err(EmergencyError::NoActiveSession),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if let Some(session) = self.session.as_mut() {
            session.phase = phase;
        }
    }

    /// Move to Resolved and queue the dispatch. Only reachable from
    /// Countdown, so each session is dispatched once.
    fn resolve(&mut self, action: EmergencyAction) {
        let from = self.phase();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.phase = Phase::Resolved { action };
        session.delivery = Some(Delivery::Pending);
        self.pending = Some(Dispatch {
            session: session.id,
            action,
            trigger: session.source.trigger().to_string(),
        });

        info!(from = %from, to = %self.phase(), "emergency session resolved");
        let _ = self.event_tx.send(AppEvent::EmergencyResolved { action });
    }
}
