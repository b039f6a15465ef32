//! Emergency coordinator task
//!
//! Owns the [`Coordinator`] and the one-second countdown timer. The timer
//! only exists while the coordinator is in `Countdown`; every other
//! transition (and dropping the runner) releases it. Resolved actions are
//! handed to the [`Notifier`] on their own task, so a slow location fix
//! never stalls commands, and the result is fed back to the coordinator.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::action::{EmergencyAction, Notifier, NotifyError, TriggerSource};
use super::coordinator::{Coordinator, Phase, SessionSnapshot};
use super::EmergencyError;

type Reply<T> = oneshot::Sender<T>;

const TICK: Duration = Duration::from_secs(1);

/// Notifier result for one session
type Delivered = (u64, Result<(), NotifyError>);

/// Requests handled by the runner
#[derive(Debug)]
pub enum EmergencyCommand {
    Trigger {
        source: TriggerSource,
        reply: Reply<Result<SessionSnapshot, EmergencyError>>,
    },
    SelectAction {
        action: EmergencyAction,
        reply: Reply<Result<Phase, EmergencyError>>,
    },
    Cancel {
        reply: Reply<Result<(), EmergencyError>>,
    },
    Dismiss {
        reply: Reply<Result<(), EmergencyError>>,
    },
    Status {
        reply: Reply<EmergencyStatus>,
    },
}

/// Current phase plus the open session, if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmergencyStatus {
    pub phase: Phase,
    pub session: Option<SessionSnapshot>,
}

pub struct Runner {
    coordinator: Coordinator,
    notifier: Arc<dyn Notifier>,
    ticker: Option<Interval>,
    delivered_tx: mpsc::Sender<Delivered>,
    delivered_rx: mpsc::Receiver<Delivered>,
}

impl Runner {
    pub fn new(coordinator: Coordinator, notifier: Arc<dyn Notifier>) -> Self {
        let (delivered_tx, delivered_rx) = mpsc::channel(8);
        Self {
            coordinator,
            notifier,
            ticker: None,
            delivered_tx,
            delivered_rx,
        }
    }

    /// Run until every [`EmergencyHandle`] is dropped
    pub async fn run(mut self, mut commands: mpsc::Receiver<EmergencyCommand>) {
        info!("emergency coordinator started in Idle state");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = next_tick(&mut self.ticker) => {
                    // the ticker only exists while counting down
                    let _ = self.coordinator.tick();
                }
                Some((session, result)) = self.delivered_rx.recv() => {
                    self.coordinator.record_delivery(session, result);
                }
            }
            self.sync_ticker();
            self.dispatch_pending();
        }

        info!("emergency coordinator stopped");
    }

    fn handle(&mut self, command: EmergencyCommand) {
        match command {
            EmergencyCommand::Trigger { source, reply } => {
                let _ = reply.send(self.coordinator.trigger(source));
            }
            EmergencyCommand::SelectAction { action, reply } => {
                let _ = reply.send(self.coordinator.select_action(action));
            }
            EmergencyCommand::Cancel { reply } => {
                let _ = reply.send(self.coordinator.cancel());
            }
            EmergencyCommand::Dismiss { reply } => {
                let _ = reply.send(self.coordinator.dismiss());
            }
            EmergencyCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn status(&self) -> EmergencyStatus {
        EmergencyStatus {
            phase: self.coordinator.phase(),
            session: self.coordinator.snapshot(),
        }
    }

    fn dispatch_pending(&mut self) {
        let Some(dispatch) = self.coordinator.take_dispatch() else {
            return;
        };
        debug!(session = dispatch.session, action = %dispatch.action, "dispatching emergency action");
        let notifier = Arc::clone(&self.notifier);
        let delivered = self.delivered_tx.clone();
        tokio::spawn(async move {
            let result = notifier.dispatch(&dispatch).await;
            // the runner may already be gone at shutdown
            let _ = delivered.send((dispatch.session, result)).await;
        });
    }

    /// Arm the timer on entering Countdown, release it on leaving
    fn sync_ticker(&mut self) {
        let counting = matches!(self.coordinator.phase(), Phase::Countdown { .. });
        match (counting, self.ticker.is_some()) {
            (true, false) => {
                let mut ticker = tokio::time::interval_at(Instant::now() + TICK, TICK);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                self.ticker = Some(ticker);
                debug!("countdown timer armed");
            }
            (false, true) => {
                self.ticker = None;
                debug!("countdown timer released");
            }
            _ => {}
        }
    }

    #[cfg(test)]
    fn timer_armed(&self) -> bool {
        self.ticker.is_some()
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Cloneable front end for the runner task
#[derive(Clone)]
pub struct EmergencyHandle {
    tx: mpsc::Sender<EmergencyCommand>,
}

impl EmergencyHandle {
    pub fn new(tx: mpsc::Sender<EmergencyCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> EmergencyCommand,
    ) -> Result<T, EmergencyError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EmergencyError::Unavailable)?;
        rx.await.map_err(|_| EmergencyError::Unavailable)
    }

    pub async fn trigger(&self, source: TriggerSource) -> Result<SessionSnapshot, EmergencyError> {
        self.request(|reply| EmergencyCommand::Trigger { source, reply })
            .await?
    }

    pub async fn select_action(&self, action: EmergencyAction) -> Result<Phase, EmergencyError> {
        self.request(|reply| EmergencyCommand::SelectAction { action, reply })
            .await?
    }

    pub async fn cancel(&self) -> Result<(), EmergencyError> {
        self.request(|reply| EmergencyCommand::Cancel { reply }).await?
    }

    pub async fn dismiss(&self) -> Result<(), EmergencyError> {
        self.request(|reply| EmergencyCommand::Dismiss { reply }).await?
    }

    pub async fn status(&self) -> Result<EmergencyStatus, EmergencyError> {
        self.request(|reply| EmergencyCommand::Status { reply }).await
    }
}
