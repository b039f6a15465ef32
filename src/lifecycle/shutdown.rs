//! Signal handling for graceful shutdown

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::debug;

/// What ended the daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Terminate,
    Interrupt,
    /// A client or component asked for it
    Requested,
}

/// Handles shutdown signals (SIGTERM, SIGINT) and programmatic requests
#[derive(Clone)]
pub struct ShutdownSignal {
    requested: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal handler
    pub fn new() -> Self {
        let (requested, _) = watch::channel(false);
        Self {
            requested: Arc::new(requested),
        }
    }

    /// Ask every waiter to shut down
    pub fn trigger(&self) {
        debug!("shutdown requested");
        self.requested.send_replace(true);
    }

    #[cfg(test)]
    pub fn is_triggered(&self) -> bool {
        *self.requested.borrow()
    }

    /// Wait for a shutdown signal or request
    pub async fn wait(&self) -> std::io::Result<ShutdownReason> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut requested = self.requested.subscribe();

        let reason = tokio::select! {
            _ = sigterm.recv() => {
                debug!("received SIGTERM");
                ShutdownReason::Terminate
            }
            _ = sigint.recv() => {
                debug!("received SIGINT");
                ShutdownReason::Interrupt
            }
            _ = requested.wait_for(|requested| *requested) => ShutdownReason::Requested,
        };
        Ok(reason)
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let shutdown = ShutdownSignal::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };

        tokio::task::yield_now().await;
        assert!(!shutdown.is_triggered());
        shutdown.trigger();

        let reason = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reason, ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn test_trigger_before_wait() {
        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        assert_eq!(shutdown.wait().await.unwrap(), ShutdownReason::Requested);
    }
}
