//! Speech recognition service interface and the simulated backend
//!
//! A running recognizer reports results as batches of segments, each either
//! interim (may still change) or final, with a recognition confidence.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{PlatformError, UnknownMode};

/// One recognized chunk of speech
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub transcript: String,
    pub confidence: f32,
    pub is_final: bool,
}

/// Failure reported by a running recognizer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum SpeechFailure {
    /// Microphone access was refused
    #[error("not-allowed")]
    NotAllowed,

    #[error("{0}")]
    Other(String),
}

/// Everything a recognizer session can report
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Started,
    Results(Vec<SpeechSegment>),
    Error(SpeechFailure),
    /// The session terminated, expectedly or not
    Ended,
}

/// Continuous speech recognition
///
/// Results are delivered on the event channel the implementation was built
/// with; these methods only control the session.
pub trait SpeechService: Send + 'static {
    fn is_supported(&self) -> bool;

    /// Ask the host for microphone access
    fn request_permission(&mut self) -> Result<(), PlatformError>;

    fn start(&mut self) -> Result<(), PlatformError>;

    fn stop(&mut self);
}

/// How the simulated host responds to recognizer requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeechMode {
    #[default]
    Available,
    Unsupported,
    /// Microphone permission is refused
    Denied,
}

impl FromStr for SpeechMode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "available" => Ok(SpeechMode::Available),
            "unsupported" => Ok(SpeechMode::Unsupported),
            "denied" => Ok(SpeechMode::Denied),
            other => Err(UnknownMode(other.to_string())),
        }
    }
}

/// Recognizer whose "audio" is text pushed through a [`SpeechFeed`]
pub struct SimulatedSpeech {
    running: Arc<AtomicBool>,
    events_tx: mpsc::Sender<SpeechEvent>,
    supported: bool,
    permission_granted: bool,
}

/// Injection side of [`SimulatedSpeech`]
#[derive(Clone)]
pub struct SpeechFeed {
    running: Arc<AtomicBool>,
    events_tx: mpsc::Sender<SpeechEvent>,
}

impl SimulatedSpeech {
    /// Build the service, its feed, and the receiver results arrive on
    pub fn new(capacity: usize) -> (Self, SpeechFeed, mpsc::Receiver<SpeechEvent>) {
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let running = Arc::new(AtomicBool::new(false));
        let feed = SpeechFeed {
            running: Arc::clone(&running),
            events_tx: events_tx.clone(),
        };
        let service = Self {
            running,
            events_tx,
            supported: true,
            permission_granted: true,
        };
        (service, feed, events_rx)
    }

    pub fn with_mode(mut self, mode: SpeechMode) -> Self {
        self.supported = mode != SpeechMode::Unsupported;
        self.permission_granted = mode != SpeechMode::Denied;
        self
    }
}

impl SpeechService for SimulatedSpeech {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn request_permission(&mut self) -> Result<(), PlatformError> {
        if self.permission_granted {
            Ok(())
        } else {
            Err(PlatformError::PermissionDenied)
        }
    }

    fn start(&mut self) -> Result<(), PlatformError> {
        if !self.supported {
            return Err(PlatformError::Unsupported);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PlatformError::AlreadyRunning);
        }
        info!("simulated speech session started");
        let _ = self.events_tx.try_send(SpeechEvent::Started);
        Ok(())
    }

    fn stop(&mut self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("simulated speech session stopped");
            let _ = self.events_tx.try_send(SpeechEvent::Ended);
        }
    }
}

impl SpeechFeed {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Deliver segments to the recognizer. Dropped when no session is running.
    pub async fn push(&self, segments: Vec<SpeechSegment>) -> bool {
        if !self.is_running() {
            debug!("speech dropped, no session running");
            return false;
        }
        self.events_tx.send(SpeechEvent::Results(segments)).await.is_ok()
    }

    /// Shorthand for a single final segment
    #[cfg(test)]
    pub async fn say(&self, transcript: &str, confidence: f32) -> bool {
        self.push(vec![SpeechSegment {
            transcript: transcript.to_string(),
            confidence,
            is_final: true,
        }])
        .await
    }

    /// Terminate the running session as the host would on a timeout.
    /// Returns false when no session is running.
    pub async fn interrupt(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }
        info!("simulated speech session interrupted");
        self.events_tx.send(SpeechEvent::Ended).await.is_ok()
    }

    /// Report a recognizer error without ending the session.
    /// Returns false when no session is running.
    pub async fn fail(&self, failure: SpeechFailure) -> bool {
        if !self.is_running() {
            debug!(%failure, "speech error dropped, no session running");
            return false;
        }
        self.events_tx.send(SpeechEvent::Error(failure)).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_feed_gated_on_running() {
        let (mut service, feed, mut rx) = SimulatedSpeech::new(8);
        assert!(!feed.say("help", 0.9).await);

        service.start().unwrap();
        assert_eq!(rx.recv().await, Some(SpeechEvent::Started));
        assert!(feed.say("help", 0.9).await);
        assert!(matches!(rx.recv().await, Some(SpeechEvent::Results(_))));

        service.stop();
        assert_eq!(rx.recv().await, Some(SpeechEvent::Ended));
        assert!(!feed.is_running());
    }

    #[test]
    fn test_double_start_rejected() {
        let (mut service, _feed, _rx) = SimulatedSpeech::new(8);
        service.start().unwrap();
        assert_eq!(service.start(), Err(PlatformError::AlreadyRunning));
    }

    #[test]
    fn test_unsupported_and_denied() {
        let (service, _feed, _rx) = SimulatedSpeech::new(8);
        let mut service = service.with_mode(SpeechMode::Unsupported);
        assert!(!service.is_supported());
        assert_eq!(service.start(), Err(PlatformError::Unsupported));

        let (service, _feed, _rx) = SimulatedSpeech::new(8);
        let mut service = service.with_mode(SpeechMode::Denied);
        assert!(service.is_supported());
        assert_eq!(service.request_permission(), Err(PlatformError::PermissionDenied));

        assert_eq!("denied".parse::<SpeechMode>(), Ok(SpeechMode::Denied));
        assert!("muted".parse::<SpeechMode>().is_err());
    }

    #[tokio::test]
    async fn test_end_and_error_need_running_session() {
        let (mut service, feed, mut rx) = SimulatedSpeech::new(8);
        assert!(!feed.interrupt().await);
        assert!(!feed.fail(SpeechFailure::NotAllowed).await);

        service.start().unwrap();
        assert_eq!(rx.recv().await, Some(SpeechEvent::Started));
        assert!(feed.fail(SpeechFailure::Other("network".into())).await);
        assert!(matches!(rx.recv().await, Some(SpeechEvent::Error(_))));

        assert!(feed.interrupt().await);
        assert_eq!(rx.recv().await, Some(SpeechEvent::Ended));
        assert!(!feed.is_running());
    }

    #[test]
    fn test_failure_serialization() {
        let json = serde_json::to_string(&SpeechFailure::NotAllowed).unwrap();
        assert!(json.contains("not-allowed"));
    }
}
