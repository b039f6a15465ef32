//! Voice safety listener
//!
//! Consumes speech recognition events, matches final segments against the
//! trigger phrases, and opens an emergency session on a match. While voice
//! safety is enabled the recognizer is restarted whenever it ends.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::VoiceConfig;
use crate::emergency::{EmergencyError, EmergencyHandle, TriggerSource};
use crate::events::AppEvent;
use crate::platform::{PlatformError, SpeechEvent, SpeechFailure, SpeechSegment, SpeechService};

use super::phrases::{clamp_sensitivity, normalize_utterance, TriggerPhrases};
use super::VoiceError;

type Reply<T> = oneshot::Sender<T>;

/// How long a detection notice stays in the transcript
const DETECTION_NOTICE: Duration = Duration::from_secs(3);

const MIC_DENIED: &str =
    "Microphone access denied. Enable microphone permissions for voice safety features.";

/// Requests handled by the listener
#[derive(Debug)]
pub enum VoiceCommand {
    Enable {
        reply: Reply<Result<VoiceStatus, VoiceError>>,
    },
    Disable {
        reply: Reply<VoiceStatus>,
    },
    AddPhrase {
        phrase: String,
        reply: Reply<Result<VoiceStatus, VoiceError>>,
    },
    RemovePhrase {
        phrase: String,
        reply: Reply<VoiceStatus>,
    },
    SetSensitivity {
        value: f32,
        reply: Reply<VoiceStatus>,
    },
    Status {
        reply: Reply<VoiceStatus>,
    },
}

/// Snapshot of the voice safety panel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceStatus {
    pub supported: bool,
    pub enabled: bool,
    pub listening: bool,
    pub transcript: String,
    pub confidence: f32,
    pub sensitivity: f32,
    pub default_phrases: Vec<String>,
    pub custom_phrases: Vec<String>,
    pub last_error: Option<String>,
}

pub struct VoiceListener<S: SpeechService> {
    service: S,
    speech_rx: mpsc::Receiver<SpeechEvent>,
    phrases: TriggerPhrases,
    sensitivity: f32,
    restart_delay: Duration,
    enabled: bool,
    listening: bool,
    transcript: String,
    confidence: f32,
    last_error: Option<String>,
    restart_at: Option<Instant>,
    clear_at: Option<Instant>,
    emergency: EmergencyHandle,
    event_tx: broadcast::Sender<AppEvent>,
}

impl<S: SpeechService> VoiceListener<S> {
    pub fn new(
        service: S,
        speech_rx: mpsc::Receiver<SpeechEvent>,
        config: &VoiceConfig,
        emergency: EmergencyHandle,
        event_tx: broadcast::Sender<AppEvent>,
    ) -> Self {
        Self {
            service,
            speech_rx,
            phrases: TriggerPhrases::with_custom(config.custom_phrases.iter().cloned()),
            sensitivity: clamp_sensitivity(config.sensitivity),
            restart_delay: config.restart_delay,
            enabled: false,
            listening: false,
            transcript: String::new(),
            confidence: 0.0,
            last_error: None,
            restart_at: None,
            clear_at: None,
            emergency,
            event_tx,
        }
    }

    /// Run until every [`VoiceHandle`] is dropped
    pub async fn run(mut self, mut commands: mpsc::Receiver<VoiceCommand>) {
        info!(supported = self.service.is_supported(), "voice listener started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                Some(event) = self.speech_rx.recv() => self.on_speech(event).await,
                _ = wait_until(self.restart_at) => self.restart(),
                _ = wait_until(self.clear_at) => {
                    self.clear_at = None;
                    self.transcript.clear();
                }
            }
        }

        self.service.stop();
        info!("voice listener stopped");
    }

    fn handle(&mut self, command: VoiceCommand) {
        match command {
            VoiceCommand::Enable { reply } => {
                let _ = reply.send(self.enable().map(|()| self.status()));
            }
            VoiceCommand::Disable { reply } => {
                self.disable();
                let _ = reply.send(self.status());
            }
            VoiceCommand::AddPhrase { phrase, reply } => {
                let _ = reply.send(self.phrases.add_custom(&phrase).map(|()| self.status()));
            }
            VoiceCommand::RemovePhrase { phrase, reply } => {
                self.phrases.remove_custom(&phrase);
                let _ = reply.send(self.status());
            }
            VoiceCommand::SetSensitivity { value, reply } => {
                self.sensitivity = clamp_sensitivity(value);
                debug!(sensitivity = self.sensitivity, "sensitivity updated");
                let _ = reply.send(self.status());
            }
            VoiceCommand::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn enable(&mut self) -> Result<(), VoiceError> {
        if !self.service.is_supported() {
            return Err(VoiceError::Unsupported);
        }
        if self.enabled {
            return Ok(());
        }
        if let Err(e) = self.service.request_permission() {
            self.force_disable(MIC_DENIED);
            return Err(e.into());
        }
        match self.service.start() {
            Ok(()) | Err(PlatformError::AlreadyRunning) => {}
            Err(e) => return Err(e.into()),
        }
        self.enabled = true;
        self.last_error = None;
        info!("voice safety enabled");
        Ok(())
    }

    fn disable(&mut self) {
        let was_enabled = self.enabled;
        self.enabled = false;
        self.restart_at = None;
        self.service.stop();
        if was_enabled {
            info!("voice safety disabled");
            let _ = self.event_tx.send(AppEvent::VoiceStopped);
        }
    }

    fn force_disable(&mut self, reason: &str) {
        self.enabled = false;
        self.listening = false;
        self.restart_at = None;
        self.service.stop();
        self.last_error = Some(reason.to_string());
        warn!(reason, "voice safety force-disabled");
        let _ = self.event_tx.send(AppEvent::VoiceDisabled {
            reason: reason.to_string(),
        });
    }

    fn restart(&mut self) {
        self.restart_at = None;
        if !self.enabled {
            return;
        }
        match self.service.start() {
            Ok(()) => debug!("speech session restarted"),
            Err(PlatformError::AlreadyRunning) => {}
            Err(e) => {
                warn!(error = %e, "speech restart failed");
                self.last_error = Some(format!("Recognition restart failed: {e}"));
            }
        }
    }

    async fn on_speech(&mut self, event: SpeechEvent) {
        match event {
            SpeechEvent::Started => {
                self.listening = true;
                let _ = self.event_tx.send(AppEvent::VoiceListening);
            }
            SpeechEvent::Ended => {
                self.listening = false;
                if self.enabled {
                    debug!(delay = ?self.restart_delay, "speech session ended, scheduling restart");
                    self.restart_at = Some(Instant::now() + self.restart_delay);
                }
            }
            SpeechEvent::Error(SpeechFailure::NotAllowed) => self.force_disable(MIC_DENIED),
            SpeechEvent::Error(SpeechFailure::Other(message)) => {
                warn!(%message, "speech recognition error");
                self.last_error = Some(message.clone());
                let _ = self.event_tx.send(AppEvent::PlatformError {
                    feature: "voice".to_string(),
                    message,
                });
            }
            SpeechEvent::Results(segments) => self.on_results(segments).await,
        }
    }

    async fn on_results(&mut self, segments: Vec<SpeechSegment>) {
        let (finals, interims): (Vec<_>, Vec<_>) = segments.iter().partition(|s| s.is_final);
        let final_text = normalize_utterance(
            &finals.iter().map(|s| s.transcript.as_str()).collect::<Vec<_>>().join(" "),
        );
        let interim_text = normalize_utterance(
            &interims.iter().map(|s| s.transcript.as_str()).collect::<Vec<_>>().join(" "),
        );

        if final_text.is_empty() {
            self.transcript = interim_text;
            return;
        }

        let confidence = finals.first().map_or(0.0, |s| s.confidence);
        self.confidence = confidence;
        self.transcript = final_text.clone();

        let Some(phrase) = self
            .phrases
            .find_trigger(&final_text, confidence, self.sensitivity)
            .map(str::to_string)
        else {
            return;
        };

        info!(%phrase, confidence, "trigger phrase detected");
        self.transcript = format!("TRIGGER DETECTED: \"{phrase}\"");
        self.clear_at = Some(Instant::now() + DETECTION_NOTICE);
        let _ = self.event_tx.send(AppEvent::TriggerDetected {
            phrase: phrase.clone(),
            confidence,
        });

        match self.emergency.trigger(TriggerSource::Voice { phrase }).await {
            Ok(_) => {}
            Err(EmergencyError::SessionActive) => debug!("emergency already open"),
            Err(e) => warn!(error = %e, "could not open emergency session"),
        }
    }

    fn status(&self) -> VoiceStatus {
        VoiceStatus {
            supported: self.service.is_supported(),
            enabled: self.enabled,
            listening: self.listening,
            transcript: self.transcript.clone(),
            confidence: self.confidence,
            sensitivity: self.sensitivity,
            default_phrases: self.phrases.defaults().to_vec(),
            custom_phrases: self.phrases.custom().to_vec(),
            last_error: self.last_error.clone(),
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable front end for the listener task
#[derive(Clone)]
pub struct VoiceHandle {
    tx: mpsc::Sender<VoiceCommand>,
}

impl VoiceHandle {
    pub fn new(tx: mpsc::Sender<VoiceCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> VoiceCommand) -> Result<T, VoiceError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| VoiceError::Unavailable)?;
        rx.await.map_err(|_| VoiceError::Unavailable)
    }

    pub async fn enable(&self) -> Result<VoiceStatus, VoiceError> {
        self.request(|reply| VoiceCommand::Enable { reply }).await?
    }

    pub async fn disable(&self) -> Result<VoiceStatus, VoiceError> {
        self.request(|reply| VoiceCommand::Disable { reply }).await
    }

    pub async fn add_phrase(&self, phrase: String) -> Result<VoiceStatus, VoiceError> {
        self.request(|reply| VoiceCommand::AddPhrase { phrase, reply })
            .await?
    }

    pub async fn remove_phrase(&self, phrase: String) -> Result<VoiceStatus, VoiceError> {
        self.request(|reply| VoiceCommand::RemovePhrase { phrase, reply })
            .await
    }

    pub async fn set_sensitivity(&self, value: f32) -> Result<VoiceStatus, VoiceError> {
        self.request(|reply| VoiceCommand::SetSensitivity { value, reply })
            .await
    }

    pub async fn status(&self) -> Result<VoiceStatus, VoiceError> {
        self.request(|reply| VoiceCommand::Status { reply }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emergency::{Coordinator, Dispatch, Notifier, NotifyError, Phase, Runner};
    use crate::platform::{SimulatedSpeech, SpeechFeed, SpeechMode};
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};

    struct QuietNotifier;

    #[async_trait::async_trait]
    impl Notifier for QuietNotifier {
        async fn dispatch(&self, _dispatch: &Dispatch) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    struct Harness {
        voice: VoiceHandle,
        emergency: EmergencyHandle,
        feed: SpeechFeed,
        events: broadcast::Receiver<AppEvent>,
    }

    fn voice_config() -> VoiceConfig {
        VoiceConfig {
            sensitivity: 0.7,
            restart_delay: Duration::from_secs(1),
            custom_phrases: vec!["help me".into(), "emergency".into(), "safe word".into()],
        }
    }

    fn spawn_with(service: SimulatedSpeech, feed: SpeechFeed, speech_rx: mpsc::Receiver<SpeechEvent>) -> Harness {
        let (event_tx, events) = broadcast::channel(64);
        let coordinator = Coordinator::new(10, event_tx.clone());
        let (etx, erx) = mpsc::channel(8);
        tokio::spawn(Runner::new(coordinator, Arc::new(QuietNotifier)).run(erx));
        let emergency = EmergencyHandle::new(etx);

        let (vtx, vrx) = mpsc::channel(8);
        let listener = VoiceListener::new(service, speech_rx, &voice_config(), emergency.clone(), event_tx);
        tokio::spawn(listener.run(vrx));

        Harness {
            voice: VoiceHandle::new(vtx),
            emergency,
            feed,
            events,
        }
    }

    fn spawn() -> Harness {
        let (service, feed, rx) = SimulatedSpeech::new(16);
        spawn_with(service, feed, rx)
    }

    /// Poll until the listener has taken in the last utterance
    async fn settle(voice: &VoiceHandle, expect: impl Fn(&VoiceStatus) -> bool) -> VoiceStatus {
        loop {
            let status = voice.status().await.unwrap();
            if expect(&status) {
                return status;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_confident_phrase_opens_session() {
        let h = spawn();
        assert_ok!(h.voice.enable().await);
        assert!(h.feed.say("I need help now", 0.9).await);

        let status = settle(&h.voice, |s| s.transcript.starts_with("TRIGGER DETECTED")).await;
        assert_eq!(status.transcript, "TRIGGER DETECTED: \"help\"");

        let emergency = loop {
            let status = h.emergency.status().await.unwrap();
            if status.session.is_some() {
                break status;
            }
            tokio::task::yield_now().await;
        };
        assert_eq!(emergency.session.unwrap().trigger, "help");

        // detection notice clears after three seconds
        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(h.voice.status().await.unwrap().transcript, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_confidence_ignored() {
        let h = spawn();
        assert_ok!(h.voice.enable().await);
        assert!(h.feed.say("i need help now", 0.5).await);

        settle(&h.voice, |s| s.transcript == "i need help now").await;
        assert_eq!(h.emergency.status().await.unwrap().phase, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interim_segments_never_match() {
        let h = spawn();
        assert_ok!(h.voice.enable().await);
        h.feed
            .push(vec![SpeechSegment {
                transcript: "help".into(),
                confidence: 1.0,
                is_final: false,
            }])
            .await;

        settle(&h.voice, |s| s.transcript == "help").await;
        assert_eq!(h.emergency.status().await.unwrap().phase, Phase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarts_after_unexpected_end() {
        let h = spawn();
        assert_ok!(h.voice.enable().await);
        settle(&h.voice, |s| s.listening).await;

        assert!(h.feed.interrupt().await);
        settle(&h.voice, |s| !s.listening).await;
        assert!(!h.feed.is_running());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(h.feed.is_running());
        settle(&h.voice, |s| s.listening).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_restart_once_disabled() {
        let h = spawn();
        assert_ok!(h.voice.enable().await);
        let status = assert_ok!(h.voice.disable().await);
        assert!(!status.enabled);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!h.feed.is_running());
    }

    #[tokio::test]
    async fn test_mic_denied_mid_session_disables() {
        let mut h = spawn();
        assert_ok!(h.voice.enable().await);
        assert!(h.feed.fail(SpeechFailure::NotAllowed).await);

        let status = settle(&h.voice, |s| !s.enabled).await;
        assert!(status.last_error.is_some());
        assert!(!h.feed.is_running());

        loop {
            if let AppEvent::VoiceDisabled { .. } = h.events.recv().await.unwrap() {
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_permission_refused_on_enable() {
        let (service, feed, rx) = SimulatedSpeech::new(16);
        let h = spawn_with(service.with_mode(SpeechMode::Denied), feed, rx);
        assert!(matches!(h.voice.enable().await, Err(VoiceError::PermissionDenied)));
        assert!(!h.voice.status().await.unwrap().enabled);
    }

    #[tokio::test]
    async fn test_unsupported_host() {
        let (service, feed, rx) = SimulatedSpeech::new(16);
        let h = spawn_with(service.with_mode(SpeechMode::Unsupported), feed, rx);
        assert!(matches!(h.voice.enable().await, Err(VoiceError::Unsupported)));
        assert!(!h.voice.status().await.unwrap().supported);
    }

    #[tokio::test]
    async fn test_phrase_and_sensitivity_commands() {
        let h = spawn();
        let status = assert_ok!(h.voice.add_phrase("Red Balloon".into()).await);
        assert!(status.custom_phrases.contains(&"red balloon".to_string()));
        assert_err!(h.voice.add_phrase("red balloon".into()).await);

        let status = assert_ok!(h.voice.remove_phrase(" Red Balloon".into()).await);
        assert!(!status.custom_phrases.contains(&"red balloon".to_string()));

        let status = assert_ok!(h.voice.set_sensitivity(0.1).await);
        assert_eq!(status.sensitivity, 0.3);
    }
}
