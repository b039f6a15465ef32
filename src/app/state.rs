//! The application context object
//!
//! Community data and the selected view live behind locks here; emergency,
//! voice and location state is owned by their actor tasks and reached
//! through handles. Every mutation goes through a named method so the
//! matching event is always broadcast.

use std::time::Instant;

use chrono::Local;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::community::{
    hotspots, simulated_coordinates, Comment, Community, DashboardStats, IncidentType, Report,
    ReportDraft, ReportFilter, ReportSort, Severity, Story, StoryFilter,
};
use crate::emergency::EmergencyHandle;
use crate::events::AppEvent;
use crate::location::LocationHandle;
use crate::platform::{SpeechFailure, SpeechFeed, SpeechSegment};
use crate::trigger::VoiceHandle;

use super::view::{DashboardView, ResourceDirectory, View, ViewSnapshot};
use super::AppError;

/// Reports shown in the dashboard's recent list
const RECENT_REPORTS: usize = 3;

pub struct AppState {
    community: RwLock<Community>,
    view: RwLock<View>,
    resources: ResourceDirectory,
    emergency: EmergencyHandle,
    voice: VoiceHandle,
    location: LocationHandle,
    speech: SpeechFeed,
    event_tx: broadcast::Sender<AppEvent>,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        community: Community,
        emergency_number: &str,
        emergency: EmergencyHandle,
        voice: VoiceHandle,
        location: LocationHandle,
        speech: SpeechFeed,
        event_tx: broadcast::Sender<AppEvent>,
    ) -> Self {
        Self {
            community: RwLock::new(community),
            view: RwLock::new(View::default()),
            resources: ResourceDirectory::with_emergency_number(emergency_number),
            emergency,
            voice,
            location,
            speech,
            event_tx,
            started_at: Instant::now(),
        }
    }

    pub fn emergency(&self) -> &EmergencyHandle {
        &self.emergency
    }

    pub fn voice(&self) -> &VoiceHandle {
        &self.voice
    }

    pub fn location(&self) -> &LocationHandle {
        &self.location
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.event_tx.subscribe()
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn current_view(&self) -> View {
        *self.view.read().await
    }

    pub async fn select_view(&self, view: View) -> View {
        let mut current = self.view.write().await;
        if *current != view {
            info!(from = %*current, to = %view, "view changed");
            *current = view;
        }
        view
    }

    /// Render `view`, or the selected view when `None`
    pub async fn render(&self, view: Option<View>) -> Result<ViewSnapshot, AppError> {
        let view = match view {
            Some(view) => view,
            None => self.current_view().await,
        };

        let snapshot = match view {
            View::Home => {
                let community = self.community.read().await;
                ViewSnapshot::Home {
                    reports_submitted: community.reports.len(),
                    stories_shared: community.stories.all().len(),
                }
            }
            View::Report => ViewSnapshot::Report {
                incident_types: IncidentType::ALL.to_vec(),
                severities: Severity::ALL.to_vec(),
            },
            View::Map => {
                let community = self.community.read().await;
                ViewSnapshot::Map {
                    reports: community.reports.all().to_vec(),
                    incident_types: community.reports.incident_types(),
                    hotspots: hotspots(),
                }
            }
            View::Dashboard => ViewSnapshot::Dashboard(self.dashboard(&ReportFilter::default()).await),
            View::Resources => ViewSnapshot::Resources(self.resources.clone()),
            View::Stories => {
                let community = self.community.read().await;
                ViewSnapshot::Stories {
                    stories: community.stories.all().to_vec(),
                    incident_types: community.stories.incident_types(),
                }
            }
            View::VoiceSafety => ViewSnapshot::VoiceSafety(self.voice.status().await?),
            View::LiveLocation => ViewSnapshot::LiveLocation(self.location.status().await?),
            View::SubmittedReports => ViewSnapshot::SubmittedReports {
                reports: self.list_reports(ReportFilter::default(), ReportSort::Date).await,
            },
        };
        Ok(snapshot)
    }

    pub async fn submit_report(&self, draft: ReportDraft) -> Result<Report, AppError> {
        let today = Local::now().date_naive();
        let coords = simulated_coordinates(&mut rand::rng());

        let report = {
            let mut community = self.community.write().await;
            community.reports.submit(draft, today, coords)?.clone()
        };

        let _ = self.event_tx.send(AppEvent::ReportSubmitted {
            id: report.id,
            severity: report.severity,
        });
        Ok(report)
    }

    pub async fn list_reports(&self, filter: ReportFilter, sort: ReportSort) -> Vec<Report> {
        self.community.read().await.reports.list(&filter, sort)
    }

    pub async fn dashboard(&self, filter: &ReportFilter) -> DashboardView {
        let community = self.community.read().await;
        let today = Local::now().date_naive();
        DashboardView {
            stats: DashboardStats::compute(&community.reports.filtered(filter), today),
            recent: community.reports.recent(filter, RECENT_REPORTS),
            hotspots: hotspots(),
        }
    }

    pub async fn list_stories(&self, filter: StoryFilter) -> Vec<Story> {
        self.community.read().await.stories.filtered(&filter)
    }

    pub async fn like_story(&self, story_id: u64) -> Result<u32, AppError> {
        let likes = self.community.write().await.stories.like_story(story_id)?;
        let _ = self.event_tx.send(AppEvent::StoryLiked { story_id, likes });
        Ok(likes)
    }

    pub async fn like_comment(&self, story_id: u64, comment_id: u64) -> Result<u32, AppError> {
        let likes = self
            .community
            .write()
            .await
            .stories
            .like_comment(story_id, comment_id)?;
        let _ = self.event_tx.send(AppEvent::CommentLiked {
            story_id,
            comment_id,
            likes,
        });
        Ok(likes)
    }

    pub async fn add_comment(&self, story_id: u64, content: &str) -> Result<Comment, AppError> {
        let today = Local::now().date_naive();
        let comment = self
            .community
            .write()
            .await
            .stories
            .add_comment(story_id, content, today)?;
        let _ = self.event_tx.send(AppEvent::CommentAdded {
            story_id,
            comment_id: comment.id,
        });
        Ok(comment)
    }

    /// Hand recognized speech to the running recognizer session.
    /// Returns false when no session is listening.
    pub async fn inject_speech(&self, transcript: String, confidence: f32, is_final: bool) -> bool {
        let accepted = self
            .speech
            .push(vec![SpeechSegment {
                transcript,
                confidence,
                is_final,
            }])
            .await;
        debug!(accepted, is_final, "speech injected");
        accepted
    }

    /// End the running recognizer session. Voice safety restarts it while
    /// still enabled.
    pub async fn interrupt_speech(&self) -> bool {
        self.speech.interrupt().await
    }

    /// Raise a recognizer error on the running session
    pub async fn fail_speech(&self, failure: SpeechFailure) -> bool {
        self.speech.fail(failure).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A fully wired state over the simulated platform services

    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::{broadcast, mpsc, watch};

    use super::AppState;
    use crate::community::Community;
    use crate::config::{TrackingConfig, VoiceConfig};
    use crate::emergency::{Coordinator, EmergencyHandle, LoggingNotifier, Runner};
    use crate::location::{LocationHandle, LocationTracker};
    use crate::platform::{SimulatedGeolocation, SimulatedSpeech};
    use crate::trigger::{VoiceHandle, VoiceListener};

    pub fn spawn_state() -> Arc<AppState> {
        spawn_state_with(SimulatedGeolocation::new((40.7128, -74.0060)))
    }

    pub fn spawn_state_with(geo: SimulatedGeolocation) -> Arc<AppState> {
        let (event_tx, _) = broadcast::channel(128);
        let (sample_tx, sample_rx) = watch::channel(None);

        let (ltx, lrx) = mpsc::channel(16);
        let tracker = LocationTracker::new(geo, TrackingConfig::default(), sample_tx, event_tx.clone());
        tokio::spawn(tracker.run(lrx));
        let location = LocationHandle::new(ltx);

        let notifier = Arc::new(LoggingNotifier::new("911".into(), sample_rx, location.clone()));
        let (etx, erx) = mpsc::channel(16);
        tokio::spawn(Runner::new(Coordinator::new(10, event_tx.clone()), notifier).run(erx));
        let emergency = EmergencyHandle::new(etx);

        let (speech, feed, speech_rx) = SimulatedSpeech::new(16);
        let voice_config = VoiceConfig {
            restart_delay: Duration::from_millis(100),
            ..VoiceConfig::default()
        };
        let (vtx, vrx) = mpsc::channel(16);
        let listener =
            VoiceListener::new(speech, speech_rx, &voice_config, emergency.clone(), event_tx.clone());
        tokio::spawn(listener.run(vrx));

        Arc::new(AppState::new(
            Community::seeded().unwrap(),
            "911",
            emergency,
            VoiceHandle::new(vtx),
            location,
            feed,
            event_tx,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{spawn_state, spawn_state_with};
    use super::*;
    use crate::community::{IncidentType, Severity};
    use crate::emergency::{Delivery, EmergencyAction, Phase, SessionSnapshot, TriggerSource};
    use crate::platform::{GeoMode, SimulatedGeolocation};
    use chrono::NaiveDate;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn draft() -> ReportDraft {
        ReportDraft {
            incident_type: Some(IncidentType::VerbalHarassment),
            severity: Severity::High,
            location: "Main St & 5th Ave".into(),
            incident_date: NaiveDate::from_ymd_opt(2024, 1, 2),
            time: None,
            description: Some("   ".into()),
        }
    }

    #[tokio::test]
    async fn test_submit_report_stamps_today_and_broadcasts() {
        let state = spawn_state();
        let mut events = state.subscribe();

        let report = assert_ok!(state.submit_report(draft()).await);
        assert_eq!(report.date, Local::now().date_naive());
        assert!(report.description.is_none());
        assert!((report.location.lat - 40.7128).abs() <= 0.05);

        assert_eq!(
            events.recv().await.unwrap(),
            AppEvent::ReportSubmitted {
                id: report.id,
                severity: Severity::High
            }
        );

        let all = state.list_reports(ReportFilter::default(), ReportSort::Date).await;
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn test_incomplete_draft_rejected() {
        let state = spawn_state();
        let mut incomplete = draft();
        incomplete.location.clear();
        let err = state.submit_report(incomplete).await.unwrap_err();
        assert_eq!(err.code(), "missing_field");
    }

    #[tokio::test]
    async fn test_render_every_view() {
        let state = spawn_state();
        for view in View::ALL {
            let snapshot = assert_ok!(state.render(Some(view)).await);
            assert_eq!(snapshot.view(), view);
        }
    }

    #[tokio::test]
    async fn test_render_follows_selected_view() {
        let state = spawn_state();
        assert_eq!(state.current_view().await, View::Home);
        state.select_view(View::Resources).await;
        let snapshot = assert_ok!(state.render(None).await);
        assert!(matches!(snapshot, ViewSnapshot::Resources(_)));
    }

    #[tokio::test]
    async fn test_story_mutations() {
        let state = spawn_state();
        let story = state.list_stories(StoryFilter::default()).await[0].clone();

        let likes = assert_ok!(state.like_story(story.id).await);
        assert_eq!(likes, story.likes + 1);

        let comment = assert_ok!(state.add_comment(story.id, "You are not alone").await);
        let likes = assert_ok!(state.like_comment(story.id, comment.id).await);
        assert_eq!(likes, 1);

        let err = state.like_story(9_999).await.unwrap_err();
        assert_eq!(err.code(), "story_not_found");
    }

    #[tokio::test]
    async fn test_injected_speech_reaches_emergency() {
        let state = spawn_state();
        assert!(!state.inject_speech("help".into(), 0.9, true).await);

        assert_ok!(state.voice().enable().await);
        assert!(state.inject_speech("please help".into(), 0.9, true).await);

        loop {
            let status = state.emergency().status().await.unwrap();
            if let Phase::Countdown { .. } = status.phase {
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    async fn send_location(state: &AppState) -> SessionSnapshot {
        let panic_button = TriggerSource::Manual {
            label: "panic button".into(),
        };
        assert_ok!(state.emergency().trigger(panic_button).await);
        assert_ok!(state.emergency().select_action(EmergencyAction::SendLocation).await);
        loop {
            let session = state.emergency().status().await.unwrap().session.unwrap();
            if session.delivery != Some(Delivery::Pending) {
                return session;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_send_location_while_tracking_is_off() {
        let state = spawn_state();
        assert!(!state.location().status().await.unwrap().tracking);

        let session = send_location(&state).await;
        assert_eq!(session.delivery, Some(Delivery::Delivered));
        assert_eq!(
            session.outcome.as_deref(),
            Some("Location sent to emergency contacts")
        );
        // the one-shot fix did not start tracking
        assert!(!state.location().status().await.unwrap().tracking);
    }

    #[tokio::test]
    async fn test_send_location_reports_missing_fix() {
        let state = spawn_state_with(SimulatedGeolocation::new((0.0, 0.0)).with_mode(GeoMode::Denied));
        let mut events = state.subscribe();

        let session = send_location(&state).await;
        assert!(matches!(session.delivery, Some(Delivery::Failed { .. })));
        assert!(session
            .outcome
            .unwrap()
            .starts_with("Could not send your location"));

        loop {
            if let AppEvent::PlatformError { feature, .. } = events.recv().await.unwrap() {
                if feature == "emergency" {
                    break;
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_speech_end_and_error_reach_voice() {
        let state = spawn_state();
        assert!(!state.interrupt_speech().await);

        assert_ok!(state.voice().enable().await);
        assert!(state.interrupt_speech().await);
        // restarted after the restart delay
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(state.voice().status().await.unwrap().listening);

        assert!(state.fail_speech(SpeechFailure::NotAllowed).await);
        loop {
            let status = state.voice().status().await.unwrap();
            if !status.enabled {
                assert!(status.last_error.is_some());
                break;
            }
            tokio::task::yield_now().await;
        }
    }
}
