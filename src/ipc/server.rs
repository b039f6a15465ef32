//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications of
//! application events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::app::{AppError, AppState};
use crate::emergency::TriggerSource;
use crate::events::AppEvent;
use crate::lifecycle::ShutdownSignal;

use super::protocol::{read_frame, write_message, DaemonStatus, Notification, Request, Response};

/// Label recorded for sessions opened from the panic button
const MANUAL_TRIGGER: &str = "manual trigger";

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    state: Arc<AppState>,
    shutdown: ShutdownSignal,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Create a new IPC server
    pub fn new(socket_path: &Path, state: Arc<AppState>, shutdown: ShutdownSignal) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))
                .context("failed to restrict socket permissions")?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            state,
            shutdown,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let state = Arc::clone(&self.state);
                    let shutdown = self.shutdown.clone();
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, state, shutdown) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(
        mut stream: UnixStream,
        state: Arc<AppState>,
        shutdown: ShutdownSignal,
    ) -> Result<()> {
        loop {
            let Some(frame) = read_frame(&mut stream).await? else {
                debug!("client disconnected");
                return Ok(());
            };

            let request: Request = match serde_json::from_slice(&frame) {
                Ok(request) => request,
                Err(e) => {
                    warn!(error = %e, "unparseable request");
                    write_message(&mut stream, &Response::error("invalid_request", e.to_string()))
                        .await?;
                    continue;
                }
            };

            debug!(?request, "received request");

            if let Request::Subscribe = request {
                let events = state.subscribe();
                write_message(&mut stream, &Response::Subscribed).await?;
                debug!("client subscribed to notifications");
                return Self::stream_events(stream, events).await;
            }

            if let Request::Shutdown = request {
                info!("shutdown requested by client");
                write_message(&mut stream, &Response::Ok).await?;
                shutdown.trigger();
                return Ok(());
            }

            let response = Self::process_request(request, &state).await;
            write_message(&mut stream, &response).await?;
        }
    }

    /// Forward every event to a subscribed client until it goes away
    async fn stream_events(
        mut stream: UnixStream,
        mut events: broadcast::Receiver<AppEvent>,
    ) -> Result<()> {
        loop {
            let notification = match events.recv().await {
                Ok(event) => Notification::Event { event },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "subscriber lagged");
                    Notification::Lagged { skipped }
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            };
            if write_message(&mut stream, &notification).await.is_err() {
                debug!("subscriber disconnected");
                return Ok(());
            }
        }
    }

    /// Process a request and return a response
    async fn process_request(request: Request, state: &AppState) -> Response {
        match Self::dispatch(request, state).await {
            Ok(response) => response,
            Err(e) => {
                debug!(code = e.code(), error = %e, "request failed");
                Response::error(e.code(), e.to_string())
            }
        }
    }

    async fn dispatch(request: Request, state: &AppState) -> Result<Response, AppError> {
        let response = match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => Response::Status(Self::daemon_status(state).await?),

            // handled by the connection loop
            Request::Subscribe => Response::Subscribed,
            Request::Shutdown => Response::Ok,

            Request::SelectView { view } => Response::ViewSelected {
                view: state.select_view(view).await,
            },

            Request::Render { view } => Response::Rendered {
                snapshot: state.render(view).await?,
            },

            Request::SubmitReport { draft } => Response::Report {
                report: state.submit_report(draft).await?,
            },

            Request::ListReports { filter, sort } => Response::Reports {
                reports: state.list_reports(filter, sort).await,
            },

            Request::GetDashboard { filter } => Response::Dashboard {
                dashboard: state.dashboard(&filter).await,
            },

            Request::ListStories { filter } => Response::Stories {
                stories: state.list_stories(filter).await,
            },

            Request::LikeStory { story_id } => Response::Likes {
                likes: state.like_story(story_id).await?,
            },

            Request::LikeComment {
                story_id,
                comment_id,
            } => Response::Likes {
                likes: state.like_comment(story_id, comment_id).await?,
            },

            Request::AddComment { story_id, content } => Response::Comment {
                comment: state.add_comment(story_id, &content).await?,
            },

            Request::TriggerEmergency { label } => {
                let label = label
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty())
                    .unwrap_or_else(|| MANUAL_TRIGGER.to_string());
                Response::Session {
                    session: state
                        .emergency()
                        .trigger(TriggerSource::Manual { label })
                        .await?,
                }
            }

            Request::SelectAction { action } => Response::Phase {
                phase: state.emergency().select_action(action).await?,
            },

            Request::CancelEmergency => {
                state.emergency().cancel().await?;
                Response::Ok
            }

            Request::DismissEmergency => {
                state.emergency().dismiss().await?;
                Response::Ok
            }

            Request::EmergencyStatus => Response::Emergency {
                status: state.emergency().status().await?,
            },

            Request::EnableVoice => Response::Voice {
                status: state.voice().enable().await?,
            },

            Request::DisableVoice => Response::Voice {
                status: state.voice().disable().await?,
            },

            Request::AddPhrase { phrase } => Response::Voice {
                status: state.voice().add_phrase(phrase).await?,
            },

            Request::RemovePhrase { phrase } => Response::Voice {
                status: state.voice().remove_phrase(phrase).await?,
            },

            Request::SetSensitivity { value } => Response::Voice {
                status: state.voice().set_sensitivity(value).await?,
            },

            Request::InjectSpeech {
                transcript,
                confidence,
                is_final,
            } => Response::SpeechAccepted {
                accepted: state.inject_speech(transcript, confidence, is_final).await,
            },

            Request::InterruptSpeech => Response::SpeechAccepted {
                accepted: state.interrupt_speech().await,
            },

            Request::SpeechError { error } => Response::SpeechAccepted {
                accepted: state.fail_speech(error).await,
            },

            Request::VoiceStatus => Response::Voice {
                status: state.voice().status().await?,
            },

            Request::StartTracking => Response::Tracking {
                status: state.location().start().await?,
            },

            Request::StopTracking => Response::Tracking {
                status: state.location().stop().await?,
            },

            Request::TrackingStatus => Response::Tracking {
                status: state.location().status().await?,
            },

            Request::ShareLocation => Response::ShareLink {
                link: state.location().share().await?,
            },

            Request::AddContact { contact } => Response::Contacts {
                contacts: state.location().add_contact(contact).await?,
            },

            Request::RemoveContact { contact } => Response::Contacts {
                contacts: state.location().remove_contact(contact).await?,
            },

            Request::SetBatteryOptimized { enabled } => Response::Tracking {
                status: state.location().configure(Some(enabled), None).await?,
            },

            Request::SetUpdateInterval { secs } => Response::Tracking {
                status: state.location().configure(None, Some(secs)).await?,
            },
        };
        Ok(response)
    }

    async fn daemon_status(state: &AppState) -> Result<DaemonStatus, AppError> {
        Ok(DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: state.uptime_secs(),
            view: state.current_view().await,
            emergency: state.emergency().status().await?.phase,
            voice_enabled: state.voice().status().await?.enabled,
            tracking: state.location().status().await?.tracking,
        })
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::spawn_state;
    use crate::emergency::{EmergencyAction, Phase};
    use crate::ipc::protocol::read_message;

    async fn call(stream: &mut UnixStream, request: &Request) -> Response {
        write_message(stream, request).await.unwrap();
        read_message(stream).await.unwrap().unwrap()
    }

    fn start_server(dir: &tempfile::TempDir) -> (PathBuf, Arc<Server>) {
        let socket_path = dir.path().join("haven.sock");
        let server = Arc::new(Server::new(&socket_path, spawn_state(), ShutdownSignal::new()).unwrap());
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });
        (socket_path, server)
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let (socket_path, server) = start_server(&dir);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&socket_path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        assert!(matches!(call(&mut client, &Request::Ping).await, Response::Pong));

        match call(&mut client, &Request::GetStatus).await {
            Response::Status(status) => {
                assert_eq!(status.emergency, Phase::Idle);
                assert!(!status.tracking);
            }
            other => panic!("unexpected response: {other:?}"),
        }

        match call(&mut client, &Request::LikeStory { story_id: 424_242 }).await {
            Response::Error { code, .. } => assert_eq!(code, "story_not_found"),
            other => panic!("unexpected response: {other:?}"),
        }

        // bad JSON gets an error reply, not a hangup
        let bad = b"{\"type\":\"launch\"}";
        use tokio::io::AsyncWriteExt;
        client.write_all(&(bad.len() as u32).to_le_bytes()).await.unwrap();
        client.write_all(bad).await.unwrap();
        let reply: Response = read_message(&mut client).await.unwrap().unwrap();
        assert!(matches!(reply, Response::Error { ref code, .. } if code == "invalid_request"));
        assert!(matches!(call(&mut client, &Request::Ping).await, Response::Pong));

        server.shutdown().await;
        assert!(!socket_path.exists());
    }

    #[tokio::test]
    async fn test_emergency_flow_pushes_events() {
        let dir = tempfile::tempdir().unwrap();
        let (socket_path, _server) = start_server(&dir);

        let mut subscriber = UnixStream::connect(&socket_path).await.unwrap();
        assert!(matches!(
            call(&mut subscriber, &Request::Subscribe).await,
            Response::Subscribed
        ));

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        match call(&mut client, &Request::TriggerEmergency { label: None }).await {
            Response::Session { session } => assert_eq!(session.trigger, MANUAL_TRIGGER),
            other => panic!("unexpected response: {other:?}"),
        }

        match call(&mut client, &Request::TriggerEmergency { label: None }).await {
            Response::Error { code, .. } => assert_eq!(code, "session_active"),
            other => panic!("unexpected response: {other:?}"),
        }

        let request = Request::SelectAction {
            action: EmergencyAction::SilentAlert,
        };
        assert!(matches!(call(&mut client, &request).await, Response::Phase { .. }));

        let notification: Notification = read_message(&mut subscriber).await.unwrap().unwrap();
        assert!(matches!(
            notification,
            Notification::Event {
                event: AppEvent::EmergencyTriggered { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_request_triggers_signal() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("haven.sock");
        let shutdown = ShutdownSignal::new();
        let server = Arc::new(Server::new(&socket_path, spawn_state(), shutdown.clone()).unwrap());
        let runner = Arc::clone(&server);
        tokio::spawn(async move { runner.run().await });

        let mut client = UnixStream::connect(&socket_path).await.unwrap();
        assert!(matches!(call(&mut client, &Request::Shutdown).await, Response::Ok));
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_stale_socket_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("haven.sock");
        std::fs::write(&socket_path, b"stale").unwrap();

        let _server = Server::new(&socket_path, spawn_state(), ShutdownSignal::new()).unwrap();
        assert!(UnixStream::connect(&socket_path).await.is_ok());
    }
}
