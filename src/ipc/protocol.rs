//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::app::{DashboardView, View, ViewSnapshot};
use crate::community::{Comment, Report, ReportDraft, ReportFilter, ReportSort, Story, StoryFilter};
use crate::emergency::{EmergencyAction, EmergencyStatus, Phase, SessionSnapshot};
use crate::events::AppEvent;
use crate::location::{ShareLink, TrackingStatus};
use crate::platform::SpeechFailure;
use crate::trigger::VoiceStatus;

/// Largest frame either side will accept
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Request current daemon status
    GetStatus,

    /// Ping to check connectivity
    Ping,

    /// Turn this connection into a stream of event notifications
    Subscribe,

    /// Stop the daemon
    Shutdown,

    SelectView { view: View },

    /// Render the given view, or the selected one
    Render {
        #[serde(default)]
        view: Option<View>,
    },

    SubmitReport { draft: ReportDraft },

    ListReports {
        #[serde(default)]
        filter: ReportFilter,
        #[serde(default)]
        sort: ReportSort,
    },

    GetDashboard {
        #[serde(default)]
        filter: ReportFilter,
    },

    ListStories {
        #[serde(default)]
        filter: StoryFilter,
    },

    LikeStory { story_id: u64 },

    LikeComment { story_id: u64, comment_id: u64 },

    AddComment { story_id: u64, content: String },

    /// Open a session from the panic button
    TriggerEmergency {
        #[serde(default)]
        label: Option<String>,
    },

    SelectAction { action: EmergencyAction },

    CancelEmergency,

    DismissEmergency,

    EmergencyStatus,

    EnableVoice,

    DisableVoice,

    AddPhrase { phrase: String },

    RemovePhrase { phrase: String },

    SetSensitivity { value: f32 },

    /// Feed recognized speech to the listening session
    InjectSpeech {
        transcript: String,
        confidence: f32,
        #[serde(default = "default_final")]
        is_final: bool,
    },

    /// End the running recognizer session as the host would
    InterruptSpeech,

    /// Report a recognizer error on the running session
    SpeechError { error: SpeechFailure },

    VoiceStatus,

    StartTracking,

    StopTracking,

    TrackingStatus,

    ShareLocation,

    AddContact { contact: String },

    RemoveContact { contact: String },

    SetBatteryOptimized { enabled: bool },

    SetUpdateInterval { secs: u64 },
}

fn default_final() -> bool {
    true
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Generic success with nothing to return
    Ok,

    ViewSelected { view: View },

    Rendered { snapshot: ViewSnapshot },

    Report { report: Report },

    Reports { reports: Vec<Report> },

    Dashboard { dashboard: DashboardView },

    Stories { stories: Vec<Story> },

    Likes { likes: u32 },

    Comment { comment: Comment },

    Session { session: SessionSnapshot },

    Phase { phase: Phase },

    Emergency { status: EmergencyStatus },

    Voice { status: VoiceStatus },

    SpeechAccepted { accepted: bool },

    Tracking { status: TrackingStatus },

    ShareLink { link: ShareLink },

    Contacts { contacts: Vec<String> },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: AppEvent },

    /// Events were dropped because this client fell behind
    Lagged { skipped: u64 },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub view: View,

    pub emergency: Phase,

    pub voice_enabled: bool,

    pub tracking: bool,
}

/// Write a length-prefixed JSON message
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    anyhow::ensure!(msg_bytes.len() <= MAX_MESSAGE_LEN, "message too large");
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await?;

    Ok(())
}

/// Read one frame. `Ok(None)` means the peer closed cleanly.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    anyhow::ensure!(len <= MAX_MESSAGE_LEN, "message too large: {len} bytes");

    let mut msg_buf = vec![0u8; len];
    reader
        .read_exact(&mut msg_buf)
        .await
        .context("connection closed mid-message")?;
    Ok(Some(msg_buf))
}

/// Read and decode one message
#[cfg(test)]
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: serde::de::DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).context("failed to parse message")?,
        )),
        None => Ok(None),
    }
}
