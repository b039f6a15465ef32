//! Community data: submitted incident reports, shared stories, and the
//! aggregate figures the dashboard and map views display.
//!
//! Everything here is in-memory and seeded at startup; nothing survives a
//! restart.

mod report;
pub mod seed;
mod stats;
mod story;

pub use report::{
    simulated_coordinates, IncidentType, Report, ReportBook, ReportDraft, ReportFilter, ReportSort,
    Severity, MAP_CENTER,
};
pub use stats::{hotspots, DashboardStats, Hotspot};
pub use story::{Comment, Story, StoryBoard, StoryFilter};

/// Errors from report and story operations
#[derive(Debug, thiserror::Error)]
pub enum CommunityError {
    #[error("required field missing: {0}")]
    MissingField(&'static str),

    #[error("unknown severity: {0}")]
    UnknownSeverity(String),

    #[error("unknown incident type: {0}")]
    UnknownIncidentType(String),

    #[error("story {0} not found")]
    StoryNotFound(u64),

    #[error("comment {comment_id} not found on story {story_id}")]
    CommentNotFound { story_id: u64, comment_id: u64 },

    #[error("comment cannot be empty")]
    EmptyComment,

    #[error("seed data is malformed: {0}")]
    Seed(#[source] serde_json::Error),
}

impl CommunityError {
    /// Stable code reported to IPC clients
    pub fn code(&self) -> &'static str {
        match self {
            CommunityError::MissingField(_) => "missing_field",
            CommunityError::UnknownSeverity(_) => "unknown_severity",
            CommunityError::UnknownIncidentType(_) => "unknown_incident_type",
            CommunityError::StoryNotFound(_) => "story_not_found",
            CommunityError::CommentNotFound { .. } => "comment_not_found",
            CommunityError::EmptyComment => "empty_comment",
            CommunityError::Seed(_) => "seed",
        }
    }
}

/// Reports and stories together
#[derive(Debug, Default)]
pub struct Community {
    pub reports: ReportBook,
    pub stories: StoryBoard,
}

impl Community {
    pub fn seeded() -> Result<Self, CommunityError> {
        Ok(Self {
            reports: ReportBook::from_seed(seed::reports()?),
            stories: StoryBoard::from_seed(seed::stories()?),
        })
    }
}
