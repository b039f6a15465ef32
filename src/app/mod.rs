//! Application state shared by every client connection

mod state;
mod view;

pub use state::AppState;
#[cfg(test)]
pub(crate) use state::testing;
pub use view::{DashboardView, View, ViewSnapshot};

use crate::community::CommunityError;
use crate::emergency::EmergencyError;
use crate::location::TrackerError;
use crate::trigger::VoiceError;

/// Any failure an app operation can report to a client
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Community(#[from] CommunityError),

    #[error(transparent)]
    Emergency(#[from] EmergencyError),

    #[error(transparent)]
    Voice(#[from] VoiceError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Community(e) => e.code(),
            AppError::Emergency(e) => e.code(),
            AppError::Voice(e) => e.code(),
            AppError::Tracker(e) => e.code(),
        }
    }
}
