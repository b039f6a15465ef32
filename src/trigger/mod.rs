//! Voice trigger detection
//!
//! Speech results are matched against a phrase list once the recognizer is
//! confident enough; a match opens an emergency session.

mod listener;
mod phrases;

pub use listener::{VoiceHandle, VoiceListener, VoiceStatus};
pub use phrases::{clamp_sensitivity, DEFAULT_SENSITIVITY};

use crate::platform::PlatformError;

/// Errors from voice safety operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VoiceError {
    #[error("speech recognition is not supported on this host")]
    Unsupported,

    #[error("microphone access denied")]
    PermissionDenied,

    #[error("trigger phrase is empty")]
    EmptyPhrase,

    #[error("trigger phrase already exists: {0}")]
    DuplicatePhrase(String),

    #[error("speech recognition failed to start: {0}")]
    Platform(PlatformError),

    #[error("voice listener is not running")]
    Unavailable,
}

impl VoiceError {
    pub fn code(&self) -> &'static str {
        match self {
            VoiceError::Unsupported => "unsupported",
            VoiceError::PermissionDenied => "permission_denied",
            VoiceError::EmptyPhrase => "empty_phrase",
            VoiceError::DuplicatePhrase(_) => "duplicate_phrase",
            VoiceError::Platform(_) => "platform_error",
            VoiceError::Unavailable => "unavailable",
        }
    }
}

impl From<PlatformError> for VoiceError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::Unsupported => VoiceError::Unsupported,
            PlatformError::PermissionDenied => VoiceError::PermissionDenied,
            other => VoiceError::Platform(other),
        }
    }
}
