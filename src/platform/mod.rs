//! Host platform capabilities
//!
//! Speech recognition and geolocation are modelled as traits whose results
//! arrive over channels. The daemon ships simulated implementations only:
//! speech is fed through IPC and positions drift around a fixed point.
//! Each simulation can be started in a degraded mode (unsupported host,
//! denied permission, no position signal) to exercise the failure paths.

mod geolocation;
mod speech;

pub use geolocation::{
    GeoFailure, GeoMode, GeolocationService, Position, PositionOptions, SimulatedGeolocation,
    WatchId,
};
pub use speech::{
    SimulatedSpeech, SpeechEvent, SpeechFailure, SpeechFeed, SpeechMode, SpeechSegment,
    SpeechService,
};

/// Errors raised synchronously by a platform service
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("capability not supported on this host")]
    Unsupported,

    #[error("permission denied")]
    PermissionDenied,

    #[error("service already running")]
    AlreadyRunning,
}

/// A mode name that no simulated backend understands
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform mode {0:?}")]
pub struct UnknownMode(pub String);
