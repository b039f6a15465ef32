//! Live location sharing
//!
//! While tracking is on, the tracker holds the latest [`LocationSample`],
//! publishes every update to a watch channel for other components (the
//! emergency notifier reads it when sending a location), and hands out a
//! share link keyed by a short random code. With tracking off the notifier
//! asks the tracker for a one-shot fix instead.

mod tracker;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::platform::{GeoFailure, Position};

pub use tracker::{LocationHandle, LocationTracker, TrackingStatus};

/// Latest known position while tracking is active
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Meters
    pub accuracy: f64,
    /// Unix milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl LocationSample {
    pub fn from_position(position: Position) -> Self {
        Self {
            latitude: position.latitude,
            longitude: position.longitude,
            accuracy: position.accuracy,
            timestamp: position.timestamp,
            address: Some(reverse_geocode(position.latitude, position.longitude)),
        }
    }
}

/// Stand-in for a geocoding service: just the rounded coordinates
pub fn reverse_geocode(lat: f64, lng: f64) -> String {
    format!("{lat:.4}, {lng:.4}")
}

/// Link a trusted contact can open to follow the live location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareLink {
    pub code: String,
    pub url: String,
    pub text: String,
}

impl ShareLink {
    pub fn new(origin: &str, code: &str) -> Self {
        let url = format!("{}/track/{}", origin.trim_end_matches('/'), code);
        let text = format!("I'm sharing my live location for safety. Track me here: {url}");
        Self {
            code: code.to_string(),
            url,
            text,
        }
    }
}

const SHARE_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SHARE_CODE_LEN: usize = 6;

pub fn generate_share_code<R: Rng>(rng: &mut R) -> String {
    (0..SHARE_CODE_LEN)
        .map(|_| SHARE_CODE_ALPHABET[rng.random_range(0..SHARE_CODE_ALPHABET.len())] as char)
        .collect()
}

/// `1h 2m 3s`, `2m 3s` or `3s`
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("geolocation is not supported on this host")]
    Unsupported,

    #[error("tracking is already active")]
    AlreadyTracking,

    #[error("tracking is not active")]
    NotTracking,

    #[error("Failed to start tracking: {0}")]
    StartFailed(#[source] GeoFailure),

    #[error("Could not get current position: {0}")]
    LocateFailed(#[source] GeoFailure),

    #[error("position request was dropped by the host")]
    FixDropped,

    #[error("contact cannot be empty")]
    EmptyContact,

    #[error("contact {0} is already trusted")]
    DuplicateContact(String),

    #[error("update interval must be at least one second")]
    InvalidInterval,

    #[error("location tracker is not running")]
    Unavailable,
}

impl TrackerError {
    pub fn code(&self) -> &'static str {
        match self {
            TrackerError::Unsupported => "unsupported",
            TrackerError::AlreadyTracking => "already_tracking",
            TrackerError::NotTracking => "not_tracking",
            TrackerError::StartFailed(GeoFailure::PermissionDenied) => "permission_denied",
            TrackerError::StartFailed(_) => "start_failed",
            TrackerError::LocateFailed(GeoFailure::PermissionDenied) => "permission_denied",
            TrackerError::LocateFailed(GeoFailure::Timeout) => "timeout",
            TrackerError::LocateFailed(_) => "locate_failed",
            TrackerError::FixDropped => "fix_dropped",
            TrackerError::EmptyContact => "empty_contact",
            TrackerError::DuplicateContact(_) => "duplicate_contact",
            TrackerError::InvalidInterval => "invalid_interval",
            TrackerError::Unavailable => "unavailable",
        }
    }
}
