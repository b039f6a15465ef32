//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::platform::{GeoMode, SpeechMode};
use crate::trigger::{clamp_sensitivity, DEFAULT_SENSITIVITY};

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data
    pub data_dir: PathBuf,

    pub emergency: EmergencyConfig,
    pub voice: VoiceConfig,
    pub tracking: TrackingConfig,
    pub platform: PlatformConfig,
}

#[derive(Debug, Clone)]
pub struct EmergencyConfig {
    /// Seconds between a trigger and the automatic alert
    pub countdown_secs: u32,

    /// Number dialled by the call action
    pub emergency_number: String,
}

#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Minimum recognition confidence, 0.3 to 1.0
    pub sensitivity: f32,

    /// Pause before restarting a speech session that ended
    pub restart_delay: Duration,

    pub custom_phrases: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub battery_optimized: bool,
    pub update_interval_secs: u64,

    /// Base URL share links point at
    pub share_origin: String,
}

/// How the simulated host services behave
#[derive(Debug, Clone, Default)]
pub struct PlatformConfig {
    pub speech: SpeechMode,
    pub geolocation: GeoMode,

    /// Time the simulated host takes to produce a position fix
    pub fix_delay: Duration,
}

impl Default for EmergencyConfig {
    fn default() -> Self {
        Self {
            countdown_secs: 10,
            emergency_number: "911".to_string(),
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            sensitivity: DEFAULT_SENSITIVITY,
            restart_delay: Duration::from_millis(1000),
            custom_phrases: ["help me", "emergency", "safe word"]
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            battery_optimized: true,
            update_interval_secs: 30,
            share_origin: "http://localhost:5173".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Self::from_lookup(Path::new(&home), |key| std::env::var(key).ok())
    }

    /// Build from a home directory and an environment lookup
    fn from_lookup(home: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = home.join(".local").join("share").join("haven");

        let socket_path = env("HAVEN_SOCKET")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("haven.sock"));

        let mut emergency = EmergencyConfig::default();
        if let Some(secs) = parse_var::<u32>(&env, "HAVEN_COUNTDOWN_SECS")? {
            anyhow::ensure!(secs > 0, "HAVEN_COUNTDOWN_SECS must be at least 1");
            emergency.countdown_secs = secs;
        }
        if let Some(number) = env("HAVEN_EMERGENCY_NUMBER") {
            anyhow::ensure!(!number.trim().is_empty(), "HAVEN_EMERGENCY_NUMBER is empty");
            emergency.emergency_number = number.trim().to_string();
        }

        let mut voice = VoiceConfig::default();
        if let Some(sensitivity) = parse_var::<f32>(&env, "HAVEN_SENSITIVITY")? {
            voice.sensitivity = clamp_sensitivity(sensitivity);
        }
        if let Some(ms) = parse_var::<u64>(&env, "HAVEN_RESTART_DELAY_MS")? {
            voice.restart_delay = Duration::from_millis(ms);
        }

        let mut tracking = TrackingConfig::default();
        if let Some(battery) = parse_var::<bool>(&env, "HAVEN_BATTERY_OPTIMIZED")? {
            tracking.battery_optimized = battery;
        }
        if let Some(secs) = parse_var::<u64>(&env, "HAVEN_UPDATE_INTERVAL_SECS")? {
            anyhow::ensure!(secs > 0, "HAVEN_UPDATE_INTERVAL_SECS must be at least 1");
            tracking.update_interval_secs = secs;
        }
        if let Some(origin) = env("HAVEN_SHARE_ORIGIN") {
            tracking.share_origin = origin.trim_end_matches('/').to_string();
        }

        let mut platform = PlatformConfig::default();
        if let Some(mode) = parse_var::<SpeechMode>(&env, "HAVEN_SPEECH")? {
            platform.speech = mode;
        }
        if let Some(mode) = parse_var::<GeoMode>(&env, "HAVEN_GEOLOCATION")? {
            platform.geolocation = mode;
        }
        if let Some(ms) = parse_var::<u64>(&env, "HAVEN_GEO_FIX_DELAY_MS")? {
            platform.fix_delay = Duration::from_millis(ms);
        }

        Ok(Self {
            socket_path,
            data_dir,
            emergency,
            voice,
            tracking,
            platform,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

fn parse_var<T>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}
