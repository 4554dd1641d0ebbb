//! Application settings persistence
//!
//! Settings are stored as JSON in `<config dir>/vocascan/settings.json`.
//! Every field has a default, so a partial file is fine and a missing file
//! means "use the defaults".

use crate::controller::ControllerConfig;
use crate::engine::EngineConfig;
use crate::pitch::{SmoothingParams, DEFAULT_AMPLITUDE_THRESHOLD, DEFAULT_FRAME_SIZE};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "vocascan";
const SETTINGS_FILE: &str = "settings.json";

pub const DEFAULT_DIAGNOSIS_ENDPOINT: &str = "http://localhost:8080/api/diagnose";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// URL the finished take is posted to
    pub diagnosis_endpoint: String,
    pub countdown_seconds: u32,
    pub countdown_tick_ms: u64,
    pub model_load_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub reading_throttle_ms: u64,
    /// Analysis window length in samples
    pub frame_size: usize,
    /// RMS level below which a frame is treated as silence
    pub amplitude_threshold: f32,
    pub smoothing: SmoothingParams,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            diagnosis_endpoint: DEFAULT_DIAGNOSIS_ENDPOINT.to_string(),
            countdown_seconds: 3,
            countdown_tick_ms: 1000,
            model_load_timeout_secs: 10,
            poll_interval_ms: 16,
            reading_throttle_ms: 33,
            frame_size: DEFAULT_FRAME_SIZE,
            amplitude_threshold: DEFAULT_AMPLITUDE_THRESHOLD,
            smoothing: SmoothingParams::default(),
        }
    }
}

impl Settings {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            model_load_timeout: Duration::from_secs(self.model_load_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            smoothing: self.smoothing,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            countdown_from: self.countdown_seconds,
            countdown_tick: Duration::from_millis(self.countdown_tick_ms),
            reading_throttle: Duration::from_millis(self.reading_throttle_ms),
        }
    }
}

/// Default settings location, if the platform has a config directory
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join(SETTINGS_FILE))
}

/// Load settings from `path`; a missing file yields the defaults
pub fn load(path: &Path) -> Result<Settings> {
    if !path.exists() {
        debug!("No settings at {}, using defaults", path.display());
        return Ok(Settings::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let mut settings: Settings = serde_json::from_str(&contents)
        .with_context(|| format!("Malformed settings file {}", path.display()))?;

    let smoothing = settings.smoothing.sanitized();
    if smoothing != settings.smoothing {
        warn!("Smoothing settings out of range, using {:?}", smoothing);
        settings.smoothing = smoothing;
    }

    debug!("Loaded settings from {}", path.display());
    Ok(settings)
}

/// Write settings to `path`, creating parent directories as needed
pub fn save(settings: &Settings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json).with_context(|| format!("Failed to write settings to {}", path.display()))?;

    info!("Saved settings to {}", path.display());
    Ok(())
}
