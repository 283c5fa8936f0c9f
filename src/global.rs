use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

pub static CMD_ARGS: Lazy<Mutex<Vec<String>>> = Lazy::new(|| Mutex::new(env::args().collect()));

/// Startup timestamp, used by interval summaries to report uptime
pub static STARTUP_TIME: Lazy<DateTime<Utc>> = Lazy::new(Utc::now);

/// Check if pipeline debug mode is enabled via command line args
pub fn is_debug_pipeline_enabled() -> bool {
    if let Ok(args) = CMD_ARGS.lock() {
        args.contains(&"--debug-pipeline".to_string())
    } else {
        false
    }
}

/// Represents the runtime configuration loaded from settings.json
///
/// Every field has a default so a missing or partial file still produces a
/// usable configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: u64,
    #[serde(default = "default_process_interval_secs")]
    pub process_interval_secs: u64,
    #[serde(default = "default_classifier_interval_secs")]
    pub classifier_interval_secs: u64,
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
    #[serde(default = "default_reactivation_interval_secs")]
    pub reactivation_interval_secs: u64,
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_api_base_url() -> String {
    "https://api.dexscreener.com/latest/dex".to_string()
}

fn default_fetch_interval_secs() -> u64 {
    60
}

fn default_process_interval_secs() -> u64 {
    30
}

fn default_classifier_interval_secs() -> u64 {
    300
}

fn default_recovery_interval_secs() -> u64 {
    120
}

fn default_reactivation_interval_secs() -> u64 {
    3600
}

fn default_stats_interval_secs() -> u64 {
    30
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            api_base_url: default_api_base_url(),
            fetch_interval_secs: default_fetch_interval_secs(),
            process_interval_secs: default_process_interval_secs(),
            classifier_interval_secs: default_classifier_interval_secs(),
            recovery_interval_secs: default_recovery_interval_secs(),
            reactivation_interval_secs: default_reactivation_interval_secs(),
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

static SETTINGS: Lazy<RwLock<Settings>> = Lazy::new(|| RwLock::new(Settings::default()));

/// Reads a settings file and returns a Settings object
pub fn read_settings<P: AsRef<Path>>(path: P) -> Result<Settings, String> {
    let data = fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.as_ref().display(), e))?;
    serde_json::from_str(&data)
        .map_err(|e| format!("Failed to parse {}: {}", path.as_ref().display(), e))
}

/// Load settings from the default location into the global slot
///
/// A missing file is not an error, defaults are kept in that case.
pub fn load_settings() {
    let path = crate::paths::get_settings_path();
    if !path.exists() {
        return;
    }

    match read_settings(&path) {
        Ok(settings) => {
            if let Ok(mut slot) = SETTINGS.write() {
                *slot = settings;
            }
        }
        Err(e) => {
            crate::logger::warning(
                crate::logger::LogTag::System,
                &format!("Using default settings: {}", e),
            );
        }
    }
}

/// Get a snapshot of the current settings
pub fn get_settings() -> Settings {
    SETTINGS
        .read()
        .map(|s| s.clone())
        .unwrap_or_default()
}
