use std::path::PathBuf;

use chrono::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Dosekeeper";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Days generated on each side of "now" by the occurrence generator.
pub const DEFAULT_WINDOW_DAYS: i64 = 7;

/// How far ahead of its slot a dose already counts as current.
pub const DEFAULT_CURRENT_LEAD_MINUTES: i64 = 30;

/// How long after its slot an unlogged dose stays current before it is missed.
pub const DEFAULT_CURRENT_GRACE_MINUTES: i64 = 5;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_VISION_MODEL: &str = "llava";
pub const DEFAULT_CLASSIFIER_TIMEOUT_SECS: u64 = 120;

const ENV_DATA_DIR: &str = "DOSEKEEPER_DATA_DIR";
const ENV_OLLAMA_URL: &str = "DOSEKEEPER_OLLAMA_URL";
const ENV_VISION_MODEL: &str = "DOSEKEEPER_VISION_MODEL";
const ENV_CLASSIFIER_TIMEOUT: &str = "DOSEKEEPER_CLASSIFIER_TIMEOUT_SECS";

/// Default `tracing` filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "info,dosekeeper_lib=debug,reqwest=warn"
}

/// Get the application data directory.
/// `$DOSEKEEPER_DATA_DIR` if set, otherwise ~/Dosekeeper/.
pub fn app_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Path of the SQLite database holding medications and dose logs.
pub fn database_path() -> PathBuf {
    app_data_dir().join("dosekeeper.db")
}

/// Runtime settings for the tracker and its classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerConfig {
    pub window_days: i64,
    pub current_lead_minutes: i64,
    pub current_grace_minutes: i64,
    pub ollama_url: String,
    pub vision_model: String,
    pub classifier_timeout_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            current_lead_minutes: DEFAULT_CURRENT_LEAD_MINUTES,
            current_grace_minutes: DEFAULT_CURRENT_GRACE_MINUTES,
            ollama_url: DEFAULT_OLLAMA_URL.into(),
            vision_model: DEFAULT_VISION_MODEL.into(),
            classifier_timeout_secs: DEFAULT_CLASSIFIER_TIMEOUT_SECS,
        }
    }
}

impl TrackerConfig {
    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_OLLAMA_URL).filter(|v| !v.trim().is_empty()) {
            config.ollama_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(model) = lookup(ENV_VISION_MODEL).filter(|v| !v.trim().is_empty()) {
            config.vision_model = model.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_CLASSIFIER_TIMEOUT) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.classifier_timeout_secs = secs,
                _ => tracing::warn!(
                    value = %raw,
                    "Ignoring invalid {ENV_CLASSIFIER_TIMEOUT}, using default"
                ),
            }
        }

        config
    }

    pub fn current_lead(&self) -> Duration {
        Duration::minutes(self.current_lead_minutes)
    }

    pub fn current_grace(&self) -> Duration {
        Duration::minutes(self.current_grace_minutes)
    }
}
