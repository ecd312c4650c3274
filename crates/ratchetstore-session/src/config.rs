use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Session store configuration, loaded from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one encrypted file per record.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: PathBuf,

    /// When a V2 session must be renegotiated before further encryption.
    #[serde(default)]
    pub refresh: RefreshPolicy,
}

/// Staleness thresholds for V2 sessions. A zero disables that threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPolicy {
    /// Messages encrypted under one session state before it goes stale.
    #[serde(default = "default_max_messages")]
    pub max_messages: u32,

    /// Age of a session state, in seconds, before it goes stale.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_sessions_dir() -> PathBuf {
    "sessions".into()
}

fn default_max_messages() -> u32 {
    10_000
}

fn default_max_age_secs() -> u64 {
    30 * 24 * 60 * 60
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl RefreshPolicy {
    /// Only the explicit refresh flag marks a session stale.
    pub fn never() -> Self {
        Self {
            max_messages: 0,
            max_age_secs: 0,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
            refresh: RefreshPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, StoreError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}
