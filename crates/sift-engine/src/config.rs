use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 4 * 24 * 60 * 60;

/// Engine configuration. Every field has a default, so an empty JSON
/// object is a valid config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Directory holding cached list text and subscription metadata
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Refresh interval given to newly added subscriptions
    #[serde(default = "default_refresh_interval_secs")]
    pub default_refresh_interval_secs: u64,

    /// How often the background scheduler looks for due subscriptions
    #[serde(default = "default_scheduler_tick_secs")]
    pub scheduler_tick_secs: u64,

    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(".sift-cache")
}

fn default_refresh_interval_secs() -> u64 {
    DEFAULT_REFRESH_INTERVAL_SECS
}

fn default_scheduler_tick_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("sift/", env!("CARGO_PKG_VERSION"), " (subscription-sync)").to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            default_refresh_interval_secs: default_refresh_interval_secs(),
            scheduler_tick_secs: default_scheduler_tick_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("config {} not found, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(EngineError::Io(e)),
        };

        serde_json::from_str(&text).map_err(|source| EngineError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_secs.max(1))
    }
}
