use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use sift_compiler::ParseStats;
use sift_core::types::SubscriptionId;

/// Persisted description of one filter-list subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub locator: String,
    pub title: String,
    pub enabled: bool,
    /// Unix seconds of the last successful fetch, `None` if never fetched
    #[serde(default)]
    pub last_fetched: Option<u64>,
    pub refresh_interval_secs: u64,
    #[serde(default)]
    pub stats: ParseStats,
}

impl Subscription {
    pub fn new(id: SubscriptionId, locator: impl Into<String>, title: impl Into<String>, refresh_interval_secs: u64) -> Self {
        Self {
            id,
            locator: locator.into(),
            title: title.into(),
            enabled: true,
            last_fetched: None,
            refresh_interval_secs,
            stats: ParseStats::default(),
        }
    }

    /// Enabled and either never fetched or older than its refresh interval.
    pub fn is_due(&self, now: u64) -> bool {
        if !self.enabled {
            return false;
        }
        match self.last_fetched {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.refresh_interval_secs,
        }
    }
}

/// Lifecycle state of a subscription inside the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    #[default]
    Idle,
    Fetching,
    Parsing,
    Published,
}

/// Point-in-time view of a subscription for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionStatus {
    #[serde(flatten)]
    pub subscription: Subscription,
    pub state: SubscriptionState,
    /// Last fetch failure, cleared by the next successful fetch
    pub last_error: Option<String>,
    /// Rules of this subscription are in the current index
    pub loaded: bool,
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
