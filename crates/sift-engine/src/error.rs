use std::path::PathBuf;

use sift_core::types::SubscriptionId;

/// Failure to obtain a subscription's list text.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{locator} returned HTTP {status}")]
    Status { locator: String, status: u16 },

    #[error("cannot read {path}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported locator: {0}")]
    UnsupportedLocator(String),

    #[error("fetch cancelled")]
    Cancelled,
}

/// Failure reading or writing the on-disk cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed cache file {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("index build failed: {0}")]
    IndexBuild(String),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("unknown subscription {0}")]
    UnknownSubscription(SubscriptionId),

    #[error("already subscribed to {0}")]
    DuplicateSubscription(String),

    #[error("invalid config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The operation was abandoned because its subscription was removed or
    /// the engine shut down.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Fetch(FetchError::Cancelled))
    }
}
