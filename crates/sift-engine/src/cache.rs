//! On-disk subscription cache
//!
//! Layout under the cache directory:
//!
//! - `subscriptions.json`: [`CacheMetadata`] for every subscription
//! - `<id>.txt`: raw list text of the last successful fetch
//!
//! Files are written to a temporary name and renamed into place, so a crash
//! mid-write leaves the previous version intact.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sift_core::types::SubscriptionId;

use crate::error::CacheError;
use crate::subscription::Subscription;

const METADATA_FILE: &str = "subscriptions.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub next_id: u32,
    pub subscriptions: Vec<Subscription>,
    /// Engine-wide filtering switch
    #[serde(default = "default_filtering_enabled")]
    pub filtering_enabled: bool,
}

fn default_filtering_enabled() -> bool {
    true
}

impl Default for CacheMetadata {
    fn default() -> Self {
        Self {
            next_id: 0,
            subscriptions: Vec::new(),
            filtering_enabled: default_filtering_enabled(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionCache {
    dir: PathBuf,
}

impl SubscriptionCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn text_path(&self, id: SubscriptionId) -> PathBuf {
        self.dir.join(format!("{}.txt", id.0))
    }

    pub async fn ensure_dir(&self) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    /// `Ok(None)` when no metadata has been written yet.
    pub async fn load_metadata(&self) -> Result<Option<CacheMetadata>, CacheError> {
        let path = self.metadata_path();
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::Malformed {
                path,
                reason: e.to_string(),
            })
    }

    pub async fn save_metadata(&self, metadata: &CacheMetadata) -> Result<(), CacheError> {
        let json = serde_json::to_vec_pretty(metadata).map_err(|e| CacheError::Malformed {
            path: self.metadata_path(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.metadata_path(), &json).await
    }

    /// Read cached list text. Blocking; meant for `spawn_blocking`.
    ///
    /// `Ok(None)` when nothing is cached. Text that is not valid UTF-8 is
    /// reported as malformed.
    pub fn load_text(&self, id: SubscriptionId) -> Result<Option<String>, CacheError> {
        let path = self.text_path(id);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(CacheError::Malformed {
                path,
                reason: e.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn store_text(&self, id: SubscriptionId, text: &str) -> Result<(), CacheError> {
        write_atomic(&self.text_path(id), text.as_bytes()).await
    }

    pub async fn remove_text(&self, id: SubscriptionId) -> Result<(), CacheError> {
        match tokio::fs::remove_file(self.text_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), CacheError> {
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
