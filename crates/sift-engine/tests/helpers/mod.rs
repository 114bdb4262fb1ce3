#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sift_engine::{EngineConfig, FetchError, Fetcher, SubscriptionManager};
use tokio::sync::Notify;

pub const EASYLIST: &str = "[Adblock Plus 2.0]\n\
                            ! Title: EasyList\n\
                            ||ads.example.com^\n\
                            /banner/*$image\n\
                            @@||ads.example.com/allowed.js\n\
                            ##.ad-banner\n";

pub const TRACKERS: &str = "! Title: Trackers\n\
                            ||tracker.net^$third-party\n\
                            0.0.0.0 metrics.example.org\n\
                            example.com##.tracking-pixel\n";

/// In-memory fetcher. Unknown locators answer HTTP 404; a gated fetcher
/// waits for `release()` before answering.
#[derive(Default)]
pub struct MockFetcher {
    lists: Mutex<HashMap<String, String>>,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let fetcher = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (fetcher, gate)
    }

    pub fn with_list(self, locator: &str, text: &str) -> Self {
        self.set_list(locator, text);
        self
    }

    pub fn set_list(&self, locator: &str, text: &str) {
        self.lists.lock().unwrap().insert(locator.to_string(), text.to_string());
    }

    pub fn remove_list(&self, locator: &str) {
        self.lists.lock().unwrap().remove(locator);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for MockFetcher {
    async fn fetch(&self, locator: &str) -> Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let found = self.lists.lock().unwrap().get(locator).cloned();
        found.ok_or_else(|| FetchError::Status {
            locator: locator.to_string(),
            status: 404,
        })
    }
}

pub async fn open_manager(dir: &Path, fetcher: Arc<MockFetcher>) -> SubscriptionManager {
    let config = EngineConfig::default().with_cache_dir(dir);
    SubscriptionManager::open(config, fetcher).await.unwrap()
}
