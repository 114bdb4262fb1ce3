//! Subscription Manager
//!
//! Owns every subscription and the currently published [`RuleIndex`].
//! Each subscription moves through `Idle -> Fetching -> Parsing ->
//! Published`; a failed fetch drops back to `Idle` and keeps whatever rules
//! the subscription had before.
//!
//! Publication always rebuilds from scratch: the parsed lists of all enabled
//! subscriptions are aggregated into a fresh index which replaces the
//! current one with a single pointer swap. Readers holding the previous
//! snapshot keep using it until they drop it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use sift_compiler::{build_index, parse_filter_list, ParsedList};
use sift_core::index::RuleIndex;
use sift_core::types::SubscriptionId;

use crate::cache::{CacheMetadata, SubscriptionCache};
use crate::config::EngineConfig;
use crate::error::{CacheError, EngineError, FetchError};
use crate::facade::Interceptor;
use crate::fetch::Fetcher;
use crate::subscription::{unix_now, Subscription, SubscriptionState, SubscriptionStatus};

/// Shared handle to the current index snapshot.
pub type IndexHandle = Arc<ArcSwap<RuleIndex>>;

struct Entry {
    subscription: Subscription,
    parsed: Option<Arc<ParsedList>>,
    state: SubscriptionState,
    last_error: Option<String>,
    /// Rules are part of the current index
    loaded: bool,
    /// Cancelled when the subscription is removed or the engine shuts down
    cancel: CancellationToken,
}

impl Entry {
    fn status(&self) -> SubscriptionStatus {
        SubscriptionStatus {
            subscription: self.subscription.clone(),
            state: self.state,
            last_error: self.last_error.clone(),
            loaded: self.loaded,
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: u32,
    entries: Vec<Entry>,
}

impl Registry {
    fn get_mut(&mut self, id: SubscriptionId) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.subscription.id == id)
    }

    fn metadata(&self, filtering_enabled: bool) -> CacheMetadata {
        CacheMetadata {
            next_id: self.next_id,
            subscriptions: self.entries.iter().map(|e| e.subscription.clone()).collect(),
            filtering_enabled,
        }
    }
}

pub struct SubscriptionManager {
    config: EngineConfig,
    fetcher: Arc<dyn Fetcher>,
    cache: SubscriptionCache,
    index: IndexHandle,
    /// Engine-wide switch shared with every [`Interceptor`]
    filtering: Arc<AtomicBool>,
    version: watch::Sender<u64>,
    /// Never held across an await
    registry: Mutex<Registry>,
    /// Serializes rebuild + publish so versions are monotonic
    rebuild_lock: tokio::sync::Mutex<()>,
    persist_lock: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl SubscriptionManager {
    /// Open the manager on its cache directory.
    ///
    /// Cached list texts are parsed in parallel and published as the
    /// initial index, so no network access is needed at startup. A cache
    /// entry that cannot be read is discarded and its subscription is
    /// treated as never fetched, which makes it due for refresh right away.
    pub async fn open(config: EngineConfig, fetcher: Arc<dyn Fetcher>) -> Result<Self, EngineError> {
        let cache = SubscriptionCache::new(&config.cache_dir);
        cache.ensure_dir().await?;

        let metadata = match cache.load_metadata().await {
            Ok(metadata) => metadata.unwrap_or_default(),
            Err(CacheError::Malformed { path, reason }) => {
                log::warn!("discarding malformed cache metadata {}: {}", path.display(), reason);
                CacheMetadata::default()
            }
            Err(e) => return Err(e.into()),
        };

        let mut parsed = load_cached_lists(&cache, &metadata.subscriptions).await;
        let filtering = Arc::new(AtomicBool::new(metadata.filtering_enabled));
        let shutdown = CancellationToken::new();

        let max_id = metadata.subscriptions.iter().map(|s| s.id.0).max().unwrap_or(0);
        let mut registry = Registry {
            next_id: metadata.next_id.max(max_id + 1).max(1),
            entries: Vec::with_capacity(metadata.subscriptions.len()),
        };

        for mut subscription in metadata.subscriptions {
            let list = parsed.remove(&subscription.id).map(Arc::new);
            match &list {
                Some(list) => subscription.stats = list.stats,
                None => subscription.last_fetched = None,
            }
            registry.entries.push(Entry {
                subscription,
                parsed: list,
                state: SubscriptionState::Idle,
                last_error: None,
                loaded: false,
                cancel: shutdown.child_token(),
            });
        }

        let (version, _) = watch::channel(0);
        let manager = Self {
            fetcher,
            cache,
            index: Arc::new(ArcSwap::from_pointee(RuleIndex::empty())),
            filtering,
            version,
            registry: Mutex::new(registry),
            rebuild_lock: tokio::sync::Mutex::new(()),
            persist_lock: tokio::sync::Mutex::new(()),
            shutdown,
            config,
        };

        manager.rebuild().await?;
        Ok(manager)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Handle for readers; see [`Interceptor`](crate::facade::Interceptor).
    pub fn index_handle(&self) -> IndexHandle {
        Arc::clone(&self.index)
    }

    pub fn current_index(&self) -> Arc<RuleIndex> {
        self.index.load_full()
    }

    /// Interceptor over the current index that follows the filtering switch.
    pub fn interceptor(&self) -> Interceptor {
        Interceptor::new(self.index_handle()).with_switch(Arc::clone(&self.filtering))
    }

    pub fn is_filtering_enabled(&self) -> bool {
        self.filtering.load(Ordering::Acquire)
    }

    /// Turn filtering on or off for the whole engine. Subscriptions and the
    /// published index are left alone; interceptors allow everything and
    /// inject nothing while it is off, and scheduled refreshes pause.
    pub async fn set_filtering_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        if self.filtering.swap(enabled, Ordering::AcqRel) == enabled {
            return Ok(());
        }
        log::info!("filtering {}", if enabled { "enabled" } else { "disabled" });
        self.persist().await
    }

    /// Version of the current index. Starts at 1 after `open`.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    /// Notified with the new version after every publication.
    pub fn subscribe_version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel every in-flight fetch. Nothing cancelled is published.
    pub fn shutdown(&self) {
        log::info!("subscription manager shutting down");
        self.shutdown.cancel();
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionStatus> {
        self.registry().entries.iter().map(Entry::status).collect()
    }

    pub fn subscription(&self, id: SubscriptionId) -> Option<SubscriptionStatus> {
        self.registry()
            .entries
            .iter()
            .find(|e| e.subscription.id == id)
            .map(Entry::status)
    }

    /// Register a subscription. The list is not fetched here: a subscription
    /// that was never fetched is due immediately, so the scheduler or an
    /// explicit [`refresh_now`](Self::refresh_now) picks it up.
    pub async fn add(&self, locator: &str, title: &str) -> Result<SubscriptionId, EngineError> {
        let locator = locator.trim();
        let id = {
            let mut registry = self.registry();
            if registry.entries.iter().any(|e| e.subscription.locator == locator) {
                return Err(EngineError::DuplicateSubscription(locator.to_string()));
            }
            let id = SubscriptionId(registry.next_id);
            registry.next_id += 1;
            registry.entries.push(Entry {
                subscription: Subscription::new(id, locator, title, self.config.default_refresh_interval_secs),
                parsed: None,
                state: SubscriptionState::Idle,
                last_error: None,
                loaded: false,
                cancel: self.shutdown.child_token(),
            });
            id
        };

        log::info!("added subscription {} {:?} ({})", id, title, locator);
        self.persist().await?;
        Ok(id)
    }

    /// Delete a subscription, cancel its fetch and drop its rules.
    pub async fn remove(&self, id: SubscriptionId) -> Result<(), EngineError> {
        let entry = {
            let mut registry = self.registry();
            let pos = registry
                .entries
                .iter()
                .position(|e| e.subscription.id == id)
                .ok_or(EngineError::UnknownSubscription(id))?;
            registry.entries.remove(pos)
        };
        entry.cancel.cancel();
        log::info!("removed subscription {} {:?}", id, entry.subscription.title);

        if let Err(e) = self.cache.remove_text(id).await {
            log::warn!("failed to remove cached text of {}: {}", id, e);
        }
        self.persist().await?;
        // an in-flight rebuild may still publish rules read before the removal
        if entry.loaded || entry.parsed.is_some() {
            self.rebuild().await?;
        }
        Ok(())
    }

    pub async fn set_enabled(&self, id: SubscriptionId, enabled: bool) -> Result<(), EngineError> {
        let changed = {
            let mut registry = self.registry();
            let entry = registry.get_mut(id).ok_or(EngineError::UnknownSubscription(id))?;
            let changed = entry.subscription.enabled != enabled;
            entry.subscription.enabled = enabled;
            changed
        };
        if !changed {
            return Ok(());
        }

        log::info!("{} subscription {}", if enabled { "enabled" } else { "disabled" }, id);
        self.persist().await?;
        self.rebuild().await?;
        Ok(())
    }

    /// Fetch, parse and publish one subscription.
    ///
    /// On failure the subscription keeps its previous rules and the error is
    /// recorded in its status.
    pub async fn refresh_now(&self, id: SubscriptionId) -> Result<(), EngineError> {
        self.fetch_and_parse(id).await?;
        self.rebuild().await?;
        self.mark_published(&[id]);
        Ok(())
    }

    /// Refresh every enabled subscription and publish once.
    /// Returns how many were refreshed successfully.
    pub async fn refresh_all(&self) -> Result<usize, EngineError> {
        let ids: Vec<SubscriptionId> = self
            .registry()
            .entries
            .iter()
            .filter(|e| e.subscription.enabled)
            .map(|e| e.subscription.id)
            .collect();
        self.refresh_many(ids).await
    }

    /// Refresh enabled subscriptions whose interval has elapsed or that were
    /// never fetched.
    /// Nothing is due while filtering is switched off.
    pub async fn refresh_due(&self) -> Result<usize, EngineError> {
        if !self.is_filtering_enabled() {
            log::debug!("filtering disabled, skipping due refreshes");
            return Ok(0);
        }
        let now = unix_now();
        let ids: Vec<SubscriptionId> = self
            .registry()
            .entries
            .iter()
            .filter(|e| e.subscription.is_due(now))
            .map(|e| e.subscription.id)
            .collect();
        self.refresh_many(ids).await
    }

    async fn refresh_many(&self, ids: Vec<SubscriptionId>) -> Result<usize, EngineError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut refreshed = Vec::with_capacity(ids.len());
        for id in ids {
            if self.shutdown.is_cancelled() {
                break;
            }
            match self.fetch_and_parse(id).await {
                Ok(()) => refreshed.push(id),
                Err(e) if e.is_cancelled() => log::debug!("refresh of {} cancelled", id),
                Err(e) => log::warn!("refresh of {} failed: {}", id, e),
            }
        }

        if !refreshed.is_empty() {
            self.rebuild().await?;
            self.mark_published(&refreshed);
        }
        Ok(refreshed.len())
    }

    async fn fetch_and_parse(&self, id: SubscriptionId) -> Result<(), EngineError> {
        let (locator, cancel) = {
            let mut registry = self.registry();
            let entry = registry.get_mut(id).ok_or(EngineError::UnknownSubscription(id))?;
            entry.state = SubscriptionState::Fetching;
            (entry.subscription.locator.clone(), entry.cancel.clone())
        };

        log::info!("fetching {} from {}", id, locator);
        let fetched = tokio::select! {
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            result = self.fetcher.fetch(&locator) => result,
        };
        let text = match fetched {
            Ok(text) => text,
            Err(e) => {
                if !matches!(e, FetchError::Cancelled) {
                    log::warn!("fetch of {} failed: {}", id, e);
                }
                self.record_failure(id, e.to_string());
                return Err(e.into());
            }
        };

        self.set_state(id, SubscriptionState::Parsing);
        let parsed = tokio::task::spawn_blocking(move || {
            let parsed = parse_filter_list(&text, id);
            (text, parsed)
        })
        .await;
        let (text, parsed) = match parsed {
            Ok(result) => result,
            Err(e) => {
                log::error!("parsing {} failed: {}", id, e);
                self.record_failure(id, e.to_string());
                return Err(EngineError::IndexBuild(e.to_string()));
            }
        };

        if cancel.is_cancelled() {
            log::debug!("discarding parsed list of cancelled subscription {}", id);
            return Err(FetchError::Cancelled.into());
        }

        self.cache_text(id, &text, &cancel).await?;

        log::info!(
            "parsed {}: {} rules accepted, {} lines skipped",
            id,
            parsed.stats.rules_accepted,
            parsed.stats.lines_skipped
        );

        {
            let mut registry = self.registry();
            let Some(entry) = registry.get_mut(id) else {
                return Err(FetchError::Cancelled.into());
            };
            entry.subscription.last_fetched = Some(unix_now());
            entry.subscription.stats = parsed.stats;
            entry.parsed = Some(Arc::new(parsed));
            entry.last_error = None;
        }

        self.persist().await?;
        Ok(())
    }

    /// Aggregate all enabled subscriptions and publish a new index.
    ///
    /// If the build fails the current index stays in place.
    pub async fn rebuild(&self) -> Result<u64, EngineError> {
        let _guard = self.rebuild_lock.lock().await;

        let (lists, sources, included) = {
            let registry = self.registry();
            let mut lists = Vec::new();
            let mut sources = HashMap::new();
            let mut included = Vec::new();
            for entry in registry.entries.iter().filter(|e| e.subscription.enabled) {
                if let Some(parsed) = &entry.parsed {
                    lists.push(Arc::clone(parsed));
                    sources.insert(entry.subscription.id, entry.subscription.title.clone());
                    included.push(entry.subscription.id);
                }
            }
            (lists, sources, included)
        };

        let version = *self.version.borrow() + 1;
        let built = tokio::task::spawn_blocking(move || {
            let (index, stats) = build_index(lists.iter().map(Arc::as_ref));
            (index.with_version(version).with_sources(sources), stats)
        })
        .await;
        let (index, stats) = match built {
            Ok(built) => built,
            Err(e) => {
                log::error!("index rebuild failed, keeping version {}: {}", version - 1, e);
                return Err(EngineError::IndexBuild(e.to_string()));
            }
        };

        self.index.store(Arc::new(index));
        self.version.send_replace(version);

        {
            let mut registry = self.registry();
            for entry in registry.entries.iter_mut() {
                entry.loaded = included.contains(&entry.subscription.id);
                match entry.state {
                    SubscriptionState::Idle if entry.loaded => entry.state = SubscriptionState::Published,
                    SubscriptionState::Published if !entry.loaded => entry.state = SubscriptionState::Idle,
                    _ => {}
                }
            }
        }

        log::info!(
            "published index v{}: {} network rules, {} cosmetic rules from {} lists",
            version,
            stats.network_rules,
            stats.cosmetic_rules,
            stats.lists
        );
        Ok(version)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, id: SubscriptionId, state: SubscriptionState) {
        if let Some(entry) = self.registry().get_mut(id) {
            entry.state = state;
        }
    }

    fn record_failure(&self, id: SubscriptionId, error: String) {
        if let Some(entry) = self.registry().get_mut(id) {
            entry.state = SubscriptionState::Idle;
            entry.last_error = Some(error);
        }
    }

    fn mark_published(&self, ids: &[SubscriptionId]) {
        let mut registry = self.registry();
        for entry in registry.entries.iter_mut().filter(|e| ids.contains(&e.subscription.id)) {
            entry.state = if entry.loaded {
                SubscriptionState::Published
            } else {
                SubscriptionState::Idle
            };
        }
    }

    /// Write the fetched text. A removal that lands during the write leaves
    /// no orphan file behind.
    async fn cache_text(&self, id: SubscriptionId, text: &str, cancel: &CancellationToken) -> Result<(), EngineError> {
        if let Err(e) = self.cache.store_text(id, text).await {
            log::warn!("failed to cache list text of {}: {}", id, e);
        }
        if cancel.is_cancelled() {
            if let Err(e) = self.cache.remove_text(id).await {
                log::warn!("failed to remove cached text of {}: {}", id, e);
            }
            return Err(FetchError::Cancelled.into());
        }
        Ok(())
    }

    async fn persist(&self) -> Result<(), EngineError> {
        let _guard = self.persist_lock.lock().await;
        let metadata = self.registry().metadata(self.is_filtering_enabled());
        self.cache.save_metadata(&metadata).await?;
        Ok(())
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Read and parse every cached list text in parallel. Lists that are missing
/// or unreadable are left out.
async fn load_cached_lists(
    cache: &SubscriptionCache,
    subscriptions: &[Subscription],
) -> HashMap<SubscriptionId, ParsedList> {
    let mut tasks = JoinSet::new();
    for subscription in subscriptions.iter().filter(|s| s.last_fetched.is_some()) {
        let cache = cache.clone();
        let id = subscription.id;
        tasks.spawn_blocking(move || {
            let parsed = cache
                .load_text(id)
                .map(|text| text.map(|text| parse_filter_list(&text, id)));
            (id, parsed)
        });
    }

    let mut lists = HashMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((id, Ok(Some(parsed)))) => {
                log::debug!("loaded {} from cache: {} rules", id, parsed.stats.rules_accepted);
                lists.insert(id, parsed);
            }
            Ok((id, Ok(None))) => log::warn!("cached text of {} is missing, will refetch", id),
            Ok((id, Err(e))) => log::warn!("discarding cache of {}: {}", id, e),
            Err(e) => log::error!("cache load task failed: {}", e),
        }
    }
    lists
}
