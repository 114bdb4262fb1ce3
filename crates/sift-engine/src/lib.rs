//! Sift Engine
//!
//! Owns the lifecycle of filter-list subscriptions and exposes the
//! interception surface used by the network and rendering layers.
//!
//! # Architecture
//!
//! The [`SubscriptionManager`] fetches, caches and parses subscriptions off
//! the request path, aggregates every enabled list into a new
//! [`RuleIndex`](sift_core::RuleIndex) and publishes it with a single atomic
//! pointer swap. The [`Interceptor`] reads whatever snapshot is current,
//! never waiting on a rebuild.
//!
//! # Modules
//!
//! - `config`: Engine configuration
//! - `error`: Error types
//! - `fetch`: Subscription fetchers (HTTP and local files)
//! - `cache`: On-disk cache of list text and subscription metadata
//! - `subscription`: Subscription metadata and status
//! - `manager`: Subscription state machine and index publication
//! - `scheduler`: Periodic background refresh
//! - `facade`: Request interception, match events and cosmetic injection

pub mod cache;
pub mod config;
pub mod error;
pub mod facade;
pub mod fetch;
pub mod manager;
pub mod scheduler;
pub mod subscription;

pub use cache::{CacheMetadata, SubscriptionCache};
pub use config::EngineConfig;
pub use error::{CacheError, EngineError, FetchError};
pub use facade::{build_stylesheet, BlockedResponse, Interceptor, MatchEvent, MatchEventSink, NetworkErrorKind};
pub use fetch::{Fetcher, HttpFetcher};
pub use manager::{IndexHandle, SubscriptionManager};
pub use scheduler::RefreshScheduler;
pub use subscription::{Subscription, SubscriptionState, SubscriptionStatus};
