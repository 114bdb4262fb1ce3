//! Interception Facade
//!
//! The call surface used by the network layer (`should_block`,
//! `intercept`) and by document rendering (`cosmetic_rules_for`,
//! `stylesheet_for`). Every call loads the current snapshot once and works
//! on it to the end, so a concurrent publication is never observed halfway.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use sift_core::matcher::Matcher;
use sift_core::request::{Decision, RequestDescriptor};
use sift_core::rule::NetworkRule;
use sift_core::types::{ResourceType, SubscriptionId};

use crate::manager::IndexHandle;

const BLOCKED_MESSAGE: &str = "Advertisement has been blocked";
const BLOCKED_STATUS: u16 = 403;

// =============================================================================
// Match Events
// =============================================================================

/// Record of a blocked request, for the block log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEvent {
    pub url: String,
    pub document_url: String,
    pub resource_type: ResourceType,
    pub decision: Decision,
    pub subscription_title: Option<String>,
    pub index_version: u64,
}

impl MatchEvent {
    pub fn rule(&self) -> Option<&Arc<NetworkRule>> {
        self.decision.rule()
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.rule().map(|r| r.subscription)
    }

    /// Filter text of the matched rule.
    pub fn pattern(&self) -> Option<&str> {
        self.rule().map(|r| r.raw.as_str())
    }
}

/// Consumer of match events. Called on the request path, so implementations
/// must not block.
pub trait MatchEventSink: Send + Sync {
    fn emit(&self, event: MatchEvent);
}

impl MatchEventSink for UnboundedSender<MatchEvent> {
    fn emit(&self, event: MatchEvent) {
        // a closed log is not an error for filtering
        let _ = self.send(event);
    }
}

// =============================================================================
// Blocked Response
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    ContentAccessDenied,
}

/// Terminal failure returned instead of performing a blocked request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedResponse {
    pub status: u16,
    pub error: NetworkErrorKind,
    pub message: &'static str,
    pub body: Vec<u8>,
    pub rule: Arc<NetworkRule>,
}

impl BlockedResponse {
    fn for_rule(rule: Arc<NetworkRule>) -> Self {
        Self {
            status: BLOCKED_STATUS,
            error: NetworkErrorKind::ContentAccessDenied,
            message: BLOCKED_MESSAGE,
            body: Vec::new(),
            rule,
        }
    }
}

impl fmt::Display for BlockedResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.status, self.message, self.rule.raw)
    }
}

// =============================================================================
// Interceptor
// =============================================================================

/// Cheap to clone; clones share the index handle, the filtering switch and
/// the event sink.
#[derive(Clone)]
pub struct Interceptor {
    index: IndexHandle,
    enabled: Arc<AtomicBool>,
    sink: Option<Arc<dyn MatchEventSink>>,
}

impl Interceptor {
    pub fn new(index: IndexHandle) -> Self {
        Self {
            index,
            enabled: Arc::new(AtomicBool::new(true)),
            sink: None,
        }
    }

    /// Follow an externally owned on/off switch instead of the built-in one.
    pub fn with_switch(mut self, enabled: Arc<AtomicBool>) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn with_sink(mut self, sink: Arc<dyn MatchEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Decide one request against the current snapshot. Never waits on a
    /// rebuild or on I/O. A block emits a [`MatchEvent`].
    pub fn should_block(&self, request: &RequestDescriptor) -> Decision {
        if !self.is_enabled() {
            return Decision::Allow;
        }
        let index = self.index.load();
        let decision = Matcher::new(&index).decide(request);

        if let (Decision::Block(rule), Some(sink)) = (&decision, &self.sink) {
            sink.emit(MatchEvent {
                url: request.url().to_string(),
                document_url: request.document_url().to_string(),
                resource_type: request.resource_type(),
                decision: decision.clone(),
                subscription_title: index.subscription_title(rule.subscription).map(str::to_string),
                index_version: index.version(),
            });
        }

        decision
    }

    /// The response to hand back for a blocked request, `None` to let it
    /// proceed.
    pub fn intercept(&self, request: &RequestDescriptor) -> Option<BlockedResponse> {
        match self.should_block(request) {
            Decision::Allow => None,
            Decision::Block(rule) => {
                log::debug!("blocked {} by {}", request.url(), rule.raw);
                Some(BlockedResponse::for_rule(rule))
            }
        }
    }

    /// Selectors to hide on a document domain, de-duplicated, exceptions
    /// applied.
    pub fn cosmetic_rules_for(&self, domain: &str) -> Vec<String> {
        if !self.is_enabled() {
            return Vec::new();
        }
        let index = self.index.load();
        Matcher::new(&index)
            .cosmetic_selectors(domain)
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Stylesheet to inject into a document, empty when nothing applies.
    pub fn stylesheet_for(&self, domain: &str) -> String {
        build_stylesheet(&self.cosmetic_rules_for(domain))
    }

    pub fn index_version(&self) -> u64 {
        self.index.load().version()
    }
}

/// Join selectors into one hiding rule.
pub fn build_stylesheet<S: AsRef<str>>(selectors: &[S]) -> String {
    if selectors.is_empty() {
        return String::new();
    }
    let joined: Vec<&str> = selectors.iter().map(AsRef::as_ref).collect();
    format!("{}{{display:none !important;}}", joined.join(",\n"))
}
