//! Rule Index
//!
//! The immutable snapshot every match runs against. Network rules are
//! bucketed by signature token (one bucket map per rule kind) with a
//! residual bucket for rules that have no usable token; cosmetic rules are
//! bucketed by target domain.
//!
//! A built index is never mutated. New rule sets produce a new index,
//! which the subscription layer swaps in atomically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::psl::walk_host_suffixes;
use crate::rule::{CosmeticRule, NetworkRule};
use crate::types::{RuleKind, SubscriptionId};
use crate::url::tokenize_url;

// =============================================================================
// Rule Buckets
// =============================================================================

#[derive(Debug, Default)]
struct RuleBuckets {
    by_token: HashMap<String, Vec<Arc<NetworkRule>>>,
    residual: Vec<Arc<NetworkRule>>,
}

impl RuleBuckets {
    fn insert(&mut self, rule: Arc<NetworkRule>) {
        match &rule.token {
            Some(token) => self.by_token.entry(token.clone()).or_default().push(rule),
            None => self.residual.push(rule),
        }
    }

    fn candidates<'a>(&'a self, tokens: &'a [&'a str]) -> impl Iterator<Item = &'a Arc<NetworkRule>> + 'a {
        tokens
            .iter()
            .filter_map(move |token| self.by_token.get(*token))
            .flatten()
            .chain(self.residual.iter())
    }

    fn len(&self) -> usize {
        self.by_token.values().map(Vec::len).sum::<usize>() + self.residual.len()
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<NetworkRule>> {
        self.by_token.values().flatten().chain(self.residual.iter())
    }
}

// =============================================================================
// Rule Index
// =============================================================================

/// Immutable, shareable snapshot of the compiled rule set.
#[derive(Debug, Default)]
pub struct RuleIndex {
    version: u64,
    allow: RuleBuckets,
    block: RuleBuckets,
    cosmetic_generic: Vec<Arc<CosmeticRule>>,
    cosmetic_by_domain: HashMap<String, Vec<Arc<CosmeticRule>>>,
    cosmetic_count: usize,
    sources: HashMap<SubscriptionId, String>,
}

impl RuleIndex {
    /// An index with no rules; every request is allowed.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index. Pure: allocation only, insertion order is preserved
    /// inside every bucket.
    pub fn build<N, C>(rules: N, cosmetics: C) -> Self
    where
        N: IntoIterator<Item = Arc<NetworkRule>>,
        C: IntoIterator<Item = Arc<CosmeticRule>>,
    {
        let mut index = Self::default();

        for rule in rules {
            match rule.kind {
                RuleKind::Allow => index.allow.insert(rule),
                RuleKind::Block => index.block.insert(rule),
            }
        }

        for rule in cosmetics {
            index.cosmetic_count += 1;
            match rule.domains.as_ref().filter(|d| !d.is_generic()) {
                Some(domains) => {
                    for domain in domains.include() {
                        index
                            .cosmetic_by_domain
                            .entry(domain.clone())
                            .or_default()
                            .push(Arc::clone(&rule));
                    }
                }
                None => index.cosmetic_generic.push(rule),
            }
        }

        index
    }

    /// Stamp the snapshot with its publication version.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Attach subscription titles for match attribution.
    pub fn with_sources(mut self, sources: HashMap<SubscriptionId, String>) -> Self {
        self.sources = sources;
        self
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn subscription_title(&self, id: SubscriptionId) -> Option<&str> {
        self.sources.get(&id).map(String::as_str)
    }

    /// Candidate rules of one kind for pre-tokenized, lower-cased URL tokens:
    /// token buckets in token order, then the residual bucket.
    pub fn candidates<'a>(
        &'a self,
        kind: RuleKind,
        tokens: &'a [&'a str],
    ) -> impl Iterator<Item = &'a Arc<NetworkRule>> + 'a {
        let buckets = match kind {
            RuleKind::Allow => &self.allow,
            RuleKind::Block => &self.block,
        };
        buckets.candidates(tokens)
    }

    /// Lazily yield every rule that may match `url` (expected lower-cased):
    /// Allow candidates first, then Block candidates.
    pub fn candidates_for<'a>(&'a self, url: &'a str) -> impl Iterator<Item = &'a Arc<NetworkRule>> + 'a {
        let tokens = tokenize_url(url);
        let allow_tokens = tokens.clone();
        allow_tokens
            .into_iter()
            .filter_map(move |token| self.allow.by_token.get(token))
            .flatten()
            .chain(self.allow.residual.iter())
            .chain(
                tokens
                    .into_iter()
                    .filter_map(move |token| self.block.by_token.get(token))
                    .flatten()
                    .chain(self.block.residual.iter()),
            )
    }

    /// Cosmetic rules that apply to a lower-cased document host, generic
    /// rules first. A rule listed under several domains is yielded once.
    pub fn cosmetic_candidates(&self, host: &str) -> Vec<&Arc<CosmeticRule>> {
        let mut out: Vec<&Arc<CosmeticRule>> = self
            .cosmetic_generic
            .iter()
            .filter(|rule| rule.applies_to(host))
            .collect();

        // generic rules never sit in a domain bucket
        let mut scoped: HashSet<*const CosmeticRule> = HashSet::new();
        for suffix in walk_host_suffixes(host) {
            if let Some(bucket) = self.cosmetic_by_domain.get(suffix) {
                for rule in bucket {
                    if rule.applies_to(host) && scoped.insert(Arc::as_ptr(rule)) {
                        out.push(rule);
                    }
                }
            }
        }

        out
    }

    /// All network rules in the snapshot, unordered.
    pub fn network_rules(&self) -> impl Iterator<Item = &Arc<NetworkRule>> {
        self.allow.iter().chain(self.block.iter())
    }

    pub fn network_rule_count(&self) -> usize {
        self.allow.len() + self.block.len()
    }

    pub fn cosmetic_rule_count(&self) -> usize {
        self.cosmetic_count
    }

    pub fn token_count(&self) -> usize {
        self.allow.by_token.len() + self.block.by_token.len()
    }

    pub fn residual_count(&self) -> usize {
        self.allow.residual.len() + self.block.residual.len()
    }

    /// Whether any rule in the snapshot came from `id`.
    pub fn contains_subscription(&self, id: SubscriptionId) -> bool {
        self.network_rules().any(|r| r.subscription == id)
            || self.cosmetic_generic.iter().any(|r| r.subscription == id)
            || self.cosmetic_by_domain.values().flatten().any(|r| r.subscription == id)
    }
}
