//! Core Matching Engine
//!
//! This is the hot path - every request goes through here. Candidate
//! generation comes from the index buckets, so the cost of a decision is
//! bounded by the number of candidates, not the size of the rule set.

use std::collections::HashSet;
use std::sync::Arc;

use crate::index::RuleIndex;
use crate::request::{Decision, RequestDescriptor};
use crate::rule::{NetworkRule, Pattern};
use crate::types::{AnchorFlags, RuleKind};
use crate::url::{is_boundary_char, tokenize_url};

// =============================================================================
// Matcher
// =============================================================================

/// The core matching engine over one index snapshot.
pub struct Matcher<'a> {
    index: &'a RuleIndex,
}

impl<'a> Matcher<'a> {
    /// Create a new matcher with the given snapshot.
    pub fn new(index: &'a RuleIndex) -> Self {
        Self { index }
    }

    /// Match a request and return the decision.
    ///
    /// Exception rules are scanned first and the first match allows the
    /// request; otherwise the first matching block rule blocks it. No match
    /// allows.
    pub fn decide(&self, request: &RequestDescriptor) -> Decision {
        let tokens = tokenize_url(request.url_lower());

        if let Some(rule) = self.first_match(RuleKind::Allow, &tokens, request) {
            log::trace!("request {} allowed by {}", request.url(), rule.raw);
            return Decision::Allow;
        }

        match self.first_match(RuleKind::Block, &tokens, request) {
            Some(rule) => Decision::Block(rule.clone()),
            None => Decision::Allow,
        }
    }

    /// Selectors to hide on a document host, de-duplicated in rule order,
    /// with exception selectors removed.
    pub fn cosmetic_selectors(&self, host: &str) -> Vec<&'a str> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let candidates = self.index.cosmetic_candidates(&host);

        let exceptions: HashSet<&str> = candidates
            .iter()
            .filter(|rule| rule.exception)
            .map(|rule| rule.selector.as_str())
            .collect();

        let mut seen: HashSet<&str> = HashSet::new();
        let mut selectors = Vec::new();
        for rule in candidates {
            let selector = rule.selector.as_str();
            if rule.exception || exceptions.contains(selector) || !seen.insert(selector) {
                continue;
            }
            selectors.push(selector);
        }

        selectors
    }

    fn first_match<'t>(
        &'t self,
        kind: RuleKind,
        tokens: &'t [&'t str],
        request: &RequestDescriptor,
    ) -> Option<&'t Arc<NetworkRule>> {
        self.index
            .candidates(kind, tokens)
            .find(|rule| rule_matches(rule, request))
    }
}

/// Convenience wrapper: decide one request against a snapshot.
pub fn decide(index: &RuleIndex, request: &RequestDescriptor) -> Decision {
    Matcher::new(index).decide(request)
}

// =============================================================================
// Rule Verification
// =============================================================================

/// Check every constraint of a candidate rule, cheapest first.
pub fn rule_matches(rule: &NetworkRule, request: &RequestDescriptor) -> bool {
    if !rule.resource_types.intersects(request.resource_type()) {
        return false;
    }
    if !rule.party.allows(request.is_third_party()) {
        return false;
    }
    if let Some(domains) = &rule.domains {
        if !domains.allows(request.document_host()) {
            return false;
        }
    }
    let url = if rule.case_sensitive {
        request.url()
    } else {
        request.url_lower()
    };
    pattern_matches(&rule.pattern, url, request.label_starts())
}

/// Left-to-right segment match of a pattern against a URL.
///
/// The first segment is pinned by the start anchors, the last by the end
/// anchor, and every segment must be found after the previous one ends.
pub fn pattern_matches(pattern: &Pattern, url: &str, label_starts: &[usize]) -> bool {
    if pattern.is_wildcard_only() {
        return true;
    }
    let segments = pattern.segments();
    if segments.is_empty() {
        return false;
    }

    let url = url.as_bytes();
    let anchors = pattern.anchors();
    let last = segments.len() - 1;
    let mut pos = 0usize;

    for (i, segment) in segments.iter().enumerate() {
        let segment = segment.as_bytes();
        let pinned_end = i == last && anchors.contains(AnchorFlags::END_OF_URL);
        let ends_ok = |end: usize| !pinned_end || end == url.len();

        if i == 0 && anchors.contains(AnchorFlags::START_OF_URL) {
            match match_at(url, 0, segment) {
                Some(end) if ends_ok(end) => pos = end,
                _ => return false,
            }
        } else if i == 0 && anchors.contains(AnchorFlags::DOMAIN_START) {
            match label_starts
                .iter()
                .filter_map(|&start| match_at(url, start, segment))
                .find(|&end| ends_ok(end))
            {
                Some(end) => pos = end,
                None => return false,
            }
        } else if pinned_end {
            return (pos..=url.len()).any(|start| match_at(url, start, segment) == Some(url.len()));
        } else {
            match find_segment(url, pos, segment) {
                Some(end) => pos = end,
                None => return false,
            }
        }
    }

    true
}

/// Match one segment at exactly `start`; returns the end position.
///
/// `^` matches a separator character or the end of the URL (zero width).
#[inline]
fn match_at(url: &[u8], start: usize, segment: &[u8]) -> Option<usize> {
    let mut pos = start;
    for &b in segment {
        if b == b'^' {
            if pos == url.len() {
                continue;
            }
            if !is_boundary_char(url[pos]) {
                return None;
            }
        } else if pos >= url.len() || url[pos] != b {
            return None;
        }
        pos += 1;
    }
    Some(pos)
}

/// Leftmost match of a segment at or after `from`; returns the end position.
fn find_segment(url: &[u8], from: usize, segment: &[u8]) -> Option<usize> {
    let literal_len = segment.iter().position(|&b| b == b'^').unwrap_or(segment.len());
    let literal = &segment[..literal_len];

    let mut start = from;
    while start <= url.len() {
        if !literal.is_empty() {
            let offset = url[start..]
                .windows(literal.len())
                .position(|window| window == literal)?;
            start += offset;
        }
        if let Some(end) = match_at(url, start, segment) {
            return Some(end);
        }
        start += 1;
    }

    None
}
