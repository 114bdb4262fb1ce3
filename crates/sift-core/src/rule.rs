//! Rule model
//!
//! Immutable value types produced by the filter parser. Rules are shared
//! between index snapshots behind `Arc`, so nothing here is ever mutated
//! after construction.

use std::fmt;

use crate::psl::walk_host_suffixes;
use crate::types::{AnchorFlags, PartyConstraint, ResourceType, RuleKind, SubscriptionId};
use crate::url::MIN_TOKEN_LEN;

/// Tokens present in nearly every URL; indexing under them buys nothing.
const COMMON_TOKENS: &[&str] = &["http", "https", "www", "com"];

// =============================================================================
// Pattern
// =============================================================================

/// URL pattern of a network rule.
///
/// The pattern body is split on `*` into literal segments. A segment may
/// contain `^`, which matches one separator character or the end of the URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pattern {
    segments: Vec<String>,
    anchors: AnchorFlags,
    wildcard_only: bool,
}

impl Pattern {
    /// Build a pattern from a body with its anchors already stripped.
    ///
    /// Returns `None` when the body is empty.
    pub fn new(body: &str, anchors: AnchorFlags) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        let segments: Vec<String> = body
            .split('*')
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .collect();
        let wildcard_only = segments.is_empty();
        Some(Self {
            segments,
            anchors,
            wildcard_only,
        })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn anchors(&self) -> AnchorFlags {
        self.anchors
    }

    /// Pattern is made of `*` only and matches every URL.
    pub fn is_wildcard_only(&self) -> bool {
        self.wildcard_only
    }

    /// Longest alphanumeric literal run usable as an index key.
    ///
    /// A run qualifies only when it is bounded on both sides inside the
    /// pattern, so it is guaranteed to appear as a whole alphanumeric run of
    /// any URL the pattern matches.
    pub fn signature_token(&self) -> Option<String> {
        let last = self.segments.len().checked_sub(1)?;
        let mut best: Option<&str> = None;

        for (i, segment) in self.segments.iter().enumerate() {
            let bytes = segment.as_bytes();
            let mut run_start = None;

            for pos in 0..=bytes.len() {
                let is_alnum = pos < bytes.len() && bytes[pos].is_ascii_alphanumeric();
                if is_alnum {
                    if run_start.is_none() {
                        run_start = Some(pos);
                    }
                    continue;
                }
                let Some(start) = run_start.take() else {
                    continue;
                };

                let left_bounded = start > 0
                    || (i == 0 && self.anchors.intersects(AnchorFlags::START_OF_URL | AnchorFlags::DOMAIN_START));
                let right_bounded =
                    pos < bytes.len() || (i == last && self.anchors.contains(AnchorFlags::END_OF_URL));
                let run = &segment[start..pos];

                if left_bounded
                    && right_bounded
                    && run.len() >= MIN_TOKEN_LEN
                    && !COMMON_TOKENS.iter().any(|t| t.eq_ignore_ascii_case(run))
                    && best.map_or(true, |b| run.len() > b.len())
                {
                    best = Some(run);
                }
            }
        }

        best.map(str::to_ascii_lowercase)
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.anchors.contains(AnchorFlags::DOMAIN_START) {
            f.write_str("||")?;
        } else if self.anchors.contains(AnchorFlags::START_OF_URL) {
            f.write_str("|")?;
        }
        if self.wildcard_only {
            f.write_str("*")?;
        } else {
            f.write_str(&self.segments.join("*"))?;
        }
        if self.anchors.contains(AnchorFlags::END_OF_URL) {
            f.write_str("|")?;
        }
        Ok(())
    }
}

// =============================================================================
// Domain Restriction
// =============================================================================

/// Included / excluded domain lists of a rule (`domain=a.com|~b.a.com`).
///
/// Entries are lower-cased. The most specific entry matching a host decides;
/// a host matching no entry is allowed only when there are no includes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct DomainRestriction {
    include: Vec<String>,
    exclude: Vec<String>,
}

/// The same domain was both included and excluded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("domain {0} is both included and excluded")]
pub struct ConflictingDomains(pub String);

impl DomainRestriction {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self, ConflictingDomains> {
        if let Some(conflict) = include.iter().find(|d| exclude.contains(d)) {
            return Err(ConflictingDomains(conflict.clone()));
        }
        Ok(Self { include, exclude })
    }

    pub fn include(&self) -> &[String] {
        &self.include
    }

    pub fn exclude(&self) -> &[String] {
        &self.exclude
    }

    /// Applies to every domain not explicitly excluded.
    pub fn is_generic(&self) -> bool {
        self.include.is_empty()
    }

    /// Check the restriction against a lower-cased hostname.
    pub fn allows(&self, host: &str) -> bool {
        for suffix in walk_host_suffixes(host) {
            if self.exclude.iter().any(|d| d == suffix) {
                return false;
            }
            if self.include.iter().any(|d| d == suffix) {
                return true;
            }
        }
        self.include.is_empty()
    }
}

// =============================================================================
// Network Rule
// =============================================================================

/// A parsed request-blocking or exception rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkRule {
    /// Original filter text, for attribution
    pub raw: String,
    pub kind: RuleKind,
    /// Lower-cased unless `case_sensitive`
    pub pattern: Pattern,
    pub resource_types: ResourceType,
    pub party: PartyConstraint,
    pub domains: Option<DomainRestriction>,
    pub case_sensitive: bool,
    /// `$badfilter`: cancels the identical rule instead of matching
    pub badfilter: bool,
    /// Index key, `None` for the residual bucket
    pub token: Option<String>,
    pub subscription: SubscriptionId,
}

impl NetworkRule {
    pub fn is_exception(&self) -> bool {
        self.kind == RuleKind::Allow
    }

    pub fn anchors(&self) -> AnchorFlags {
        self.pattern.anchors()
    }
}

impl fmt::Display for NetworkRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

// =============================================================================
// Cosmetic Rule
// =============================================================================

/// Element-hiding rule; the selector is an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CosmeticRule {
    pub raw: String,
    pub selector: String,
    /// `None` means global
    pub domains: Option<DomainRestriction>,
    /// `#@#` exception
    pub exception: bool,
    pub subscription: SubscriptionId,
}

impl CosmeticRule {
    pub fn is_generic(&self) -> bool {
        self.domains.as_ref().map_or(true, DomainRestriction::is_generic)
    }

    pub fn applies_to(&self, host: &str) -> bool {
        self.domains.as_ref().map_or(true, |d| d.allows(host))
    }
}

/// Either kind of parsed rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Network(NetworkRule),
    Cosmetic(CosmeticRule),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(body: &str, anchors: AnchorFlags) -> Pattern {
        Pattern::new(body, anchors).expect("non-empty pattern")
    }

    #[test]
    fn splits_segments_on_wildcards() {
        let p = pattern("ads*banner**.gif", AnchorFlags::empty());
        assert_eq!(p.segments(), ["ads", "banner", ".gif"]);
        assert!(!p.is_wildcard_only());
        assert!(pattern("**", AnchorFlags::empty()).is_wildcard_only());
        assert!(Pattern::new("", AnchorFlags::empty()).is_none());
    }

    #[test]
    fn picks_longest_bounded_token() {
        let p = pattern("ads.example.com^", AnchorFlags::DOMAIN_START);
        assert_eq!(p.signature_token().as_deref(), Some("example"));

        let p = pattern("/banner/ad.gif", AnchorFlags::empty());
        assert_eq!(p.signature_token().as_deref(), Some("banner"));
    }

    #[test]
    fn rejects_unbounded_runs() {
        // "tracker" touches an unanchored edge, "pixel" touches a wildcard
        let p = pattern("tracker/pixel*", AnchorFlags::empty());
        assert_eq!(p.signature_token(), None);

        let p = pattern("tracker/pixel", AnchorFlags::END_OF_URL);
        assert_eq!(p.signature_token().as_deref(), Some("pixel"));
    }

    #[test]
    fn skips_common_tokens() {
        let p = pattern("https://", AnchorFlags::START_OF_URL);
        assert_eq!(p.signature_token(), None);
    }

    #[test]
    fn displays_pattern() {
        let p = pattern("ads.example.com^", AnchorFlags::DOMAIN_START | AnchorFlags::END_OF_URL);
        assert_eq!(p.to_string(), "||ads.example.com^|");
    }

    #[test]
    fn domain_restriction_most_specific_wins() {
        let d = DomainRestriction::new(vec!["example.com".into()], vec!["safe.example.com".into()]).unwrap();
        assert!(d.allows("example.com"));
        assert!(d.allows("www.example.com"));
        assert!(!d.allows("safe.example.com"));
        assert!(!d.allows("a.safe.example.com"));
        assert!(!d.allows("other.com"));
    }

    #[test]
    fn domain_restriction_exclude_only() {
        let d = DomainRestriction::new(Vec::new(), vec!["safe.com".into()]).unwrap();
        assert!(d.is_generic());
        assert!(d.allows("other.com"));
        assert!(!d.allows("safe.com"));
        assert!(d.allows(""));
    }

    #[test]
    fn domain_restriction_rejects_overlap() {
        let err = DomainRestriction::new(vec!["a.com".into()], vec!["a.com".into()]).unwrap_err();
        assert_eq!(err, ConflictingDomains("a.com".into()));
    }
}
