use std::net::IpAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use sift_core::rule::{ConflictingDomains, CosmeticRule, DomainRestriction, NetworkRule, Pattern, Rule};
use sift_core::types::{AnchorFlags, PartyConstraint, ResourceType, RuleKind, SubscriptionId};

/// Why a single filter line was skipped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseSkip {
    #[error("empty pattern")]
    EmptyPattern,
    #[error("regular expression patterns are not supported")]
    RegexPattern,
    #[error("invalid anchor placement")]
    BadAnchor,
    #[error("invalid domain: {0:?}")]
    BadDomain(String),
    #[error(transparent)]
    ConflictingDomains(#[from] ConflictingDomains),
    #[error("options exclude every resource type")]
    EmptyTypeMask,
    #[error("local hosts entry: {0}")]
    LocalHostsEntry(String),
    #[error("unsupported cosmetic syntax")]
    UnsupportedCosmetic,
    #[error("empty selector")]
    EmptySelector,
}

/// First-pass classification of a filter line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Blank,
    Comment,
    Cosmetic,
    Network,
}

/// Accepted/skipped counters for one filter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParseStats {
    pub rules_accepted: usize,
    pub lines_skipped: usize,
}

/// Result of parsing a whole filter list.
#[derive(Debug, Clone, Default)]
pub struct ParsedList {
    pub network: Vec<Arc<NetworkRule>>,
    pub cosmetic: Vec<Arc<CosmeticRule>>,
    pub stats: ParseStats,
}

/// Parse a filter list. Never fails: malformed lines are skipped and counted.
pub fn parse_filter_list(text: &str, subscription: SubscriptionId) -> ParsedList {
    let mut list = ParsedList::default();
    let text = text.trim_start_matches('\u{feff}');

    for (line_no, line) in text.lines().enumerate() {
        match parse_line(line, subscription) {
            Ok(Some(Rule::Network(rule))) => {
                list.stats.rules_accepted += 1;
                list.network.push(Arc::new(rule));
            }
            Ok(Some(Rule::Cosmetic(rule))) => {
                list.stats.rules_accepted += 1;
                list.cosmetic.push(Arc::new(rule));
            }
            Ok(None) => {}
            Err(skip) => {
                list.stats.lines_skipped += 1;
                log::debug!("{} line {}: skipped {:?} ({})", subscription, line_no + 1, line.trim(), skip);
            }
        }
    }

    list
}

pub fn classify_line(line: &str) -> LineKind {
    let line = line.trim();
    if line.is_empty() {
        return LineKind::Blank;
    }
    if line.starts_with('!') || (line.starts_with('[') && line.ends_with(']')) {
        return LineKind::Comment;
    }
    if line.starts_with('#') && is_hosts_comment(line) {
        return LineKind::Comment;
    }
    if find_cosmetic_marker(line).is_some() {
        return LineKind::Cosmetic;
    }
    if line.starts_with('#') {
        return LineKind::Comment;
    }
    LineKind::Network
}

/// `# note` and `#### Section ####` banners in hosts files. A global
/// cosmetic rule starts with its marker followed by a selector.
fn is_hosts_comment(line: &str) -> bool {
    match find_cosmetic_marker(line) {
        Some((0, marker, _)) => !starts_like_selector(&line[marker.len()..]),
        _ => true,
    }
}

fn starts_like_selector(selector: &str) -> bool {
    let mut chars = selector.chars();
    match chars.next() {
        None => true,
        Some(c) if c.is_whitespace() => false,
        Some('#') => matches!(chars.next(), Some(c) if c != '#' && !c.is_whitespace()),
        Some(_) => true,
    }
}

/// Parse one line. `Ok(None)` for blanks and comments.
pub fn parse_line(line: &str, subscription: SubscriptionId) -> Result<Option<Rule>, ParseSkip> {
    let line = line.trim();
    match classify_line(line) {
        LineKind::Blank | LineKind::Comment => Ok(None),
        LineKind::Cosmetic => parse_cosmetic_rule(line, subscription).map(|r| Some(Rule::Cosmetic(r))),
        LineKind::Network => parse_network_rule(line, subscription).map(|r| Some(Rule::Network(r))),
    }
}

// =============================================================================
// Cosmetic Rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CosmeticMarker {
    Hide,
    Exception,
    Unsupported,
}

const COSMETIC_MARKERS: &[(&str, CosmeticMarker)] = &[
    ("#@?#", CosmeticMarker::Unsupported),
    ("#@$#", CosmeticMarker::Unsupported),
    ("#@#", CosmeticMarker::Exception),
    ("#?#", CosmeticMarker::Unsupported),
    ("#$#", CosmeticMarker::Unsupported),
    ("##", CosmeticMarker::Hide),
];

fn find_cosmetic_marker(line: &str) -> Option<(usize, &'static str, CosmeticMarker)> {
    line.match_indices('#').find_map(|(idx, _)| {
        COSMETIC_MARKERS
            .iter()
            .find(|(marker, _)| line[idx..].starts_with(marker))
            .map(|(marker, kind)| (idx, *marker, *kind))
    })
}

fn parse_cosmetic_rule(line: &str, subscription: SubscriptionId) -> Result<CosmeticRule, ParseSkip> {
    let (idx, marker, kind) = find_cosmetic_marker(line).ok_or(ParseSkip::UnsupportedCosmetic)?;
    if kind == CosmeticMarker::Unsupported {
        return Err(ParseSkip::UnsupportedCosmetic);
    }

    let selector = line[idx + marker.len()..].trim();
    if selector.is_empty() {
        return Err(ParseSkip::EmptySelector);
    }

    let domains = parse_domain_list(&line[..idx], ',')?;

    Ok(CosmeticRule {
        raw: line.to_string(),
        selector: selector.to_string(),
        domains,
        exception: kind == CosmeticMarker::Exception,
        subscription,
    })
}

// =============================================================================
// Network Rules
// =============================================================================

fn parse_network_rule(line: &str, subscription: SubscriptionId) -> Result<NetworkRule, ParseSkip> {
    let mut rest = line;
    let mut kind = RuleKind::Block;
    if let Some(stripped) = rest.strip_prefix("@@") {
        kind = RuleKind::Allow;
        rest = stripped.trim_start();
    }

    if kind == RuleKind::Block {
        if let Some(domain) = parse_hosts_file_domain(rest)? {
            return hosts_rule(line, domain, subscription);
        }
    }

    if is_regex_rule(rest) {
        return Err(ParseSkip::RegexPattern);
    }

    let (pattern_part, options_text) = split_rule_options(rest);
    let options = match options_text {
        Some(options_text) => parse_options(options_text)?,
        None => ParsedOptions::default(),
    };

    let pattern = parse_pattern(pattern_part.trim(), options.case_sensitive)?;

    Ok(NetworkRule {
        raw: line.to_string(),
        kind,
        token: pattern.signature_token(),
        pattern,
        resource_types: options.resource_types,
        party: options.party,
        domains: options.domains,
        case_sensitive: options.case_sensitive,
        badfilter: options.badfilter,
        subscription,
    })
}

/// `0.0.0.0 ads.example.com` is treated as `||ads.example.com^`.
fn hosts_rule(line: &str, domain: String, subscription: SubscriptionId) -> Result<NetworkRule, ParseSkip> {
    let pattern = Pattern::new(&format!("{domain}^"), AnchorFlags::DOMAIN_START).ok_or(ParseSkip::EmptyPattern)?;
    Ok(NetworkRule {
        raw: line.to_string(),
        kind: RuleKind::Block,
        token: pattern.signature_token(),
        pattern,
        resource_types: ResourceType::ALL,
        party: PartyConstraint::Any,
        domains: None,
        case_sensitive: false,
        badfilter: false,
        subscription,
    })
}

/// `/body/` or `/body/$options`. Checked before splitting options since the
/// body may itself contain `$`.
fn is_regex_rule(text: &str) -> bool {
    if text.len() <= 2 || !text.starts_with('/') {
        return false;
    }
    match text.rfind('/') {
        Some(end) if end > 0 => {
            let tail = &text[end + 1..];
            tail.is_empty() || tail.starts_with('$')
        }
        _ => false,
    }
}

fn split_rule_options(line: &str) -> (&str, Option<&str>) {
    match line.rfind('$') {
        Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
        None => (line, None),
    }
}

fn parse_pattern(text: &str, case_sensitive: bool) -> Result<Pattern, ParseSkip> {
    if text.len() > 2 && text.starts_with('/') && text.ends_with('/') {
        return Err(ParseSkip::RegexPattern);
    }

    let mut anchors = AnchorFlags::empty();
    let mut body = text;
    if let Some(rest) = body.strip_prefix("||") {
        anchors |= AnchorFlags::DOMAIN_START;
        body = rest;
    } else if let Some(rest) = body.strip_prefix('|') {
        anchors |= AnchorFlags::START_OF_URL;
        body = rest;
    }
    if let Some(rest) = body.strip_suffix('|') {
        anchors |= AnchorFlags::END_OF_URL;
        body = rest;
    }

    if body.is_empty() {
        return Err(ParseSkip::EmptyPattern);
    }
    if body.contains('|') {
        return Err(ParseSkip::BadAnchor);
    }
    if anchors.intersects(AnchorFlags::START_OF_URL | AnchorFlags::DOMAIN_START) && body.starts_with('*') {
        return Err(ParseSkip::BadAnchor);
    }
    if anchors.contains(AnchorFlags::END_OF_URL) && body.ends_with('*') {
        return Err(ParseSkip::BadAnchor);
    }

    let body = if case_sensitive {
        body.to_string()
    } else {
        body.to_ascii_lowercase()
    };
    Pattern::new(&body, anchors).ok_or(ParseSkip::EmptyPattern)
}

#[derive(Debug, Clone)]
struct ParsedOptions {
    resource_types: ResourceType,
    party: PartyConstraint,
    domains: Option<DomainRestriction>,
    case_sensitive: bool,
    badfilter: bool,
}

impl Default for ParsedOptions {
    fn default() -> Self {
        Self {
            resource_types: ResourceType::ALL,
            party: PartyConstraint::Any,
            domains: None,
            case_sensitive: false,
            badfilter: false,
        }
    }
}

fn parse_options(text: &str) -> Result<ParsedOptions, ParseSkip> {
    let mut options = ParsedOptions::default();
    let mut type_include = ResourceType::empty();
    let mut type_exclude = ResourceType::empty();

    for raw in text.split(',') {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let raw_lower = raw.to_ascii_lowercase();
        let raw_lower = raw_lower.as_str();

        if raw_lower == "match-case" {
            options.case_sensitive = true;
            continue;
        }

        if raw_lower == "badfilter" {
            options.badfilter = true;
            continue;
        }

        if let Some(domain_value) = raw_lower.strip_prefix("domain=") {
            options.domains = parse_domain_list(domain_value, '|')?;
            if options.domains.is_none() {
                return Err(ParseSkip::BadDomain(domain_value.to_string()));
            }
            continue;
        }

        let (negated, name) = match raw_lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw_lower),
        };

        match name {
            "third-party" | "3p" => {
                options.party = if negated {
                    PartyConstraint::FirstPartyOnly
                } else {
                    PartyConstraint::ThirdPartyOnly
                };
                continue;
            }
            "first-party" | "1p" => {
                options.party = if negated {
                    PartyConstraint::ThirdPartyOnly
                } else {
                    PartyConstraint::FirstPartyOnly
                };
                continue;
            }
            _ => {}
        }

        if let Some(mask) = ResourceType::from_option_name(name) {
            if negated {
                type_exclude |= mask;
            } else {
                type_include |= mask;
            }
            continue;
        }

        log::trace!("ignoring unknown filter option {raw:?}");
    }

    let base = if type_include.is_empty() {
        ResourceType::ALL
    } else {
        type_include
    };
    options.resource_types = base.difference(type_exclude);
    if options.resource_types.is_empty() {
        return Err(ParseSkip::EmptyTypeMask);
    }

    Ok(options)
}

/// Parse `a.com|~b.com` (network) or `a.com,~b.com` (cosmetic).
/// Returns `None` when the list names no domains.
fn parse_domain_list(value: &str, separator: char) -> Result<Option<DomainRestriction>, ParseSkip> {
    let mut include = Vec::new();
    let mut exclude = Vec::new();

    for raw in value.split(separator) {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }

        let (is_exclude, domain_raw) = match raw.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let domain = normalize_domain(domain_raw).ok_or_else(|| ParseSkip::BadDomain(domain_raw.to_string()))?;
        let target = if is_exclude { &mut exclude } else { &mut include };
        if !target.contains(&domain) {
            target.push(domain);
        }
    }

    if include.is_empty() && exclude.is_empty() {
        return Ok(None);
    }

    Ok(Some(DomainRestriction::new(include, exclude)?))
}

/// Hosts-file line (`0.0.0.0 ads.example.com`): the blocked domain.
fn parse_hosts_file_domain(line: &str) -> Result<Option<String>, ParseSkip> {
    let mut parts = line.split_whitespace();
    let (Some(first), Some(second)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };

    if first.parse::<IpAddr>().is_err() {
        return Ok(None);
    }

    let domain = normalize_domain(second).ok_or_else(|| ParseSkip::BadDomain(second.to_string()))?;
    if is_local_hostname(&domain) {
        return Err(ParseSkip::LocalHostsEntry(domain));
    }
    Ok(Some(domain))
}

fn is_local_hostname(domain: &str) -> bool {
    matches!(
        domain,
        "localhost" | "localhost.localdomain" | "local" | "broadcasthost" | "ip6-localhost" | "ip6-loopback"
    ) || domain.parse::<IpAddr>().is_ok()
}

fn normalize_domain(host: &str) -> Option<String> {
    let trimmed = host.trim().trim_matches('.');
    if trimmed.is_empty() {
        return None;
    }

    if !trimmed
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'-' || b == b'_')
    {
        return None;
    }

    Some(trimmed.to_ascii_lowercase())
}
