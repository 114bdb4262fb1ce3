//! Registrable-domain (eTLD+1) utilities
//!
//! Third-party classification compares registrable domains. A compact list
//! of multi-label public suffixes covers the common cases; everything else
//! falls back to the last two labels.
//!
//! # Examples
//!
//! ```
//! use sift_core::psl::registrable_domain;
//!
//! assert_eq!(registrable_domain("sub.example.com"), "example.com");
//! assert_eq!(registrable_domain("sub.example.co.uk"), "example.co.uk");
//! ```

/// Common two-part public suffixes.
const COMMON_TWO_PART_TLDS: &[&str] = &[
    "co.uk", "co.jp", "co.nz", "co.za", "co.in", "co.kr",
    "com.au", "com.br", "com.cn", "com.mx", "com.tw", "com.hk",
    "net.au", "net.nz",
    "org.uk", "org.au",
    "gov.uk", "gov.au",
    "ac.uk", "ac.jp",
    "ne.jp", "or.jp",
    "github.io", "blogspot.com", "appspot.com", "herokuapp.com",
];

/// Get the registrable domain for a lower-cased hostname.
///
/// Returns a slice of `host`. IP literals and single-label hosts are
/// returned unchanged.
pub fn registrable_domain(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    if host.is_empty() || host.starts_with('[') || host.parse::<std::net::Ipv4Addr>().is_ok() {
        return host;
    }

    let dots: Vec<usize> = host.match_indices('.').map(|(i, _)| i).collect();
    let n = dots.len();
    if n < 2 {
        return host;
    }

    // Last two labels, e.g. "co.uk"
    let last_two = &host[dots[n - 2] + 1..];
    if COMMON_TWO_PART_TLDS.contains(&last_two) {
        return if n >= 3 { &host[dots[n - 3] + 1..] } else { host };
    }

    last_two
}

/// Check if two hosts share the same registrable domain.
pub fn is_same_site(host1: &str, host2: &str) -> bool {
    registrable_domain(host1) == registrable_domain(host2)
}

/// Check if a request to `req_host` made from a document on `doc_host` is third-party.
pub fn is_third_party(doc_host: &str, req_host: &str) -> bool {
    !is_same_site(doc_host, req_host)
}

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// Iterator for suffix-walking a host from full host to its last label.
pub struct HostSuffixIter<'a> {
    current: Option<&'a str>,
}

impl<'a> Iterator for HostSuffixIter<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self.current?;
        self.current = get_parent_domain(result);
        Some(result)
    }
}

/// Walk host suffixes from most specific to least specific.
pub fn walk_host_suffixes(host: &str) -> HostSuffixIter<'_> {
    HostSuffixIter {
        current: if host.is_empty() { None } else { Some(host) },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registrable_domain_simple() {
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("sub.example.com"), "example.com");
        assert_eq!(registrable_domain("a.b.c.example.com"), "example.com");
        assert_eq!(registrable_domain("localhost"), "localhost");
    }

    #[test]
    fn test_registrable_domain_two_part() {
        assert_eq!(registrable_domain("sub.example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("example.co.uk"), "example.co.uk");
        assert_eq!(registrable_domain("co.uk"), "co.uk");
    }

    #[test]
    fn test_registrable_domain_ip() {
        assert_eq!(registrable_domain("192.168.1.10"), "192.168.1.10");
    }

    #[test]
    fn test_third_party() {
        assert!(!is_third_party("www.example.com", "cdn.example.com"));
        assert!(is_third_party("example.com", "ads.tracker.net"));
    }

    #[test]
    fn test_get_parent_domain() {
        assert_eq!(get_parent_domain("sub.example.com"), Some("example.com"));
        assert_eq!(get_parent_domain("example.com"), Some("com"));
        assert_eq!(get_parent_domain("com"), None);
        assert_eq!(get_parent_domain(""), None);
    }

    #[test]
    fn test_walk_host_suffixes() {
        let suffixes: Vec<&str> = walk_host_suffixes("a.example.com").collect();
        assert_eq!(suffixes, vec!["a.example.com", "example.com", "com"]);
        assert_eq!(walk_host_suffixes("").count(), 0);
    }
}
