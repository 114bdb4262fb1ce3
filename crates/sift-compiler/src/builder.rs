use std::sync::Arc;

use sift_core::index::RuleIndex;
use sift_core::rule::{CosmeticRule, NetworkRule};

use crate::optimizer::{dedupe_cosmetics, optimize_rules, OptimizeStats};
use crate::parser::ParsedList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildStats {
    pub lists: usize,
    pub network_rules: usize,
    pub cosmetic_rules: usize,
    pub cosmetic_deduped: usize,
    pub token_buckets: usize,
    pub residual_rules: usize,
    pub optimize: OptimizeStats,
}

/// Aggregate parsed lists, in order, into one index.
///
/// Lists are concatenated before optimizing, so list order decides bucket
/// order and which list a shared rule is attributed to. Rules are shared
/// with the lists through `Arc`, nothing is copied.
pub fn build_index<'a, I>(lists: I) -> (RuleIndex, BuildStats)
where
    I: IntoIterator<Item = &'a ParsedList>,
{
    let mut network: Vec<Arc<NetworkRule>> = Vec::new();
    let mut cosmetic: Vec<Arc<CosmeticRule>> = Vec::new();
    let mut stats = BuildStats::default();

    for list in lists {
        stats.lists += 1;
        network.extend(list.network.iter().cloned());
        cosmetic.extend(list.cosmetic.iter().cloned());
    }

    stats.optimize = optimize_rules(&mut network);
    stats.cosmetic_deduped = dedupe_cosmetics(&mut cosmetic);
    stats.network_rules = network.len();
    stats.cosmetic_rules = cosmetic.len();

    let index = RuleIndex::build(network, cosmetic);
    stats.token_buckets = index.token_count();
    stats.residual_rules = index.residual_count();

    log::debug!(
        "built index from {} lists: {} network rules ({} token buckets, {} residual), {} cosmetic rules",
        stats.lists,
        stats.network_rules,
        stats.token_buckets,
        stats.residual_rules,
        stats.cosmetic_rules
    );

    (index, stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_filter_list;
    use sift_core::matcher::{decide, Matcher};
    use sift_core::request::{Decision, RequestDescriptor};
    use sift_core::types::{ResourceType, SubscriptionId};

    fn script(url: &str, document: &str) -> RequestDescriptor {
        RequestDescriptor::new(url, document, ResourceType::SCRIPT)
    }

    #[test]
    fn builds_from_several_lists() {
        let easylist = parse_filter_list("||ads.example.com^\n##.ad\n", SubscriptionId(1));
        let privacy = parse_filter_list("||tracker.net^$third-party\nexample.com##.promo\n", SubscriptionId(2));
        let (index, stats) = build_index([&easylist, &privacy]);

        assert_eq!(stats.lists, 2);
        assert_eq!(stats.network_rules, 2);
        assert_eq!(stats.cosmetic_rules, 2);
        assert_eq!(index.network_rule_count(), 2);

        let decision = decide(&index, &script("https://tracker.net/t.js", "https://example.com/"));
        assert_eq!(decision.rule().map(|r| r.subscription), Some(SubscriptionId(2)));
    }

    #[test]
    fn empty_index_allows_everything() {
        let (index, stats) = build_index(std::iter::empty::<&ParsedList>());
        assert_eq!(stats, BuildStats::default());
        assert_eq!(decide(&index, &script("https://ads.example.com/a.js", "")), Decision::Allow);
    }

    #[test]
    fn blocks_domain_and_subdomains_only() {
        let list = parse_filter_list("||ads.example.com^\n", SubscriptionId(1));
        let (index, _) = build_index([&list]);

        assert!(decide(&index, &script("https://ads.example.com/x.js", "https://site.org/")).is_blocked());
        assert!(decide(&index, &script("http://a.ads.example.com/x.js", "https://site.org/")).is_blocked());
        assert!(!decide(&index, &script("https://badads.example.com/x.js", "https://site.org/")).is_blocked());
        assert!(!decide(&index, &script("https://example.com/ads.example.com", "https://site.org/")).is_blocked());
    }

    #[test]
    fn exception_in_later_list_overrides_block() {
        let blocks = parse_filter_list("||example.com^$script\n", SubscriptionId(1));
        let allows = parse_filter_list("@@||example.com/widget.js\n", SubscriptionId(2));
        let (index, _) = build_index([&blocks, &allows]);

        assert_eq!(decide(&index, &script("https://example.com/widget.js", "https://news.org/")), Decision::Allow);
        assert!(decide(&index, &script("https://example.com/other.js", "https://news.org/")).is_blocked());
    }

    #[test]
    fn removing_a_list_removes_its_rules() {
        let a = parse_filter_list("||ads.example.com^\n", SubscriptionId(1));
        let b = parse_filter_list("||tracker.net^\n", SubscriptionId(2));
        let (with_both, _) = build_index([&a, &b]);
        let (only_a, _) = build_index([&a]);

        let req = script("https://tracker.net/t.js", "https://site.org/");
        assert!(decide(&with_both, &req).is_blocked());
        assert_eq!(decide(&only_a, &req), Decision::Allow);
        assert!(!only_a.contains_subscription(SubscriptionId(2)));
    }

    #[test]
    fn cosmetic_exception_from_another_list() {
        let generic = parse_filter_list("##.ad-banner\n##.sponsored\n", SubscriptionId(1));
        let fixes = parse_filter_list("example.com#@#.sponsored\n", SubscriptionId(2));
        let (index, _) = build_index([&generic, &fixes]);
        let matcher = Matcher::new(&index);

        assert_eq!(matcher.cosmetic_selectors("www.example.com"), vec![".ad-banner"]);
        assert_eq!(matcher.cosmetic_selectors("other.org"), vec![".ad-banner", ".sponsored"]);
    }

    #[test]
    fn badfilter_across_lists() {
        let a = parse_filter_list("||ads.example.com^\n", SubscriptionId(1));
        let b = parse_filter_list("||ads.example.com^$badfilter\n", SubscriptionId(2));
        let (index, stats) = build_index([&a, &b]);

        assert_eq!(stats.optimize.badfiltered_rules, 1);
        assert_eq!(index.network_rule_count(), 0);
    }
}
