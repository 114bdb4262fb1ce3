use std::collections::HashSet;
use std::sync::Arc;

use sift_core::rule::{CosmeticRule, DomainRestriction, NetworkRule, Pattern};
use sift_core::types::{PartyConstraint, ResourceType, RuleKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    pub badfilter_rules: usize,
    pub badfiltered_rules: usize,
}

/// Drop `$badfilter` rules together with the rules they cancel, then drop
/// repeated rules. The first occurrence of a rule is kept, so a rule shared
/// by several lists stays attributed to the earliest one.
pub fn optimize_rules(rules: &mut Vec<Arc<NetworkRule>>) -> OptimizeStats {
    let before = rules.len();
    let mut badfilter_rules = 0usize;
    let mut badfiltered_rules = 0usize;
    let mut deduped = 0usize;

    let keep: Vec<bool> = {
        let badfilter_keys: HashSet<RuleKey<'_>> = rules
            .iter()
            .filter(|rule| rule.badfilter)
            .map(|rule| RuleKey::from(rule.as_ref()))
            .collect();

        let mut seen: HashSet<RuleKey<'_>> = HashSet::new();
        rules
            .iter()
            .map(|rule| {
                if rule.badfilter {
                    badfilter_rules += 1;
                    return false;
                }
                let key = RuleKey::from(rule.as_ref());
                if badfilter_keys.contains(&key) {
                    badfiltered_rules += 1;
                    return false;
                }
                if !seen.insert(key) {
                    deduped += 1;
                    return false;
                }
                true
            })
            .collect()
    };

    let mut keep = keep.into_iter();
    rules.retain(|_| keep.next().unwrap_or(true));

    let after = rules.len();
    if badfilter_rules > 0 || deduped > 0 {
        log::debug!(
            "optimized {} -> {} rules ({} duplicates, {} badfilter, {} cancelled)",
            before,
            after,
            deduped,
            badfilter_rules,
            badfiltered_rules
        );
    }

    OptimizeStats {
        before,
        after,
        deduped,
        badfilter_rules,
        badfiltered_rules,
    }
}

/// Drop repeated cosmetic rules, keeping the first. Returns the number dropped.
pub fn dedupe_cosmetics(rules: &mut Vec<Arc<CosmeticRule>>) -> usize {
    let before = rules.len();
    let mut seen: HashSet<(String, Option<DomainRestriction>, bool)> = HashSet::new();
    rules.retain(|rule| seen.insert((rule.selector.clone(), rule.domains.clone(), rule.exception)));
    before - rules.len()
}

/// Everything that decides what a rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey<'a> {
    kind: RuleKind,
    pattern: &'a Pattern,
    resource_types: ResourceType,
    party: PartyConstraint,
    domains: Option<&'a DomainRestriction>,
    case_sensitive: bool,
}

impl<'a> From<&'a NetworkRule> for RuleKey<'a> {
    fn from(rule: &'a NetworkRule) -> Self {
        Self {
            kind: rule.kind,
            pattern: &rule.pattern,
            resource_types: rule.resource_types,
            party: rule.party,
            domains: rule.domains.as_ref(),
            case_sensitive: rule.case_sensitive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_filter_list;
    use sift_core::types::SubscriptionId;

    fn rules(text: &str, id: u32) -> Vec<Arc<NetworkRule>> {
        parse_filter_list(text, SubscriptionId(id)).network
    }

    #[test]
    fn removes_duplicates_within_a_list() {
        let mut list = rules("||ads.example.com^\n||ads.example.com^\n||ads.example.com^$script\n", 1);
        let stats = optimize_rules(&mut list);
        assert_eq!(stats.before, 3);
        assert_eq!(stats.after, 2);
        assert_eq!(stats.deduped, 1);
    }

    #[test]
    fn shared_rule_keeps_first_owner() {
        let mut list = rules("||ads.example.com^\n", 1);
        list.extend(rules("||ADS.example.com^\n||other.net^\n", 2));
        let stats = optimize_rules(&mut list);
        assert_eq!(stats.deduped, 1);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].subscription, SubscriptionId(1));
        assert_eq!(list[1].raw, "||other.net^");
    }

    #[test]
    fn badfilter_cancels_matching_rule() {
        let mut list = rules("||ads.example.com^\n||tracker.net^$script\n", 1);
        list.extend(rules("||ads.example.com^$badfilter\n||tracker.net^$badfilter\n", 2));
        let stats = optimize_rules(&mut list);

        assert_eq!(stats.badfilter_rules, 2);
        assert_eq!(stats.badfiltered_rules, 1);
        let raws: Vec<&str> = list.iter().map(|r| r.raw.as_str()).collect();
        assert_eq!(raws, vec!["||tracker.net^$script"]);
    }

    #[test]
    fn dedupes_cosmetics() {
        let mut list = parse_filter_list("##.ad\n##.ad\nexample.com##.ad\n#@#.ad\n", SubscriptionId(1)).cosmetic;
        assert_eq!(dedupe_cosmetics(&mut list), 1);
        assert_eq!(list.len(), 3);
    }
}
