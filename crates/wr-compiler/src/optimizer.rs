use std::collections::HashSet;
use std::net::IpAddr;

use time::OffsetDateTime;
use wr_core::types::{Policy, Rule};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizeStats {
    pub before: usize,
    pub after: usize,
    pub deduped: usize,
    pub disabled: usize,
}

/// Drop rules whose definition repeats an earlier rule. The first
/// occurrence wins; ids and comments do not take part in the comparison.
/// Disabled rules are kept and only counted.
pub fn optimize_rules(rules: &mut Vec<Rule>) -> OptimizeStats {
    let before = rules.len();
    let disabled = rules.iter().filter(|rule| !rule.enabled).count();

    let mut seen: HashSet<RuleKey> = HashSet::new();
    let mut dropped = Vec::new();
    rules.retain(|rule| {
        if seen.insert(RuleKey::from(rule)) {
            true
        } else {
            dropped.push(rule.id);
            false
        }
    });

    for id in &dropped {
        log::debug!("dropped duplicate rule {id}");
    }

    OptimizeStats {
        before,
        after: rules.len(),
        deduped: dropped.len(),
        disabled,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleKey {
    policy: Policy,
    enabled: bool,
    environment: String,
    surt: String,
    neg_surt: Option<String>,
    protocol: String,
    capture_window: Option<(Option<OffsetDateTime>, Option<OffsetDateTime>)>,
    retrieve_window: Option<(Option<OffsetDateTime>, Option<OffsetDateTime>)>,
    seconds_since_capture: Option<i64>,
    ip_range: Option<(IpAddr, IpAddr)>,
    collection: Option<String>,
    partner: Option<String>,
    warc_match: Option<String>,
    rewrite_from: Option<String>,
    rewrite_to: Option<String>,
}

impl From<&Rule> for RuleKey {
    fn from(rule: &Rule) -> Self {
        Self {
            policy: rule.policy,
            enabled: rule.enabled,
            environment: rule.environment.clone(),
            surt: rule.surt.clone(),
            neg_surt: rule.neg_surt.clone(),
            protocol: rule.protocol.to_ascii_lowercase(),
            capture_window: rule.capture_window.map(|w| (w.start, w.end)),
            retrieve_window: rule.retrieve_window.map(|w| (w.start, w.end)),
            seconds_since_capture: rule.seconds_since_capture,
            ip_range: rule.ip_range.map(|r| (r.start, r.end)),
            collection: rule.collection.clone(),
            partner: rule.partner.clone(),
            warc_match: rule.warc_match.clone(),
            rewrite_from: rule.rewrite_from.clone(),
            rewrite_to: rule.rewrite_to.clone(),
        }
    }
}
