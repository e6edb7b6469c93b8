//! Rule Resolution Engine
//!
//! Given a target SURT and request context, finds every rule that applies
//! and orders them from most to least specific. Resolution is a pure
//! function over an immutable rule snapshot; any number of resolutions may
//! run in parallel against the same slice.

use std::cmp::Ordering;
use std::collections::HashSet;

use regex::Regex;
use time::{Duration, OffsetDateTime};

use crate::clock::{Clock, SystemClock};
use crate::pattern::{is_global_wildcard, wildcard_prefix, LikePattern};
use crate::surt::Surt;
use crate::types::{FilterFlags, ResolveContext, Rule};

// =============================================================================
// Resolver
// =============================================================================

/// Resolves playback rules against a rule snapshot.
pub struct Resolver<'a> {
    rules: &'a [Rule],
    clock: &'a dyn Clock,
}

/// Per-call view of the target, computed once.
struct Target {
    canonical: String,
    ancestors: Vec<String>,
    ancestor_set: HashSet<String>,
}

impl Target {
    fn new(surt: &Surt) -> Self {
        let ancestors = surt.ancestors();
        Self {
            canonical: surt.serialize(),
            ancestor_set: ancestors.iter().cloned().collect(),
            ancestors,
        }
    }
}

impl<'a> Resolver<'a> {
    /// Create a resolver over `rules` using the system clock.
    pub fn new(rules: &'a [Rule]) -> Self {
        Self {
            rules,
            clock: &SystemClock,
        }
    }

    /// Use `clock` as the "now" for retrieval-date defaulting.
    pub fn with_clock(mut self, clock: &'a dyn Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Applicable rules for `target`, most specific first.
    pub fn resolve(&self, target: &Surt, ctx: &ResolveContext) -> Vec<&'a Rule> {
        let target = Target::new(target);
        let retrieve_date = ctx.retrieve_date.unwrap_or_else(|| self.clock.now());

        // Step 1: SURT candidates (ancestor and wildcard matches)
        let candidates: Vec<&'a Rule> = self
            .rules
            .iter()
            .filter(|rule| rule.enabled && surt_matches(rule, &target))
            .collect();
        let candidate_count = candidates.len();

        // Step 2: protocol, negation, scope and temporal filters
        let mut matched: Vec<&'a Rule> = candidates
            .into_iter()
            .filter(|rule| protocol_matches(rule, ctx))
            .filter(|rule| !is_negated(rule, &target, ctx))
            .filter(|rule| check_scope(rule, ctx))
            .filter(|rule| check_temporal(rule, ctx, retrieve_date))
            .collect();

        // Step 3: specificity ordering
        apply_precedence(&mut matched);

        log::debug!(
            "resolved '{}': {} of {} rules are candidates, {} apply",
            target.canonical,
            candidate_count,
            self.rules.len(),
            matched.len()
        );

        matched
    }

    /// Resolve a literal SURT or a URL.
    pub fn resolve_str(&self, target: &str, ctx: &ResolveContext) -> Vec<&'a Rule> {
        self.resolve(&Surt::from_surt_or_url(target), ctx)
    }
}

/// Resolve against `rules` with the system clock.
pub fn resolve<'a>(rules: &'a [Rule], target: &Surt, ctx: &ResolveContext) -> Vec<&'a Rule> {
    Resolver::new(rules).resolve(target, ctx)
}

// =============================================================================
// Matching
// =============================================================================

fn surt_matches(rule: &Rule, target: &Target) -> bool {
    if is_global_wildcard(&rule.surt) {
        return true;
    }
    if let Some(prefix) = wildcard_prefix(&rule.surt) {
        return !target.canonical.is_empty() && target.canonical.starts_with(prefix);
    }
    target.ancestor_set.contains(&rule.surt)
}

/// Protocol-unset rules match any request; protocol-specific rules,
/// wildcards included, only requests of their protocol.
fn protocol_matches(rule: &Rule, ctx: &ResolveContext) -> bool {
    if rule.protocol.is_empty() {
        return true;
    }
    ctx.protocol
        .as_deref()
        .is_some_and(|protocol| protocol.eq_ignore_ascii_case(&rule.protocol))
}

/// A rule is negated when its `neg_surt` pattern matches the target or any
/// of its ancestors. A context negation restricts candidates to rules that
/// declare exactly that pattern.
fn is_negated(rule: &Rule, target: &Target, ctx: &ResolveContext) -> bool {
    let neg_surt = rule.neg_surt.as_deref().filter(|neg| !neg.is_empty());

    if let Some(wanted) = ctx.neg_surt.as_deref() {
        if neg_surt != Some(wanted) {
            return true;
        }
    }

    match neg_surt {
        Some(neg) => {
            let pattern = LikePattern::new(neg);
            target.ancestors.iter().any(|ancestor| pattern.matches(ancestor))
        }
        None => false,
    }
}

fn check_scope(rule: &Rule, ctx: &ResolveContext) -> bool {
    if let Some(environment) = ctx.environment.as_deref() {
        if rule.environment != environment {
            return false;
        }
    }

    if !scope_value_matches(rule.collection.as_deref(), ctx.collection.as_deref()) {
        return false;
    }
    if !scope_value_matches(rule.partner.as_deref(), ctx.partner.as_deref()) {
        return false;
    }

    if let Some(range) = &rule.ip_range {
        if !ctx.ip.is_some_and(|ip| range.contains(ip)) {
            return false;
        }
    }

    // Without a WARC name the check is left to the client.
    if let (Some(pattern), Some(warc_name)) =
        (rule.warc_match.as_deref(), ctx.warc_name.as_deref())
    {
        if !pattern.is_empty() {
            return match Regex::new(pattern) {
                Ok(regex) => regex.is_match(warc_name),
                Err(err) => {
                    log::warn!("rule {} has an invalid warc_match: {err}", rule.id);
                    false
                }
            };
        }
    }

    true
}

/// Unset on the rule applies regardless; set requires an equal context value.
fn scope_value_matches(rule_value: Option<&str>, ctx_value: Option<&str>) -> bool {
    match rule_value.filter(|value| !value.is_empty()) {
        Some(required) => ctx_value == Some(required),
        None => true,
    }
}

/// Missing dates for an enforced filter fail closed.
fn check_temporal(rule: &Rule, ctx: &ResolveContext, retrieve_date: OffsetDateTime) -> bool {
    if ctx.filters.contains(FilterFlags::CAPTURE_WINDOW) {
        if let Some(window) = rule.capture_window.filter(|window| !window.is_unbounded()) {
            if !ctx.capture_date.is_some_and(|date| window.contains(date)) {
                return false;
            }
        }
    }

    if ctx.filters.contains(FilterFlags::RETRIEVE_WINDOW) {
        if let Some(window) = rule.retrieve_window {
            if !window.contains(retrieve_date) {
                return false;
            }
        }
    }

    if ctx.filters.contains(FilterFlags::EMBARGO) {
        if let Some(seconds) = rule.seconds_since_capture {
            let Some(capture_date) = ctx.capture_date else {
                return false;
            };
            if retrieve_date - capture_date >= Duration::seconds(seconds) {
                return false;
            }
        }
    }

    true
}

// =============================================================================
// Precedence
// =============================================================================

/// Sort most specific first.
pub fn apply_precedence(rules: &mut [&Rule]) {
    rules.sort_by(|a, b| specificity_order(a, b));
}

/// Total specificity order.
///
/// The global wildcard always sorts last. Otherwise: longer `surt` first,
/// explicit protocol before unset, lower [`Policy::precedence`] first,
/// earlier capture window start then end (an open bound sorts first), and
/// finally rule id.
///
/// [`Policy::precedence`]: crate::types::Policy::precedence
pub fn specificity_order(a: &Rule, b: &Rule) -> Ordering {
    a.is_global_wildcard()
        .cmp(&b.is_global_wildcard())
        .then_with(|| b.surt.len().cmp(&a.surt.len()))
        .then_with(|| a.protocol.is_empty().cmp(&b.protocol.is_empty()))
        .then_with(|| a.policy.precedence().cmp(&b.policy.precedence()))
        .then_with(|| capture_start(a).cmp(&capture_start(b)))
        .then_with(|| capture_end(a).cmp(&capture_end(b)))
        .then_with(|| a.id.cmp(&b.id))
}

fn capture_start(rule: &Rule) -> Option<OffsetDateTime> {
    rule.capture_window.and_then(|window| window.start)
}

fn capture_end(rule: &Rule) -> Option<OffsetDateTime> {
    rule.capture_window.and_then(|window| window.end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::types::{DateWindow, IpRange, Policy, RuleId};
    use time::macros::datetime;

    fn rule(id: u64, policy: Policy, surt: &str) -> Rule {
        Rule::new(RuleId(id), policy, surt)
    }

    fn ids(rules: &[&Rule]) -> Vec<u64> {
        rules.iter().map(|rule| rule.id.0).collect()
    }

    fn https() -> ResolveContext {
        ResolveContext::new().with_protocol("https")
    }

    #[test]
    fn test_ancestor_matches() {
        let rules = vec![
            rule(1, Policy::Allow, "https://("),
            rule(2, Policy::Allow, "https://(com,example,"),
            rule(3, Policy::Block, "https://(com,example,)"),
            rule(4, Policy::Block, "https://(com,example,)/blocked"),
            rule(5, Policy::Block, "https://(com,other,)"),
            rule(6, Policy::Block, "http://(com,example,)"),
            rule(7, Policy::Block, "https://(com,example,)/blocked/deeper"),
        ];
        let target = Surt::parse("https://(com,example,)/blocked");
        let result = resolve(&rules, &target, &https());
        assert_eq!(ids(&result), vec![4, 3, 2, 1]);
    }

    #[test]
    fn test_wildcard_sorts_last() {
        let rules = vec![
            rule(1, Policy::Block, "%"),
            rule(2, Policy::Allow, "https://(org,archive,)"),
        ];
        let target = Surt::parse("https://(org,archive,)/x");
        let result = resolve(&rules, &target, &https());
        assert_eq!(ids(&result), vec![2, 1]);
    }

    #[test]
    fn test_trailing_wildcard_is_prefix_match() {
        let rules = vec![
            rule(1, Policy::Block, "https://(org,arch%"),
            rule(2, Policy::Block, "https://(org,example,%"),
        ];
        let target = Surt::parse("https://(org,archive,)/x");
        assert_eq!(ids(&resolve(&rules, &target, &https())), vec![1]);
    }

    #[test]
    fn test_empty_target_matches_only_global_wildcard() {
        let rules = vec![
            rule(1, Policy::Block, "%"),
            rule(2, Policy::Block, "https://("),
            rule(3, Policy::Block, "https%"),
        ];
        let target = Surt::parse("");
        assert_eq!(ids(&resolve(&rules, &target, &ResolveContext::new())), vec![1]);
    }

    #[test]
    fn test_empty_rule_set() {
        let target = Surt::parse("https://(org,archive,)/x");
        assert!(resolve(&[], &target, &https()).is_empty());
    }

    #[test]
    fn test_disabled_rules_are_never_candidates() {
        let mut disabled = rule(1, Policy::Block, "https://(org,");
        disabled.enabled = false;
        let rules = vec![disabled, rule(2, Policy::Allow, "https://(org,")];
        let target = Surt::parse("https://(org,archive,)");
        assert_eq!(ids(&resolve(&rules, &target, &https())), vec![2]);
    }

    #[test]
    fn test_protocol_gating() {
        let mut http_only = rule(1, Policy::Block, "%");
        http_only.protocol = "http".to_string();
        let mut https_only = rule(2, Policy::Block, "%");
        https_only.protocol = "https".to_string();
        let any = rule(3, Policy::Allow, "%");
        let rules = vec![http_only, https_only, any];
        let target = Surt::parse("https://(org,archive,)");

        assert_eq!(ids(&resolve(&rules, &target, &https())), vec![2, 3]);
        assert_eq!(ids(&resolve(&rules, &target, &ResolveContext::new())), vec![3]);
    }

    #[test]
    fn test_negation() {
        let mut negated = rule(1, Policy::Block, "https://(org,");
        negated.neg_surt = Some("https://(org,archive,api,".to_string());
        let rules = vec![negated];

        let allowed = Surt::parse("https://(org,example,)/x");
        assert_eq!(ids(&resolve(&rules, &allowed, &https())), vec![1]);

        let excluded = Surt::parse("https://(org,archive,api,)/x");
        assert!(resolve(&rules, &excluded, &https()).is_empty());
    }

    #[test]
    fn test_negation_with_wildcard_pattern() {
        let mut negated = rule(1, Policy::RewriteAll, "https://(org,");
        negated.neg_surt = Some("https://(org,%,)/private%".to_string());
        let rules = vec![negated];

        let public = Surt::parse("https://(org,archive,)/public");
        assert_eq!(ids(&resolve(&rules, &public, &https())), vec![1]);
        let private = Surt::parse("https://(org,archive,)/private/x");
        assert!(resolve(&rules, &private, &https()).is_empty());
    }

    #[test]
    fn test_context_negation_selects_declaring_rules() {
        let plain = rule(1, Policy::Block, "https://(com,example,)");
        let mut declaring = rule(2, Policy::Block, "https://(com,");
        declaring.neg_surt = Some("https://(com,other,".to_string());
        let rules = vec![plain, declaring];
        let target = Surt::parse("https://(com,example,)/blocked");

        let ctx = https().with_neg_surt("https://(");
        assert!(resolve(&rules, &target, &ctx).is_empty());

        let ctx = https().with_neg_surt("https://(com,other,");
        assert_eq!(ids(&resolve(&rules, &target, &ctx)), vec![2]);
    }

    #[test]
    fn test_capture_window() {
        let mut dated = rule(1, Policy::Block, "https://(com,example,)");
        dated.capture_window = Some(DateWindow::new(
            Some(datetime!(2018-04-01 00:00 UTC)),
            Some(datetime!(2018-04-02 00:00 UTC)),
        ));
        let rules = vec![dated];
        let target = Surt::parse("https://(com,example,)/blocked");

        let inside = https().with_capture_date(datetime!(2018-04-01 12:00 UTC));
        assert_eq!(ids(&resolve(&rules, &target, &inside)), vec![1]);

        let outside = https().with_capture_date(datetime!(2018-04-03 00:00 UTC));
        assert!(resolve(&rules, &target, &outside).is_empty());

        // Fail closed without a capture date...
        assert!(resolve(&rules, &target, &https()).is_empty());

        // ...unless the caller opts out of the filter.
        let opted_out = https().without_filter(FilterFlags::CAPTURE_WINDOW);
        assert_eq!(ids(&resolve(&rules, &target, &opted_out)), vec![1]);
    }

    #[test]
    fn test_retrieve_window_defaults_to_now() {
        let mut dated = rule(1, Policy::Block, "https://(com,example,)");
        dated.retrieve_window = Some(DateWindow::new(
            Some(datetime!(2020-01-01 00:00 UTC)),
            Some(datetime!(2021-01-01 00:00 UTC)),
        ));
        let rules = vec![dated];
        let target = Surt::parse("https://(com,example,)");

        let during = FixedClock(datetime!(2020-06-01 00:00 UTC));
        let resolver = Resolver::new(&rules).with_clock(&during);
        assert_eq!(ids(&resolver.resolve(&target, &https())), vec![1]);

        let after = FixedClock(datetime!(2022-06-01 00:00 UTC));
        let resolver = Resolver::new(&rules).with_clock(&after);
        assert!(resolver.resolve(&target, &https()).is_empty());

        let explicit = https().with_retrieve_date(datetime!(2020-06-01 00:00 UTC));
        assert_eq!(ids(&resolver.resolve(&target, &explicit)), vec![1]);
    }

    #[test]
    fn test_embargo() {
        let mut embargoed = rule(1, Policy::Block, "https://(com,example,)");
        embargoed.seconds_since_capture = Some(3600 * 24 * 365);
        let rules = vec![embargoed];
        let target = Surt::parse("https://(com,example,)");
        let clock = FixedClock(datetime!(2020-06-01 00:00 UTC));
        let resolver = Resolver::new(&rules).with_clock(&clock);

        let recent = https().with_capture_date(datetime!(2020-01-01 00:00 UTC));
        assert_eq!(ids(&resolver.resolve(&target, &recent)), vec![1]);

        let old = https().with_capture_date(datetime!(2018-01-01 00:00 UTC));
        assert!(resolver.resolve(&target, &old).is_empty());

        assert!(resolver.resolve(&target, &https()).is_empty());
        let opted_out = https().without_filter(FilterFlags::EMBARGO);
        assert_eq!(ids(&resolver.resolve(&target, &opted_out)), vec![1]);
    }

    #[test]
    fn test_collection_and_partner() {
        let mut scoped = rule(1, Policy::Block, "https://(com,example,)/collection");
        scoped.collection = Some("collection".to_string());
        let mut partnered = rule(2, Policy::Block, "https://(com,example,)/collection");
        partnered.partner = Some("partner".to_string());
        let unscoped = rule(3, Policy::Allow, "https://(com,example,)");
        let rules = vec![scoped, partnered, unscoped];
        let target = Surt::parse("https://(com,example,)/collection");

        let ctx = https().with_collection("collection");
        assert_eq!(ids(&resolve(&rules, &target, &ctx)), vec![1, 3]);

        let ctx = https().with_partner("partner");
        assert_eq!(ids(&resolve(&rules, &target, &ctx)), vec![2, 3]);

        assert_eq!(ids(&resolve(&rules, &target, &https())), vec![3]);
    }

    #[test]
    fn test_ip_range() {
        let mut ranged = rule(1, Policy::RequireAuth, "%");
        ranged.ip_range = Some(IpRange::new(
            "192.168.0.1".parse().unwrap(),
            "192.168.0.255".parse().unwrap(),
        ));
        let rules = vec![ranged];
        let target = Surt::parse("https://(com,example,)");

        let inside = https().with_ip("192.168.0.7".parse().unwrap());
        assert_eq!(ids(&resolve(&rules, &target, &inside)), vec![1]);
        let outside = https().with_ip("10.0.0.7".parse().unwrap());
        assert!(resolve(&rules, &target, &outside).is_empty());
        assert!(resolve(&rules, &target, &https()).is_empty());
    }

    #[test]
    fn test_environment_and_warc_match() {
        let mut test_only = rule(1, Policy::Block, "%");
        test_only.environment = "test".to_string();
        let mut warc = rule(2, Policy::Block, "%");
        warc.warc_match = Some(r"^warc 1\d+".to_string());
        let rules = vec![test_only, warc];
        let target = Surt::parse("https://(com,example,)");

        let prod = https().with_environment("prod");
        assert_eq!(ids(&resolve(&rules, &target, &prod)), vec![2]);

        let warc_hit = https().with_warc_name("warc 123.warc.gz");
        assert_eq!(ids(&resolve(&rules, &target, &warc_hit)), vec![1, 2]);
        let warc_miss = https().with_warc_name("warc 2.warc.gz");
        assert_eq!(ids(&resolve(&rules, &target, &warc_miss)), vec![1]);
    }

    #[test]
    fn test_specificity_tie_breaks() {
        let mut explicit = rule(1, Policy::Allow, "https://(com,example,)");
        explicit.protocol = "https".to_string();
        let allow = rule(2, Policy::Allow, "https://(com,example,)");
        let block = rule(3, Policy::Block, "https://(com,example,)");
        let mut late = rule(4, Policy::Block, "https://(com,example,)");
        late.capture_window = Some(DateWindow::new(Some(datetime!(2019-01-01 00:00 UTC)), None));
        let mut early = rule(5, Policy::Block, "https://(com,example,)");
        early.capture_window = Some(DateWindow::new(Some(datetime!(2010-01-01 00:00 UTC)), None));
        let rules = vec![explicit, allow, block, late, early];

        let target = Surt::parse("https://(com,example,)");
        let ctx = https().without_filter(FilterFlags::CAPTURE_WINDOW);
        assert_eq!(ids(&resolve(&rules, &target, &ctx)), vec![1, 3, 5, 4, 2]);
    }

    #[test]
    fn test_resolve_str_accepts_urls() {
        let rules = vec![rule(1, Policy::Block, "https://(org,archive,)/about")];
        let result = Resolver::new(&rules).resolve_str("https://archive.org/about", &https());
        assert_eq!(ids(&result), vec![1]);
    }
}
