//! Search-term disambiguation and rule search
//!
//! Interactive lookups accept free text that may be a URL
//! (`archive.org/about`), a literal SURT fragment (`(org,archive,`), or
//! either with an explicit scheme. [`disambiguate`] turns that text into a
//! protocol plus a scheme-less SURT key, and [`search_rules`] finds the rules
//! stored under that key.

use std::sync::OnceLock;

use regex::Regex;

use crate::pattern::{is_global_wildcard, WILDCARD};
use crate::resolver::specificity_order;
use crate::surt::{
    Surt, DEFAULT_PROTOCOL, DOMAIN_CLOSE, DOMAIN_OPEN, DOMAIN_SEPARATOR, PROTOCOL_SEPARATOR,
};
use crate::types::Rule;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("Unable to parse search term: {0:?}")]
    UnparseableTerm(String),
    #[error("Search term pattern failed to compile: {0}")]
    Pattern(String),
}

static TERM_PATTERN: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();

fn term_pattern() -> Result<&'static Regex, SearchError> {
    TERM_PATTERN
        .get_or_init(|| Regex::new(r"^(?:(?P<protocol>\w*)://)?(?P<rest>.*)$"))
        .as_ref()
        .map_err(|err| SearchError::Pattern(err.to_string()))
}

// =============================================================================
// Disambiguation
// =============================================================================

/// A disambiguated search term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchTerm {
    /// Lowercase scheme; empty when the term named none.
    pub protocol: String,
    /// Scheme-less SURT key, or `None` when a URL term had no usable host.
    pub surt: Option<String>,
}

impl SearchTerm {
    pub fn has_protocol(&self) -> bool {
        !self.protocol.is_empty()
    }
}

/// Split free text into a protocol and a normalized SURT key.
///
/// A remainder starting with `(` is taken as a literal SURT fragment;
/// anything else is canonicalized as a URL. Text the term pattern cannot
/// split at all (it spans lines) is rejected.
pub fn disambiguate(term: &str) -> Result<SearchTerm, SearchError> {
    let captures = term_pattern()?
        .captures(term)
        .ok_or_else(|| SearchError::UnparseableTerm(term.to_string()))?;

    let protocol = captures
        .name("protocol")
        .map_or("", |m| m.as_str())
        .to_ascii_lowercase();
    let rest = captures.name("rest").map_or("", |m| m.as_str());

    let surt = if rest.starts_with(DOMAIN_OPEN) {
        Some(normalize_key(rest))
    } else {
        let scheme = if protocol.is_empty() { DEFAULT_PROTOCOL } else { protocol.as_str() };
        let canonical = Surt::from_url(&format!("{scheme}{PROTOCOL_SEPARATOR}{rest}"));
        (!canonical.is_empty()).then(|| normalize_rule_surt(&canonical.serialize()))
    };

    log::debug!("search term {term:?} -> protocol {protocol:?}, surt {surt:?}");
    Ok(SearchTerm { protocol, surt })
}

/// Reduce a stored rule SURT to the key form [`disambiguate`] produces:
/// no scheme, no leading `(`, and no comma before the closing `)`.
pub fn normalize_rule_surt(surt: &str) -> String {
    let rest = surt.split_once(PROTOCOL_SEPARATOR).map_or(surt, |(_, rest)| rest);
    normalize_key(rest)
}

fn normalize_key(fragment: &str) -> String {
    let fragment = fragment.trim_start_matches(DOMAIN_OPEN);
    match fragment.split_once(DOMAIN_CLOSE) {
        Some((domain, rest)) => {
            format!("{}{DOMAIN_CLOSE}{rest}", domain.trim_end_matches(DOMAIN_SEPARATOR))
        }
        None => fragment.to_string(),
    }
}

fn embedded_protocol(surt: &str) -> Option<&str> {
    surt.split_once(PROTOCOL_SEPARATOR)
        .map(|(protocol, _)| protocol)
        .filter(|protocol| !protocol.is_empty())
}

// =============================================================================
// Search
// =============================================================================

/// Rules stored under `term`, most specific first.
///
/// A rule matches when its key equals the term's key, or the term's key
/// followed by `%`. Without a protocol only protocol-less rules qualify.
/// With one, protocol-less rules and rules of that protocol qualify, and
/// that protocol's global wildcard rules are included as well.
pub fn search_rules<'a>(rules: &'a [Rule], term: &SearchTerm) -> Vec<&'a Rule> {
    let key = term.surt.as_deref();
    let mut found: Vec<&Rule> = rules
        .iter()
        .filter(|rule| {
            if !term.has_protocol() {
                return rule.protocol.is_empty() && key_matches(rule, key);
            }
            if rule.is_global_wildcard() && rule.protocol.eq_ignore_ascii_case(&term.protocol) {
                return true;
            }
            let protocol_fits =
                rule.protocol.is_empty() || rule.protocol.eq_ignore_ascii_case(&term.protocol);
            let scheme_fits = embedded_protocol(&rule.surt)
                .map_or(true, |embedded| embedded.eq_ignore_ascii_case(&term.protocol));
            protocol_fits && scheme_fits && key_matches(rule, key)
        })
        .collect();

    found.sort_by(|a, b| specificity_order(a, b));
    found
}

fn key_matches(rule: &Rule, key: Option<&str>) -> bool {
    let Some(key) = key else {
        return false;
    };
    if is_global_wildcard(&rule.surt) {
        return false;
    }
    let stored = normalize_rule_surt(&rule.surt);
    stored == key || stored.strip_suffix(WILDCARD) == Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Policy, RuleId};

    fn term(protocol: &str, surt: &str) -> SearchTerm {
        SearchTerm {
            protocol: protocol.to_string(),
            surt: Some(surt.to_string()),
        }
    }

    #[test]
    fn test_url_term() {
        assert_eq!(disambiguate("http://archive.org").unwrap(), term("http", "org,archive)/"));
        assert_eq!(disambiguate("archive.org/about").unwrap(), term("", "org,archive)/about"));
        assert_eq!(disambiguate("HTTPS://Archive.org").unwrap(), term("https", "org,archive)/"));
    }

    #[test]
    fn test_literal_term() {
        assert_eq!(disambiguate("://(org,archive,").unwrap(), term("", "org,archive,"));
        assert_eq!(disambiguate("(org,archive,)/about").unwrap(), term("", "org,archive)/about"));
        assert_eq!(disambiguate("https://(org,").unwrap(), term("https", "org,"));
    }

    #[test]
    fn test_unusable_url_has_no_key() {
        let result = disambiguate("http://").unwrap();
        assert_eq!(result.protocol, "http");
        assert_eq!(result.surt, None);
    }

    #[test]
    fn test_multiline_term_is_rejected() {
        assert_eq!(
            disambiguate("archive.org\nexample.com"),
            Err(SearchError::UnparseableTerm("archive.org\nexample.com".to_string()))
        );
    }

    #[test]
    fn test_normalize_rule_surt() {
        assert_eq!(normalize_rule_surt("https://(org,archive,)/about"), "org,archive)/about");
        assert_eq!(normalize_rule_surt("https://(org,"), "org,");
        assert_eq!(normalize_rule_surt("(org,archive,)"), "org,archive)");
    }

    fn rule(id: u64, protocol: &str, surt: &str) -> Rule {
        let mut rule = Rule::new(RuleId(id), Policy::Block, surt);
        rule.protocol = protocol.to_string();
        rule
    }

    #[test]
    fn test_search_without_protocol() {
        let rules = vec![
            rule(1, "", "://(org,archive,"),
            rule(2, "", "://(org,archive,%"),
            rule(3, "https", "https://(org,archive,"),
            rule(4, "", "://(org,"),
            rule(5, "", "%"),
        ];
        let ids: Vec<u64> = search_rules(&rules, &term("", "org,archive,"))
            .iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn test_search_with_protocol() {
        let rules = vec![
            rule(1, "", "http://(org,archive,)/"),
            rule(2, "http", "http://(org,archive,)/"),
            rule(3, "https", "https://(org,archive,)/"),
            rule(4, "http", "%"),
            rule(5, "https", "%"),
            rule(6, "", "https://(org,archive,)/"),
        ];
        let ids: Vec<u64> = search_rules(&rules, &disambiguate("http://archive.org").unwrap())
            .iter()
            .map(|r| r.id.0)
            .collect();
        assert_eq!(ids, vec![2, 1, 4]);
    }

    #[test]
    fn test_search_without_key() {
        let rules = vec![rule(1, "http", "%"), rule(2, "", "http://(org,")];
        let found = search_rules(&rules, &SearchTerm { protocol: "http".to_string(), surt: None });
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, RuleId(1));
    }
}
