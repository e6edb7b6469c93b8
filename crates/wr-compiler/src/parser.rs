//! JSON rule document parser
//!
//! A rule document is a JSON array of rule records, or a success envelope
//! (`{"status": "success", "result": [...]}`) wrapping one, so API output can
//! be fed straight back in. Each record is validated the way the rules API
//! validates writes: required fields, known policy and environment names,
//! RFC 3339 dates, parseable IP addresses of one family, and a compilable
//! `warc_match`.

use std::collections::HashSet;
use std::net::IpAddr;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use wr_core::types::{DateWindow, IpRange, Policy, Rule, RuleId, ENVIRONMENTS};

#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Expected a list of rules")]
    NotAList,
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Unknown policy: {0:?}")]
    UnknownPolicy(String),
    #[error("Unknown environment: {0:?}")]
    UnknownEnvironment(String),
    #[error("Invalid {field}: {value:?} ({reason})")]
    InvalidDate {
        field: &'static str,
        value: String,
        reason: String,
    },
    #[error("Invalid {field}: {value:?}")]
    InvalidIp { field: &'static str, value: String },
    #[error("IP range mixes address families: {start} - {end}")]
    MixedIpFamily { start: IpAddr, end: IpAddr },
    #[error("Invalid warc_match {pattern:?}: {reason}")]
    InvalidWarcMatch { pattern: String, reason: String },
    #[error("Duplicate rule id: {0}")]
    DuplicateId(RuleId),
    #[error("No rule id left to assign after {0}")]
    IdsExhausted(RuleId),
    #[error("Rule {index}: {source}")]
    AtIndex {
        index: usize,
        #[source]
        source: Box<RuleError>,
    },
}

impl RuleError {
    fn at(self, index: usize) -> Self {
        Self::AtIndex {
            index,
            source: Box::new(self),
        }
    }
}

// =============================================================================
// Raw records
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawRule {
    id: Option<u64>,
    policy: Option<String>,
    enabled: Option<bool>,
    environment: Option<String>,
    surt: Option<String>,
    neg_surt: Option<String>,
    protocol: Option<String>,
    capture_date: Option<RawBounds>,
    retrieve_date: Option<RawBounds>,
    seconds_since_capture: Option<i64>,
    ip_range: Option<RawBounds>,
    collection: Option<String>,
    partner: Option<String>,
    warc_match: Option<String>,
    rewrite_from: Option<String>,
    rewrite_to: Option<String>,
    public_comment: Option<String>,
    private_comment: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBounds {
    start: Option<String>,
    end: Option<String>,
}

// =============================================================================
// Parsing
// =============================================================================

/// Validate one rule record.
///
/// A record without an `id` gets `RuleId(0)`; [`parse_rules`] assigns real
/// ids to those.
pub fn parse_rule(value: &Value) -> Result<Rule, RuleError> {
    let raw = RawRule::deserialize(value)?;

    let policy = raw.policy.ok_or(RuleError::MissingField("policy"))?;
    let policy = match Policy::parse(&policy) {
        Some(policy) => policy,
        None => return Err(RuleError::UnknownPolicy(policy)),
    };

    let environment = raw.environment.ok_or(RuleError::MissingField("environment"))?;
    if !ENVIRONMENTS.contains(&environment.as_str()) {
        return Err(RuleError::UnknownEnvironment(environment));
    }

    let enabled = raw.enabled.ok_or(RuleError::MissingField("enabled"))?;
    let surt = non_empty(raw.surt).ok_or(RuleError::MissingField("surt"))?;

    let warc_match = non_empty(raw.warc_match);
    if let Some(pattern) = &warc_match {
        if let Err(err) = Regex::new(pattern) {
            return Err(RuleError::InvalidWarcMatch {
                pattern: pattern.clone(),
                reason: err.to_string(),
            });
        }
    }

    let mut rule = Rule::new(RuleId(raw.id.unwrap_or_default()), policy, surt);
    rule.enabled = enabled;
    rule.environment = environment;
    rule.neg_surt = non_empty(raw.neg_surt);
    rule.protocol = raw.protocol.unwrap_or_default().trim().to_ascii_lowercase();
    rule.capture_window =
        parse_window(raw.capture_date, "capture start date", "capture end date")?;
    rule.retrieve_window =
        parse_window(raw.retrieve_date, "retrieve start date", "retrieve end date")?;
    rule.seconds_since_capture = raw.seconds_since_capture;
    rule.ip_range = raw.ip_range.map(parse_ip_range).transpose()?;
    rule.collection = non_empty(raw.collection);
    rule.partner = non_empty(raw.partner);
    rule.warc_match = warc_match;
    if policy.is_rewrite() {
        rule.rewrite_from = non_empty(raw.rewrite_from);
        rule.rewrite_to = non_empty(raw.rewrite_to);
    } else if non_empty(raw.rewrite_from).or(non_empty(raw.rewrite_to)).is_some() {
        log::warn!("ignoring rewrite fields on {policy} rule for '{}'", rule.surt);
    }
    rule.public_comment = non_empty(raw.public_comment);
    rule.private_comment = non_empty(raw.private_comment);

    Ok(rule)
}

/// Parse and validate a whole rule document, failing on the first bad
/// record. Records without an id are numbered after the highest given id.
pub fn parse_rules(json: &str) -> Result<Vec<Rule>, RuleError> {
    let entries = rule_entries(json)?;

    let mut rules = Vec::with_capacity(entries.len());
    let mut seen = HashSet::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let rule = parse_rule(entry).map_err(|err| err.at(index))?;
        if rule.id != RuleId::default() && !seen.insert(rule.id) {
            return Err(RuleError::DuplicateId(rule.id).at(index));
        }
        rules.push(rule);
    }

    let assigned = assign_missing_ids(&mut rules)?;

    log::debug!("parsed {} rules ({} ids assigned)", rules.len(), assigned);
    Ok(rules)
}

/// Validate every record of a document and report each failure with its
/// position. Only a document that is not a rule list fails outright.
pub fn validate_rules(json: &str) -> Result<Vec<RuleError>, RuleError> {
    let entries = rule_entries(json)?;
    let mut seen = HashSet::new();
    let mut problems = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        match parse_rule(entry) {
            Ok(rule) if rule.id != RuleId::default() && !seen.insert(rule.id) => {
                problems.push(RuleError::DuplicateId(rule.id).at(index));
            }
            Ok(_) => {}
            Err(err) => problems.push(err.at(index)),
        }
    }

    Ok(problems)
}

/// Number id-less rules after the highest given id.
fn assign_missing_ids(rules: &mut [Rule]) -> Result<usize, RuleError> {
    if rules.iter().all(|rule| rule.id != RuleId::default()) {
        return Ok(0);
    }

    let mut last = rules.iter().map(|rule| rule.id).max().unwrap_or_default();
    let mut assigned = 0;
    for rule in rules.iter_mut().filter(|rule| rule.id == RuleId::default()) {
        let next = last.0.checked_add(1).ok_or(RuleError::IdsExhausted(last))?;
        last = RuleId(next);
        rule.id = last;
        assigned += 1;
    }
    Ok(assigned)
}

fn rule_entries(json: &str) -> Result<Vec<Value>, RuleError> {
    match serde_json::from_str::<Value>(json)? {
        Value::Array(entries) => Ok(entries),
        Value::Object(mut envelope) => match envelope.remove("result") {
            Some(Value::Array(entries)) => Ok(entries),
            _ => Err(RuleError::NotAList),
        },
        _ => Err(RuleError::NotAList),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.is_empty())
}

fn parse_window(
    bounds: Option<RawBounds>,
    start_field: &'static str,
    end_field: &'static str,
) -> Result<Option<DateWindow>, RuleError> {
    let Some(bounds) = bounds else {
        return Ok(None);
    };
    let window = DateWindow::new(
        parse_date(start_field, bounds.start)?,
        parse_date(end_field, bounds.end)?,
    );
    Ok((!window.is_unbounded()).then_some(window))
}

fn parse_date(
    field: &'static str,
    value: Option<String>,
) -> Result<Option<OffsetDateTime>, RuleError> {
    let Some(value) = non_empty(value) else {
        return Ok(None);
    };
    match OffsetDateTime::parse(&value, &Rfc3339) {
        Ok(date) => Ok(Some(date)),
        Err(err) => Err(RuleError::InvalidDate {
            field,
            reason: err.to_string(),
            value,
        }),
    }
}

fn parse_ip_range(bounds: RawBounds) -> Result<IpRange, RuleError> {
    let start = parse_ip("ip range start", bounds.start)?;
    let end = parse_ip("ip range end", bounds.end)?;
    if start.is_ipv4() != end.is_ipv4() {
        return Err(RuleError::MixedIpFamily { start, end });
    }
    Ok(IpRange::new(start, end))
}

fn parse_ip(field: &'static str, value: Option<String>) -> Result<IpAddr, RuleError> {
    let value = value.ok_or(RuleError::MissingField(field))?;
    value
        .trim()
        .parse()
        .map_err(|_| RuleError::InvalidIp { field, value })
}
