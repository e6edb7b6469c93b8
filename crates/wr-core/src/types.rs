//! Core type definitions for the rules engine
//!
//! These types mirror the rule records held by the external store and are
//! used throughout resolution, indexing and search.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

// =============================================================================
// Rule Identity
// =============================================================================

/// Opaque rule identifier assigned by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub u64);

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Policies
// =============================================================================

/// What playback should do when a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Policy {
    /// Block playback
    Block,
    /// Block playback with message
    #[serde(rename = "message")]
    BlockMessage,
    /// Allow playback
    Allow,
    /// Require auth for playback
    #[serde(rename = "auth")]
    RequireAuth,
    /// Rewrite playback for the entire page
    RewriteAll,
    /// Rewrite playback JavaScript
    RewriteJs,
    /// Rewrite playback headers
    RewriteHeaders,
}

impl Policy {
    pub const ALL: [Policy; 7] = [
        Self::Block,
        Self::BlockMessage,
        Self::Allow,
        Self::RequireAuth,
        Self::RewriteAll,
        Self::RewriteJs,
        Self::RewriteHeaders,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::BlockMessage => "message",
            Self::Allow => "allow",
            Self::RequireAuth => "auth",
            Self::RewriteAll => "rewrite-all",
            Self::RewriteJs => "rewrite-js",
            Self::RewriteHeaders => "rewrite-headers",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|policy| policy.as_str() == value)
    }

    /// Tie-break rank among equally specific rules; lower sorts first.
    ///
    /// Restrictive policies come before permissive ones: block, message,
    /// auth, the three rewrites, then allow.
    pub fn precedence(self) -> u8 {
        match self {
            Self::Block => 0,
            Self::BlockMessage => 1,
            Self::RequireAuth => 2,
            Self::RewriteAll => 3,
            Self::RewriteJs => 4,
            Self::RewriteHeaders => 5,
            Self::Allow => 6,
        }
    }

    /// Whether `rewrite_from` / `rewrite_to` carry meaning for this policy.
    pub fn is_rewrite(self) -> bool {
        matches!(self, Self::RewriteAll | Self::RewriteJs | Self::RewriteHeaders)
    }
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Environments
// =============================================================================

pub const ENVIRONMENT_PROD: &str = "prod";
pub const ENVIRONMENT_TEST: &str = "test";

/// Known deployment scopes.
pub const ENVIRONMENTS: &[&str] = &[ENVIRONMENT_PROD, ENVIRONMENT_TEST];

// =============================================================================
// Scoping Filters
// =============================================================================

/// A date interval; a missing bound leaves that side unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DateWindow {
    #[serde(with = "time::serde::rfc3339::option")]
    pub start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub end: Option<OffsetDateTime>,
}

impl DateWindow {
    pub fn new(start: Option<OffsetDateTime>, end: Option<OffsetDateTime>) -> Self {
        Self { start, end }
    }

    /// Both bounds are exclusive: `start < date < end`.
    pub fn contains(&self, date: OffsetDateTime) -> bool {
        self.start.map_or(true, |start| start < date) && self.end.map_or(true, |end| date < end)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// An inclusive IP address range. Both ends share one address family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl IpRange {
    pub fn new(start: IpAddr, end: IpAddr) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let same_family =
            ip.is_ipv4() == self.start.is_ipv4() && ip.is_ipv4() == self.end.is_ipv4();
        same_family && self.start <= ip && ip <= self.end
    }
}

// =============================================================================
// Rule
// =============================================================================

/// A playback policy record.
///
/// `surt` is always present. Every other filter is an additional
/// restriction; absence means unconstrained.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Rule {
    pub id: RuleId,
    pub policy: Policy,
    pub enabled: bool,
    pub environment: String,
    /// Canonical SURT, SURT prefix, or pattern ending in `%`.
    pub surt: String,
    /// Exception pattern; a target matching it disqualifies the rule.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neg_surt: Option<String>,
    /// Empty matches any protocol.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub protocol: String,
    #[serde(rename = "capture_date", skip_serializing_if = "Option::is_none")]
    pub capture_window: Option<DateWindow>,
    #[serde(rename = "retrieve_date", skip_serializing_if = "Option::is_none")]
    pub retrieve_window: Option<DateWindow>,
    /// Embargo: the rule applies until this many seconds after capture.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_capture: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_range: Option<IpRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
    /// Regex over WARC filenames.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warc_match: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rewrite_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_comment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_comment: Option<String>,
}

impl Rule {
    /// An enabled production rule with no filters.
    pub fn new(id: RuleId, policy: Policy, surt: impl Into<String>) -> Self {
        Self {
            id,
            policy,
            enabled: true,
            environment: ENVIRONMENT_PROD.to_string(),
            surt: surt.into(),
            neg_surt: None,
            protocol: String::new(),
            capture_window: None,
            retrieve_window: None,
            seconds_since_capture: None,
            ip_range: None,
            collection: None,
            partner: None,
            warc_match: None,
            rewrite_from: None,
            rewrite_to: None,
            public_comment: None,
            private_comment: None,
        }
    }

    /// True when the rule's surt is exactly the global wildcard.
    pub fn is_global_wildcard(&self) -> bool {
        crate::pattern::is_global_wildcard(&self.surt)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.policy.as_str().to_uppercase(), self.surt)
    }
}

// =============================================================================
// Resolution Context
// =============================================================================

bitflags::bitflags! {
    /// Temporal filters the resolver enforces.
    ///
    /// Clearing a flag opts out of that filter entirely, so rules
    /// constrained by it are neither matched nor rejected on that basis.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FilterFlags: u8 {
        /// Rule capture windows against the context capture date
        const CAPTURE_WINDOW = 1 << 0;
        /// Rule retrieve windows against the context retrieve date
        const RETRIEVE_WINDOW = 1 << 1;
        /// `seconds_since_capture` embargoes
        const EMBARGO = 1 << 2;
    }
}

impl Default for FilterFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Attributes of a playback request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveContext {
    /// Request protocol. When unset only protocol-unset rules are eligible.
    pub protocol: Option<String>,
    pub capture_date: Option<OffsetDateTime>,
    /// Defaults to the resolver clock's "now".
    pub retrieve_date: Option<OffsetDateTime>,
    pub ip: Option<IpAddr>,
    pub collection: Option<String>,
    pub partner: Option<String>,
    /// Restrict candidates to rules declaring exactly this negation.
    pub neg_surt: Option<String>,
    pub environment: Option<String>,
    /// WARC filename, checked against rules' `warc_match`.
    pub warc_name: Option<String>,
    pub filters: FilterFlags,
}

impl ResolveContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into().to_ascii_lowercase());
        self
    }

    pub fn with_capture_date(mut self, date: OffsetDateTime) -> Self {
        self.capture_date = Some(date);
        self
    }

    pub fn with_retrieve_date(mut self, date: OffsetDateTime) -> Self {
        self.retrieve_date = Some(date);
        self
    }

    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip = Some(ip);
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partner = Some(partner.into());
        self
    }

    pub fn with_neg_surt(mut self, neg_surt: impl Into<String>) -> Self {
        self.neg_surt = Some(neg_surt.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_warc_name(mut self, warc_name: impl Into<String>) -> Self {
        self.warc_name = Some(warc_name.into());
        self
    }

    pub fn without_filter(mut self, flags: FilterFlags) -> Self {
        self.filters.remove(flags);
        self
    }
}
