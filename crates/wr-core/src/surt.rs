//! SURT parsing and canonicalization
//!
//! A SURT (Sort-friendly URL Reordering Transform) rewrites a URL so the host
//! labels are reversed and grouped: `https://archive.org/about` becomes
//! `https://(org,archive,)/about`. Rules are keyed by SURT prefixes, so this
//! module exposes the structured form, the canonical string, and the ordered
//! atomic tokens that ancestor enumeration walks.
//!
//! Parsing never fails. Partial input (a bare protocol, an unterminated
//! domain group) parses into a partial SURT, and garbage parses into the
//! empty SURT, which callers treat as "no constraint".

use std::fmt;

use url::{Host, Url};

// =============================================================================
// Delimiters
// =============================================================================

/// Separator between the protocol and the domain group.
pub const PROTOCOL_SEPARATOR: &str = "://";

/// Opens the domain group.
pub const DOMAIN_OPEN: char = '(';

/// Terminates the domain group.
pub const DOMAIN_CLOSE: char = ')';

/// Suffix of every domain label inside the group.
pub const DOMAIN_SEPARATOR: char = ',';

/// Protocol assumed for URLs given without a scheme.
pub const DEFAULT_PROTOCOL: &str = "http";

const LITERAL_SEPARATOR: &str = "://(";

// =============================================================================
// Surt
// =============================================================================

/// Canonical decomposition of a URL or SURT string.
///
/// Constructed once per input and never mutated. Only the canonical string
/// (see [`Surt::serialize`]) is ever persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Surt {
    /// Set once the protocol root parsed, even when the protocol is empty.
    rooted: bool,
    protocol: String,
    domain_parts: Vec<String>,
    closed: bool,
    path_parts: Vec<String>,
    query: String,
    fragment: String,
}

impl Surt {
    /// Parse a literal SURT string such as `https://(org,archive,)/about`.
    ///
    /// Each delimiter is optional: `http` is a bare protocol, and
    /// `http://(org,` is a protocol plus an unterminated domain group.
    pub fn parse(input: &str) -> Self {
        let Some((protocol, rest)) = input.split_once(LITERAL_SEPARATOR) else {
            // No separator: the whole input is a bare protocol token.
            if input.is_empty() || !is_scheme_token(input) {
                return Self::default();
            }
            return Self {
                rooted: true,
                protocol: input.to_ascii_lowercase(),
                ..Self::default()
            };
        };

        if !is_scheme_token(protocol) {
            return Self::default();
        }

        let (domain, rest, closed) = match rest.split_once(DOMAIN_CLOSE) {
            Some((domain, rest)) => (domain, rest, true),
            None => (rest, "", false),
        };

        let (path, query, fragment) = if closed {
            split_path_query_fragment(rest)
        } else {
            ("", "", "")
        };

        Self {
            rooted: true,
            protocol: protocol.to_ascii_lowercase(),
            domain_parts: split_domain(domain),
            closed,
            path_parts: split_path(path),
            query: query.to_string(),
            fragment: fragment.to_string(),
        }
    }

    /// Canonicalize a URL into its SURT.
    ///
    /// The host is lowercased and its labels reversed, a missing scheme
    /// defaults to `http`, and an empty path becomes `/`. Percent-encoding
    /// follows the WHATWG URL serializer. Userinfo and port are not part of
    /// the SURT. URLs that cannot be parsed, or that carry no host, yield the
    /// empty SURT.
    pub fn from_url(input: &str) -> Self {
        let input = input.trim();
        if input.is_empty() {
            return Self::default();
        }

        let with_scheme;
        let candidate = if has_scheme(input) {
            input
        } else {
            with_scheme = format!("{DEFAULT_PROTOCOL}{PROTOCOL_SEPARATOR}{input}");
            &with_scheme
        };

        let url = match Url::parse(candidate) {
            Ok(url) => url,
            Err(err) => {
                log::warn!("unable to canonicalize '{input}': {err}");
                return Self::default();
            }
        };

        let domain_parts: Vec<String> = match url.host() {
            Some(Host::Domain(domain)) => domain
                .trim_end_matches('.')
                .split('.')
                .rev()
                .filter(|label| !label.is_empty())
                .map(str::to_ascii_lowercase)
                .collect(),
            // IP hosts keep their natural order.
            Some(Host::Ipv4(addr)) => vec![addr.to_string()],
            Some(Host::Ipv6(addr)) => vec![format!("[{addr}]")],
            None => Vec::new(),
        };

        if domain_parts.is_empty() {
            log::warn!("unable to canonicalize '{input}': no host");
            return Self::default();
        }

        let path = match url.path() {
            "" => "/",
            path => path,
        };

        Self {
            rooted: true,
            protocol: url.scheme().to_string(),
            domain_parts,
            closed: true,
            path_parts: split_path(path),
            query: url.query().unwrap_or_default().to_string(),
            fragment: url.fragment().unwrap_or_default().to_string(),
        }
    }

    /// Interpret `input` as a literal SURT when it opens a domain group,
    /// directly or after a leading protocol, otherwise as a URL.
    pub fn from_surt_or_url(input: &str) -> Self {
        let input = input.trim();
        if input.starts_with(DOMAIN_OPEN) {
            return Self::parse(&format!("{PROTOCOL_SEPARATOR}{input}"));
        }
        match input.split_once(PROTOCOL_SEPARATOR) {
            Some((scheme, rest)) if is_scheme_token(scheme) && rest.starts_with(DOMAIN_OPEN) => {
                Self::parse(input)
            }
            _ => Self::from_url(input),
        }
    }

    /// Scheme, lowercase. Empty means unspecified.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Domain labels in SURT order, top-level label first.
    pub fn domain_parts(&self) -> &[String] {
        &self.domain_parts
    }

    /// Whether the domain group was terminated with `)`.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn path_parts(&self) -> &[String] {
        &self.path_parts
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    /// True for the degenerate SURT produced by malformed input. The
    /// unspecified-protocol root `://(` is not empty.
    pub fn is_empty(&self) -> bool {
        !self.rooted
    }

    /// Atomic tokens in order: `proto://`, `(`, one `label,` per domain part,
    /// `)`, one `/segment` per path part, `?query`, `#fragment`.
    ///
    /// Concatenating any leading run of tokens yields a structurally
    /// meaningful prefix.
    pub fn tokens(&self) -> Vec<String> {
        if self.is_empty() {
            return Vec::new();
        }

        let mut tokens = Vec::with_capacity(4 + self.domain_parts.len() + self.path_parts.len());
        tokens.push(format!("{}{PROTOCOL_SEPARATOR}", self.protocol));
        tokens.push(DOMAIN_OPEN.to_string());
        for part in &self.domain_parts {
            tokens.push(format!("{part}{DOMAIN_SEPARATOR}"));
        }

        if self.closed {
            tokens.push(DOMAIN_CLOSE.to_string());
            for part in &self.path_parts {
                tokens.push(format!("/{part}"));
            }
            if !self.query.is_empty() {
                tokens.push(format!("?{}", self.query));
            }
            if !self.fragment.is_empty() {
                tokens.push(format!("#{}", self.fragment));
            }
        }

        tokens
    }

    /// Canonical string form.
    pub fn serialize(&self) -> String {
        self.tokens().concat()
    }

    /// Every structural prefix of the canonical string, most specific first.
    ///
    /// For `https://(org,archive,)/about` this yields the full string, then
    /// `https://(org,archive,)`, `https://(org,archive,`, `https://(org,`,
    /// `https://(` and finally `https://`.
    pub fn ancestors(&self) -> Vec<String> {
        let mut prefix = String::new();
        let mut ancestors: Vec<String> = self
            .tokens()
            .iter()
            .map(|token| {
                prefix.push_str(token);
                prefix.clone()
            })
            .collect();
        ancestors.reverse();
        ancestors
    }
}

impl fmt::Display for Surt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Whether `input` opens with `scheme://`. A `://` later on, as in a
/// redirect query parameter, does not count.
fn has_scheme(input: &str) -> bool {
    input
        .split_once(PROTOCOL_SEPARATOR)
        .is_some_and(|(scheme, _)| !scheme.is_empty() && is_scheme_token(scheme))
}

/// RFC 3986 scheme syntax. The empty token is allowed and means unspecified.
fn is_scheme_token(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        None => true,
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        Some(_) => false,
    }
}

fn split_path_query_fragment(rest: &str) -> (&str, &str, &str) {
    match rest.split_once('?') {
        Some((path, query_fragment)) => {
            let (query, fragment) = query_fragment.split_once('#').unwrap_or((query_fragment, ""));
            (path, query, fragment)
        }
        None => {
            let (path, fragment) = rest.split_once('#').unwrap_or((rest, ""));
            (path, "", fragment)
        }
    }
}

fn split_domain(domain: &str) -> Vec<String> {
    domain
        .split(DOMAIN_SEPARATOR)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Only the empty token produced by the leading `/` is dropped, so `/`
/// becomes a single empty segment and trailing slashes survive.
fn split_path(path: &str) -> Vec<String> {
    if path.is_empty() {
        return Vec::new();
    }
    path.strip_prefix('/')
        .unwrap_or(path)
        .split('/')
        .map(str::to_string)
        .collect()
}
