//! `%`-wildcard pattern matching
//!
//! Rule SURTs and negations use the SQL `LIKE` convention: `%` stands for any
//! run of characters (including none) and every other character is literal.
//! Patterns are compiled once into a small op program of anchored and
//! floating literals.

/// The wildcard sentinel.
pub const WILDCARD: char = '%';

/// The global wildcard rule SURT: matches every target.
pub const GLOBAL_WILDCARD: &str = "%";

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternOp {
    /// Literal must occur at the current position.
    MatchLit(String),
    /// Literal must occur somewhere at or after the current position.
    FindLit(String),
    /// Literal must end exactly at the end of the input.
    MatchTail(String),
    /// The input must be fully consumed.
    AssertEnd,
}

/// A compiled `LIKE` pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LikePattern {
    ops: Vec<PatternOp>,
}

impl LikePattern {
    pub fn new(pattern: &str) -> Self {
        let segments: Vec<&str> = pattern.split(WILDCARD).collect();
        let last = segments.len() - 1;
        let mut ops = Vec::with_capacity(segments.len() + 1);

        for (idx, segment) in segments.iter().enumerate() {
            if idx == 0 {
                if !segment.is_empty() {
                    ops.push(PatternOp::MatchLit((*segment).to_string()));
                }
                if last == 0 {
                    ops.push(PatternOp::AssertEnd);
                }
            } else if idx == last {
                if !segment.is_empty() {
                    ops.push(PatternOp::MatchTail((*segment).to_string()));
                }
            } else if !segment.is_empty() {
                ops.push(PatternOp::FindLit((*segment).to_string()));
            }
        }

        Self { ops }
    }

    /// Check whether the whole of `text` matches the pattern.
    pub fn matches(&self, text: &str) -> bool {
        let mut pos = 0usize;

        for op in &self.ops {
            match op {
                PatternOp::MatchLit(lit) => {
                    if !text[pos..].starts_with(lit.as_str()) {
                        return false;
                    }
                    pos += lit.len();
                }
                PatternOp::FindLit(lit) => match text[pos..].find(lit.as_str()) {
                    Some(found) => pos += found + lit.len(),
                    None => return false,
                },
                PatternOp::MatchTail(lit) => {
                    // The tail may not overlap what was already consumed.
                    if text.len() < pos + lit.len() || !text.ends_with(lit.as_str()) {
                        return false;
                    }
                    pos = text.len();
                }
                PatternOp::AssertEnd => {
                    if pos != text.len() {
                        return false;
                    }
                }
            }
        }

        true
    }
}

/// One-shot `LIKE` evaluation.
pub fn like(pattern: &str, text: &str) -> bool {
    LikePattern::new(pattern).matches(text)
}

/// True for the global wildcard rule SURT.
#[inline]
pub fn is_global_wildcard(surt: &str) -> bool {
    surt == GLOBAL_WILDCARD
}

/// For a SURT ending in the wildcard sentinel, the literal prefix it covers.
#[inline]
pub fn wildcard_prefix(surt: &str) -> Option<&str> {
    surt.strip_suffix(WILDCARD)
}
