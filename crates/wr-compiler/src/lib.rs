//! Wayback Rules Compiler
//!
//! This crate turns JSON rule documents into validated [`wr_core::Rule`]s,
//! removes duplicate definitions, and renders rules back into the JSON
//! summaries and response envelopes clients consume.

pub mod optimizer;
pub mod parser;
pub mod render;

pub use optimizer::{optimize_rules, OptimizeStats};
pub use parser::{parse_rule, parse_rules, validate_rules, RuleError};
pub use render::{error, rule_summary, rules_summary, success};
