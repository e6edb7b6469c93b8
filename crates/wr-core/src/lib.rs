//! Wayback Rules Core Library
//!
//! This crate decides which playback rules apply to an archived URL. Rules
//! are keyed by SURT prefixes; a lookup canonicalizes the target, enumerates
//! its structural ancestors, and filters the matching rules by protocol,
//! negation, scope and time before ordering them most specific first.
//!
//! # Architecture
//!
//! Resolution is a pure function of the rule slice, the target and a
//! [`ResolveContext`]. Rule storage sits behind the [`RuleStore`] trait, and
//! the navigation index is an immutable snapshot republished whole after
//! every write, so readers never observe a partially built tree.
//!
//! # Modules
//!
//! - `surt`: SURT parsing, URL canonicalization and ancestor enumeration
//! - `pattern`: SQL-LIKE matching with `%` as the only wildcard
//! - `types`: Rule records, policies and resolution context
//! - `store`: Rule store trait and the in-memory store
//! - `index`: Hierarchical component index with versioned snapshots
//! - `resolver`: Rule resolution engine
//! - `search`: Search-term disambiguation and rule search
//! - `clock`: Time source

pub mod clock;
pub mod index;
pub mod pattern;
pub mod resolver;
pub mod search;
pub mod store;
pub mod surt;
pub mod types;

// Re-export commonly used types
pub use clock::{Clock, FixedClock, SystemClock};
pub use index::{ComponentIndex, IndexHandle, IndexSnapshot};
pub use pattern::{like, LikePattern};
pub use resolver::{resolve, Resolver};
pub use search::{disambiguate, search_rules, SearchError, SearchTerm};
pub use store::{MemoryStore, RuleFilter, RuleOrder, RuleStore, StoreError};
pub use surt::Surt;
pub use types::{DateWindow, FilterFlags, IpRange, Policy, ResolveContext, Rule, RuleId};
