//! Rule store
//!
//! The core only needs a queryable source of rule records. [`RuleStore`]
//! captures the filter-by-field and order-by-field primitives it relies on;
//! [`MemoryStore`] is an in-process implementation whose write path
//! rebuilds and republishes the component index.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use crate::index::{IndexHandle, IndexSnapshot};
use crate::resolver::specificity_order;
use crate::types::{Rule, RuleId};

/// Error type for store writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Rule not found: {0}")]
    NotFound(RuleId),
    #[error("Duplicate rule id: {0}")]
    DuplicateId(RuleId),
    #[error("No rule id left to assign after {0}")]
    IdsExhausted(RuleId),
}

// =============================================================================
// Queries
// =============================================================================

/// Field filters; every set field must hold.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleFilter {
    pub surt_exact: Option<String>,
    pub surt_prefix: Option<String>,
    pub surt_in: Option<HashSet<String>>,
    pub enabled_only: bool,
}

impl RuleFilter {
    pub fn surt_exact(surt: impl Into<String>) -> Self {
        Self {
            surt_exact: Some(surt.into()),
            ..Self::default()
        }
    }

    pub fn surt_prefix(prefix: impl Into<String>) -> Self {
        Self {
            surt_prefix: Some(prefix.into()),
            ..Self::default()
        }
    }

    pub fn surt_in<I: IntoIterator<Item = String>>(surts: I) -> Self {
        Self {
            surt_in: Some(surts.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn enabled(mut self) -> Self {
        self.enabled_only = true;
        self
    }

    pub fn accepts(&self, rule: &Rule) -> bool {
        if self.enabled_only && !rule.enabled {
            return false;
        }
        if self.surt_exact.as_ref().is_some_and(|surt| *surt != rule.surt) {
            return false;
        }
        if self
            .surt_prefix
            .as_ref()
            .is_some_and(|prefix| !rule.surt.starts_with(prefix.as_str()))
        {
            return false;
        }
        if self.surt_in.as_ref().is_some_and(|surts| !surts.contains(&rule.surt)) {
            return false;
        }
        true
    }
}

/// Result ordering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuleOrder {
    /// Ascending `surt`, then id.
    #[default]
    Surt,
    /// Most specific first, as resolution orders its output.
    Specificity,
    /// Ascending id.
    Id,
}

impl RuleOrder {
    pub fn sort(self, rules: &mut [Rule]) {
        match self {
            Self::Surt => rules.sort_by(|a, b| a.surt.cmp(&b.surt).then(a.id.cmp(&b.id))),
            Self::Specificity => rules.sort_by(specificity_order),
            Self::Id => rules.sort_by_key(|rule| rule.id),
        }
    }
}

/// A queryable source of rule records.
pub trait RuleStore {
    /// Rules accepted by `filter`, ordered by `order`.
    fn query(&self, filter: &RuleFilter, order: RuleOrder) -> Vec<Rule>;

    /// Every rule, ordered by surt.
    fn all(&self) -> Vec<Rule> {
        self.query(&RuleFilter::default(), RuleOrder::Surt)
    }
}

// =============================================================================
// In-memory store
// =============================================================================

/// Copy-on-write rule store.
///
/// Readers take an immutable [`Arc`] snapshot of the rule set; writers
/// replace it wholesale and republish the component index before
/// returning.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rules: RwLock<Arc<Vec<Rule>>>,
    index: IndexHandle,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store seeded with `rules`.
    pub fn with_rules(rules: Vec<Rule>) -> Result<Self, StoreError> {
        let store = Self::new();
        store.replace_all(rules)?;
        Ok(store)
    }

    /// Immutable view of the current rule set.
    pub fn snapshot(&self) -> Arc<Vec<Rule>> {
        let guard = self.rules.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// The current component index generation.
    pub fn index(&self) -> Arc<IndexSnapshot> {
        self.index.load()
    }

    pub fn get(&self, id: RuleId) -> Option<Rule> {
        self.snapshot().iter().find(|rule| rule.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Insert `rule` under a fresh id and return that id.
    pub fn create(&self, mut rule: Rule) -> Result<RuleId, StoreError> {
        self.write(|rules| {
            let id = match rules.iter().map(|r| r.id).max() {
                Some(last) => {
                    RuleId(last.0.checked_add(1).ok_or(StoreError::IdsExhausted(last))?)
                }
                None => RuleId(1),
            };
            rule.id = id;
            rules.push(rule);
            Ok(id)
        })
    }

    /// Replace the rule with the same id.
    pub fn update(&self, rule: Rule) -> Result<(), StoreError> {
        self.write(|rules| {
            let slot = rules
                .iter_mut()
                .find(|existing| existing.id == rule.id)
                .ok_or(StoreError::NotFound(rule.id))?;
            *slot = rule;
            Ok(())
        })
    }

    pub fn delete(&self, id: RuleId) -> Result<Rule, StoreError> {
        self.write(|rules| {
            let position = rules
                .iter()
                .position(|rule| rule.id == id)
                .ok_or(StoreError::NotFound(id))?;
            Ok(rules.remove(position))
        })
    }

    /// Replace the whole rule set. Ids must be unique.
    pub fn replace_all(&self, rules: Vec<Rule>) -> Result<(), StoreError> {
        let mut seen = HashSet::with_capacity(rules.len());
        for rule in &rules {
            if !seen.insert(rule.id) {
                return Err(StoreError::DuplicateId(rule.id));
            }
        }
        self.write(|current| {
            *current = rules;
            Ok(())
        })
    }

    /// Apply `edit` to a copy of the rule set, then swap in the copy and
    /// the rebuilt index. A failed edit leaves both untouched.
    fn write<T, F>(&self, edit: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Vec<Rule>) -> Result<T, StoreError>,
    {
        let mut slot = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::clone(&slot);
        let output = edit(&mut next)?;

        self.index.rebuild(next.iter().map(|rule| (rule.protocol.as_str(), rule.surt.as_str())));
        *slot = Arc::new(next);
        Ok(output)
    }
}

impl RuleStore for MemoryStore {
    fn query(&self, filter: &RuleFilter, order: RuleOrder) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .snapshot()
            .iter()
            .filter(|rule| filter.accepts(rule))
            .cloned()
            .collect();
        order.sort(&mut rules);
        rules
    }
}
