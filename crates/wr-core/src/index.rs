//! Hierarchical component index
//!
//! A prefix tree over the domain groups of every rule SURT, rooted per
//! protocol. For any protocol and domain prefix it answers "which next
//! domain labels exist in the rule corpus", which is what navigation UIs
//! offer as the next path segment.
//!
//! The index is a cache derived from the rule set. It is never patched in
//! place: every rebuild produces a new [`IndexSnapshot`] that
//! [`IndexHandle::publish`] swaps in with a single pointer replacement, so
//! readers holding the previous snapshot are unaffected.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::pattern::WILDCARD;
use crate::surt::{DOMAIN_CLOSE, DOMAIN_OPEN, DOMAIN_SEPARATOR, PROTOCOL_SEPARATOR};

// =============================================================================
// Tree
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Node {
    children: BTreeMap<String, Node>,
}

impl Node {
    fn descend<S: AsRef<str>>(&self, path: &[S]) -> Option<&Node> {
        path.iter()
            .try_fold(self, |node, part| node.children.get(part.as_ref()))
    }
}

/// Immutable prefix tree keyed by protocol, then by SURT domain label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComponentIndex {
    roots: BTreeMap<String, Node>,
}

impl ComponentIndex {
    /// Build from `(protocol, surt)` pairs.
    ///
    /// Only the domain group of each SURT (everything before the first `)`)
    /// is indexed. An empty protocol falls back to the scheme embedded in the
    /// SURT itself, if any.
    pub fn build<I, P, S>(rule_surts: I) -> Self
    where
        I: IntoIterator<Item = (P, S)>,
        P: AsRef<str>,
        S: AsRef<str>,
    {
        let mut roots: BTreeMap<String, Node> = BTreeMap::new();

        for (protocol, surt) in rule_surts {
            let (protocol, parts) = domain_path(protocol.as_ref(), surt.as_ref());
            let mut node = roots.entry(protocol).or_default();
            for part in parts {
                node = node.children.entry(part).or_default();
            }
        }

        Self { roots }
    }

    /// Domain labels that follow `prefix` under `protocol`.
    ///
    /// A missing label anywhere along `prefix` yields the empty set. An
    /// empty `protocol` unions the children across every protocol root.
    pub fn children_at<S: AsRef<str>>(&self, protocol: &str, prefix: &[S]) -> BTreeSet<String> {
        self.matching_nodes(protocol, prefix)
            .flat_map(|node| node.children.keys().cloned())
            .collect()
    }

    pub fn has_children<S: AsRef<str>>(&self, protocol: &str, prefix: &[S]) -> bool {
        self.matching_nodes(protocol, prefix)
            .any(|node| !node.children.is_empty())
    }

    /// Protocol roots present in the corpus. The unspecified protocol
    /// appears as the empty string.
    pub fn protocols(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn matching_nodes<'a, S: AsRef<str>>(
        &'a self,
        protocol: &str,
        prefix: &'a [S],
    ) -> impl Iterator<Item = &'a Node> + 'a {
        let protocol = protocol.to_ascii_lowercase();
        self.roots
            .iter()
            .filter(move |(root, _)| protocol.is_empty() || **root == protocol)
            .filter_map(move |(_, node)| node.descend(prefix))
    }
}

/// Split a rule SURT into its index key: protocol and domain labels.
fn domain_path(protocol: &str, surt: &str) -> (String, Vec<String>) {
    let group = surt.split_once(DOMAIN_CLOSE).map_or(surt, |(group, _)| group);
    let (embedded, group) = group.split_once(PROTOCOL_SEPARATOR).unwrap_or(("", group));
    let group = group.strip_prefix(DOMAIN_OPEN).unwrap_or(group);

    let protocol = if protocol.is_empty() { embedded } else { protocol };
    let parts = group
        .split(DOMAIN_SEPARATOR)
        .take_while(|part| !part.contains(WILDCARD))
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect();

    (protocol.to_ascii_lowercase(), parts)
}

// =============================================================================
// Snapshots
// =============================================================================

/// One generation of the index.
#[derive(Debug, Default)]
pub struct IndexSnapshot {
    generation: u64,
    index: ComponentIndex,
}

impl IndexSnapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn index(&self) -> &ComponentIndex {
        &self.index
    }
}

/// Shared slot holding the current index snapshot.
#[derive(Debug, Default)]
pub struct IndexHandle {
    current: RwLock<Arc<IndexSnapshot>>,
}

impl IndexHandle {
    pub fn new(index: ComponentIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(IndexSnapshot { generation: 0, index })),
        }
    }

    /// The current snapshot. It stays valid after later publishes.
    pub fn load(&self) -> Arc<IndexSnapshot> {
        let guard = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Replace the current snapshot, returning the new generation.
    pub fn publish(&self, index: ComponentIndex) -> u64 {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let generation = slot.generation + 1;
        *slot = Arc::new(IndexSnapshot { generation, index });
        log::debug!("published component index generation {generation}");
        generation
    }

    /// Build a fresh index outside the lock, then publish it.
    pub fn rebuild<I, P, S>(&self, rule_surts: I) -> u64
    where
        I: IntoIterator<Item = (P, S)>,
        P: AsRef<str>,
        S: AsRef<str>,
    {
        self.publish(ComponentIndex::build(rule_surts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    const NONE: [&str; 0] = [];

    #[test]
    fn test_children_at_protocol_root() {
        let index = ComponentIndex::build([("", "https://(org,"), ("", "https://(com,")]);
        assert_eq!(index.children_at("https", &NONE), set(&["com", "org"]));
        assert_eq!(index.children_at("https", &["gov"]), set(&[]));
        assert!(!index.has_children("https", &["gov"]));
    }

    #[test]
    fn test_children_follow_domain_group_only() {
        let index = ComponentIndex::build([
            ("https", "https://(org,archive,)/about"),
            ("https", "https://(org,archive,api,"),
            ("https", "https://(org,example,)"),
        ]);
        assert_eq!(index.children_at("https", &["org"]), set(&["archive", "example"]));
        assert_eq!(index.children_at("https", &["org", "archive"]), set(&["api"]));
        assert!(index.has_children("https", &["org"]));
        assert!(!index.has_children("https", &["org", "example"]));
    }

    #[test]
    fn test_missing_part_does_not_skip() {
        let index = ComponentIndex::build([("http", "http://(org,archive,")]);
        assert!(index.children_at("http", &["archive"]).is_empty());
        assert!(index.children_at("ftp", &NONE).is_empty());
    }

    #[test]
    fn test_unspecified_protocol_unions_roots() {
        let index = ComponentIndex::build([
            ("http", "http://(org,archive,"),
            ("https", "https://(com,example,"),
            ("", "://(net,"),
        ]);
        assert_eq!(index.children_at("", &NONE), set(&["com", "net", "org"]));
        assert_eq!(index.children_at("HTTP", &NONE), set(&["org"]));
        assert_eq!(index.protocols().collect::<Vec<_>>(), vec!["", "http", "https"]);
    }

    #[test]
    fn test_explicit_protocol_wins_over_embedded() {
        let index = ComponentIndex::build([("ftp", "(org,archive,)")]);
        assert_eq!(index.children_at("ftp", &NONE), set(&["org"]));
    }

    #[test]
    fn test_wildcards_are_not_indexed() {
        let index = ComponentIndex::build([("", "%"), ("https", "https://(org,%")]);
        assert_eq!(index.children_at("https", &NONE), set(&["org"]));
        assert!(index.children_at("", &["org"]).is_empty());

        let partial = ComponentIndex::build([("https", "https://(org,arch%")]);
        assert_eq!(partial.children_at("https", &NONE), set(&["org"]));
        assert!(partial.children_at("https", &["org"]).is_empty());
    }

    #[test]
    fn test_empty_index() {
        let index = ComponentIndex::build(Vec::<(String, String)>::new());
        assert!(index.is_empty());
        assert!(index.children_at("", &NONE).is_empty());
    }

    #[test]
    fn test_publish_swaps_snapshot() {
        let handle = IndexHandle::new(ComponentIndex::build([("https", "https://(org,")]));
        let before = handle.load();
        assert_eq!(before.generation(), 0);

        let generation = handle.rebuild([("https", "https://(com,")]);
        assert_eq!(generation, 1);

        // The old snapshot is untouched.
        assert_eq!(before.index().children_at("https", &NONE), set(&["org"]));
        let after = handle.load();
        assert_eq!(after.generation(), 1);
        assert_eq!(after.index().children_at("https", &NONE), set(&["com"]));
    }

    #[test]
    fn test_concurrent_readers_see_whole_snapshots() {
        let handle = IndexHandle::new(ComponentIndex::build([("https", "https://(org,a,")]));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let snapshot = handle.load();
                        let children = snapshot.index().children_at("https", &["org"]);
                        assert_eq!(children.len(), 1);
                    }
                });
            }
            scope.spawn(|| {
                for round in 0..50 {
                    let surt = format!("https://(org,{round},");
                    handle.rebuild([("https", surt.as_str())]);
                }
            });
        });
        assert_eq!(handle.load().generation(), 50);
    }
}
