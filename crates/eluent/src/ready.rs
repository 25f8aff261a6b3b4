//! Blocking resolution and the readiness calculator.
//!
//! An atom is *ready* when all four gates pass: its status is
//! non-blocking, its type is not abstract (unless abstract types were
//! requested), every blocking dependency is satisfied, and any
//! `defer_until` instant has passed.
//!
//! Blocking is per-kind:
//!
//! - `blocks` — the source must be finished (closed or discarded).
//! - `parent_child` — the *immediate* parent must be finished. Parent
//!   links do not cascade; each child sees only its direct parent.
//! - `waits_for` — the source and everything reachable from it along
//!   blocking kinds must be finished.
//! - `conditional_blocks` — blocks only when the source closed with a
//!   failure reason (`fail…`, `error…`, `abort…`, case-insensitive).

use crate::domain::{
    Atom, AtomFilter, AtomId, Bond, BondKind, SortPolicy, Status, StatusRegistry, TypeRegistry,
};
use crate::graph::{blocking_kinds, DepGraph};
use crate::store::BondKey;
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::HashMap;

/// Hour width of a hybrid-sort age bucket.
///
/// Inside one priority bucket, an age gap of at least this many hours
/// promotes the older atom; closer ages count as contemporaneous.
pub const HYBRID_AGE_GAP_HOURS: i64 = 48;

/// Whether a close reason reads as a failure for `conditional_blocks`.
#[must_use]
pub fn is_failure_reason(reason: &str) -> bool {
    let lower = reason.trim().to_ascii_lowercase();
    ["fail", "error", "abort"]
        .iter()
        .any(|prefix| lower.starts_with(prefix))
}

/// Whether a blocker in this status still blocks.
fn is_finished(status: Status) -> bool {
    matches!(status, Status::Closed | Status::Discard)
}

/// Resolves blocking per atom against one consistent snapshot of the
/// store, memoizing within its lifetime.
///
/// A resolver is only valid for the store version it was built from; the
/// [`BlockingCache`] wrapper handles cross-version invalidation.
pub struct BlockingResolver<'a> {
    atoms: &'a HashMap<AtomId, Atom>,
    bonds: &'a HashMap<BondKey, Bond>,
    graph: DepGraph,
    memo: RefCell<HashMap<AtomId, bool>>,
}

impl<'a> BlockingResolver<'a> {
    /// Build a resolver over the given maps.
    #[must_use]
    pub fn new(atoms: &'a HashMap<AtomId, Atom>, bonds: &'a HashMap<BondKey, Bond>) -> Self {
        Self {
            atoms,
            bonds,
            graph: DepGraph::build(atoms, bonds),
            memo: RefCell::new(HashMap::new()),
        }
    }

    /// Whether any blocking dependency of the atom is unsatisfied.
    #[must_use]
    pub fn is_blocked(&self, atom_id: &AtomId) -> bool {
        if let Some(&cached) = self.memo.borrow().get(atom_id) {
            return cached;
        }
        let blocked = self.compute(atom_id);
        self.memo.borrow_mut().insert(atom_id.clone(), blocked);
        blocked
    }

    /// The unsatisfied blockers of an atom, with the bond kind that makes
    /// each one count.
    #[must_use]
    pub fn unsatisfied_blockers(&self, atom_id: &AtomId) -> Vec<(AtomId, BondKind)> {
        let mut out: Vec<(AtomId, BondKind)> = self
            .bonds
            .values()
            .filter(|bond| &bond.target_id == atom_id)
            .filter(|bond| self.bond_blocks(bond))
            .map(|bond| (bond.source_id.clone(), bond.kind))
            .collect();
        out.sort();
        out
    }

    fn compute(&self, atom_id: &AtomId) -> bool {
        self.bonds
            .values()
            .any(|bond| &bond.target_id == atom_id && self.bond_blocks(bond))
    }

    fn bond_blocks(&self, bond: &Bond) -> bool {
        let Some(source) = self.atoms.get(&bond.source_id) else {
            // Dangling bond: the missing endpoint cannot block anything.
            return false;
        };

        match bond.kind {
            BondKind::Blocks | BondKind::ParentChild => !is_finished(source.status),
            BondKind::WaitsFor => {
                if !is_finished(source.status) {
                    return true;
                }
                self.graph
                    .descendants(&bond.source_id, &blocking_kinds())
                    .iter()
                    .any(|descendant_id| {
                        self.atoms
                            .get(descendant_id)
                            .is_some_and(|a| !is_finished(a.status))
                    })
            }
            BondKind::ConditionalBlocks => {
                source.status == Status::Closed
                    && source
                        .close_reason
                        .as_deref()
                        .is_some_and(is_failure_reason)
            }
            _ => false,
        }
    }
}

/// Version-keyed blocking memo.
///
/// Keyed on `(atom_id, store_version)`: results for an old version are
/// discarded wholesale the first time a newer version is queried.
#[derive(Debug, Default)]
pub struct BlockingCache {
    version: u64,
    blocked: HashMap<AtomId, bool>,
}

impl BlockingCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up (or compute and remember) blocking for one atom at the
    /// given store version.
    pub fn is_blocked(
        &mut self,
        version: u64,
        resolver: &BlockingResolver<'_>,
        atom_id: &AtomId,
    ) -> bool {
        if self.version != version {
            self.blocked.clear();
            self.version = version;
        }
        if let Some(&cached) = self.blocked.get(atom_id) {
            return cached;
        }
        let blocked = resolver.is_blocked(atom_id);
        self.blocked.insert(atom_id.clone(), blocked);
        blocked
    }
}

/// Compute the ready set.
///
/// Applies the four readiness gates, then the caller's filter, then the
/// sort policy and limit.
#[must_use]
#[allow(clippy::implicit_hasher)]
pub fn ready_atoms(
    atoms: &HashMap<AtomId, Atom>,
    bonds: &HashMap<BondKey, Bond>,
    statuses: &StatusRegistry,
    types: &TypeRegistry,
    filter: &AtomFilter,
    policy: SortPolicy,
    now: DateTime<Utc>,
) -> Vec<Atom> {
    let resolver = BlockingResolver::new(atoms, bonds);

    let mut ready: Vec<Atom> = atoms
        .values()
        .filter(|atom| !statuses.is_blocking(atom.status))
        .filter(|atom| filter.include_abstract || !types.is_abstract(atom.issue_type))
        .filter(|atom| atom.defer_until.is_none_or(|gate| gate <= now))
        .filter(|atom| !resolver.is_blocked(&atom.id))
        .filter(|atom| filter.matches(atom))
        .cloned()
        .collect();

    sort_by_policy(&mut ready, policy, now);
    if let Some(limit) = filter.limit {
        ready.truncate(limit);
    }
    ready
}

/// Sort atoms in place according to the policy.
///
/// Ties always fall through to id order so results are deterministic.
pub fn sort_by_policy(atoms: &mut [Atom], policy: SortPolicy, now: DateTime<Utc>) {
    match policy {
        SortPolicy::Priority => {
            atoms.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.created_at.cmp(&b.created_at))
                    .then(a.id.cmp(&b.id))
            });
        }
        SortPolicy::Oldest => {
            atoms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        }
        SortPolicy::Hybrid => {
            // Priority buckets first. Inside a bucket, atoms fall into
            // 48-hour age classes; an older class outranks a younger one,
            // so any two atoms at least a class width apart order
            // oldest-first, while closer ages are contemporaneous and
            // order by id. Class comparison keeps the ordering total,
            // which raw pairwise age gaps would not.
            atoms.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| age_class(b, now).cmp(&age_class(a, now)))
                    .then(a.id.cmp(&b.id))
            });
        }
    }
}

fn age_class(atom: &Atom, now: DateTime<Utc>) -> i64 {
    let hours = (now - atom.created_at).num_hours();
    (hours / HYBRID_AGE_GAP_HOURS).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IssueType;
    use chrono::Duration;

    struct World {
        atoms: HashMap<AtomId, Atom>,
        bonds: HashMap<BondKey, Bond>,
    }

    impl World {
        fn new() -> Self {
            Self {
                atoms: HashMap::new(),
                bonds: HashMap::new(),
            }
        }

        fn atom(&mut self, id: &str, status: Status) -> AtomId {
            self.atom_full(id, status, IssueType::Task, 2, 0)
        }

        fn atom_full(
            &mut self,
            id: &str,
            status: Status,
            issue_type: IssueType,
            priority: u8,
            age_hours: i64,
        ) -> AtomId {
            let atom_id = AtomId::new(id);
            let created = Utc::now() - Duration::hours(age_hours);
            self.atoms.insert(
                atom_id.clone(),
                Atom {
                    id: atom_id.clone(),
                    title: id.to_string(),
                    description: String::new(),
                    status,
                    issue_type,
                    priority,
                    labels: Default::default(),
                    assignee: None,
                    parent_id: None,
                    defer_until: None,
                    close_reason: None,
                    created_at: created,
                    updated_at: created,
                    metadata: Default::default(),
                },
            );
            atom_id
        }

        fn bond(&mut self, source: &AtomId, target: &AtomId, kind: BondKind) {
            let bond = Bond {
                source_id: source.clone(),
                target_id: target.clone(),
                kind,
                created_at: Utc::now(),
                metadata: Default::default(),
            };
            self.bonds.insert(bond.key(), bond);
        }

        fn close_with(&mut self, id: &AtomId, reason: &str) {
            let atom = self.atoms.get_mut(id).unwrap();
            atom.status = Status::Closed;
            atom.close_reason = Some(reason.to_string());
        }

        fn ready_ids(&self, policy: SortPolicy) -> Vec<String> {
            ready_atoms(
                &self.atoms,
                &self.bonds,
                &StatusRegistry::default(),
                &TypeRegistry::default(),
                &AtomFilter::default(),
                policy,
                Utc::now(),
            )
            .into_iter()
            .map(|a| a.id.as_str().to_string())
            .collect()
        }
    }

    #[test]
    fn satisfied_blocker_does_not_block() {
        // A (open, p1), B (open, p0), C (closed), blocks(C -> B).
        let mut w = World::new();
        w.atom_full("a", Status::Open, IssueType::Task, 1, 0);
        w.atom_full("b", Status::Open, IssueType::Task, 0, 0);
        let c = w.atom("c", Status::Closed);
        let b = AtomId::new("b");
        w.bond(&c, &b, BondKind::Blocks);

        assert_eq!(w.ready_ids(SortPolicy::Priority), vec!["b", "a"]);
    }

    #[test]
    fn open_blocker_blocks() {
        let mut w = World::new();
        let blocker = w.atom("blocker", Status::Open);
        let blocked = w.atom("blocked", Status::Open);
        w.bond(&blocker, &blocked, BondKind::Blocks);

        assert_eq!(w.ready_ids(SortPolicy::Priority), vec!["blocker"]);

        let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
        assert_eq!(
            resolver.unsatisfied_blockers(&blocked),
            vec![(blocker, BondKind::Blocks)]
        );
    }

    #[test]
    fn parent_blocking_is_direct_only() {
        // grandparent (open) -> parent (closed) -> child (open).
        // Only the immediate parent matters, so the child is ready even
        // though the grandparent is still open.
        let mut w = World::new();
        let grandparent = w.atom("grandparent", Status::Open);
        let parent = w.atom("parent", Status::Closed);
        let child = w.atom("child", Status::Open);
        w.bond(&grandparent, &parent, BondKind::ParentChild);
        w.bond(&parent, &child, BondKind::ParentChild);

        let ready = w.ready_ids(SortPolicy::Oldest);
        assert!(ready.contains(&"child".to_string()));
        assert!(ready.contains(&"grandparent".to_string()));
    }

    #[test]
    fn open_parent_blocks_child() {
        let mut w = World::new();
        let parent = w.atom("parent", Status::Open);
        let child = w.atom("child", Status::Open);
        w.bond(&parent, &child, BondKind::ParentChild);

        assert_eq!(w.ready_ids(SortPolicy::Oldest), vec!["parent"]);
    }

    #[test]
    fn waits_for_is_transitive_over_blocking_kinds() {
        // target waits_for root; root blocks leaf. Even with root closed,
        // the open leaf keeps the target blocked.
        let mut w = World::new();
        let root = w.atom("root", Status::Closed);
        let leaf = w.atom("leaf", Status::Open);
        let target = w.atom("target", Status::Open);
        w.bond(&root, &leaf, BondKind::Blocks);
        w.bond(&root, &target, BondKind::WaitsFor);

        let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
        assert!(resolver.is_blocked(&target));

        // Closing the leaf satisfies the whole subtree.
        w.atoms.get_mut(&leaf).unwrap().status = Status::Closed;
        let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
        assert!(!resolver.is_blocked(&target));
    }

    #[test]
    fn conditional_blocks_only_on_failure() {
        let mut w = World::new();
        let source = w.atom("source", Status::Open);
        let target = w.atom("target", Status::Open);
        w.bond(&source, &target, BondKind::ConditionalBlocks);

        // Open source: no block.
        let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
        assert!(!resolver.is_blocked(&target));

        // Clean close: no block.
        w.close_with(&source, "done, shipped");
        let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
        assert!(!resolver.is_blocked(&target));

        // Failure close: blocks.
        w.close_with(&source, "Failed: tests red");
        let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
        assert!(resolver.is_blocked(&target));

        w.close_with(&source, "ERROR in pipeline");
        let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
        assert!(resolver.is_blocked(&target));

        w.close_with(&source, "aborted by operator");
        let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
        assert!(resolver.is_blocked(&target));
    }

    #[rstest::rstest]
    #[case("fail", true)]
    #[case("Failed on CI", true)]
    #[case("  error: timeout", true)]
    #[case("Abort", true)]
    #[case("completed", false)]
    #[case("no failure here", false)]
    fn failure_reason_prefixes(#[case] reason: &str, #[case] is_failure: bool) {
        assert_eq!(is_failure_reason(reason), is_failure);
    }

    #[test]
    fn abstract_types_excluded_unless_requested() {
        let mut w = World::new();
        w.atom_full("epic", Status::Open, IssueType::Epic, 0, 0);
        w.atom("task", Status::Open);

        assert_eq!(w.ready_ids(SortPolicy::Oldest), vec!["task"]);

        let with_abstract = ready_atoms(
            &w.atoms,
            &w.bonds,
            &StatusRegistry::default(),
            &TypeRegistry::default(),
            &AtomFilter {
                include_abstract: true,
                ..Default::default()
            },
            SortPolicy::Priority,
            Utc::now(),
        );
        assert_eq!(with_abstract.len(), 2);
    }

    #[test]
    fn defer_gate_respects_the_supplied_clock() {
        let mut w = World::new();
        let deferred = w.atom("deferred", Status::Open);
        let gate = Utc::now() + Duration::hours(2);
        w.atoms.get_mut(&deferred).unwrap().defer_until = Some(gate);

        assert!(w.ready_ids(SortPolicy::Oldest).is_empty());

        // Same data, a clock past the gate: ready.
        let later = ready_atoms(
            &w.atoms,
            &w.bonds,
            &StatusRegistry::default(),
            &TypeRegistry::default(),
            &AtomFilter::default(),
            SortPolicy::Priority,
            Utc::now() + Duration::hours(3),
        );
        assert_eq!(later.len(), 1);
    }

    #[test]
    fn hybrid_promotes_only_across_the_age_gap() {
        let mut w = World::new();
        // Same priority: "ancient" is 100h older than "recent".
        w.atom_full("recent", Status::Open, IssueType::Task, 1, 1);
        w.atom_full("ancient", Status::Open, IssueType::Task, 1, 101);
        // Lower priority always wins the bucket comparison.
        w.atom_full("urgent", Status::Open, IssueType::Task, 0, 0);

        assert_eq!(
            w.ready_ids(SortPolicy::Hybrid),
            vec!["urgent", "ancient", "recent"]
        );
    }

    #[test]
    fn hybrid_never_jumps_priority_buckets() {
        let mut w = World::new();
        // Very old but low priority; must not outrank the fresh p0.
        w.atom_full("stale", Status::Open, IssueType::Task, 3, 500);
        w.atom_full("fresh", Status::Open, IssueType::Task, 0, 0);

        assert_eq!(w.ready_ids(SortPolicy::Hybrid), vec!["fresh", "stale"]);
    }

    #[test]
    fn blocking_cache_invalidates_on_version_change() {
        let mut w = World::new();
        let blocker = w.atom("blocker", Status::Open);
        let blocked = w.atom("blocked", Status::Open);
        w.bond(&blocker, &blocked, BondKind::Blocks);

        let mut cache = BlockingCache::new();
        {
            let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
            assert!(cache.is_blocked(1, &resolver, &blocked));
            // Cached at version 1.
            assert!(cache.is_blocked(1, &resolver, &blocked));
        }

        w.atoms.get_mut(&blocker).unwrap().status = Status::Closed;
        {
            let resolver = BlockingResolver::new(&w.atoms, &w.bonds);
            // Same version: stale answer by design.
            assert!(cache.is_blocked(1, &resolver, &blocked));
            // New version: recomputed.
            assert!(!cache.is_blocked(2, &resolver, &blocked));
        }
    }

    #[test]
    fn status_registry_extension_reaches_readiness() {
        let mut w = World::new();
        w.atom("parked", Status::Deferred);

        assert!(w.ready_ids(SortPolicy::Priority).is_empty());

        let mut statuses = StatusRegistry::default();
        statuses.set_flags(
            Status::Deferred,
            crate::domain::StatusFlags { is_blocking: false },
        );
        let ready = ready_atoms(
            &w.atoms,
            &w.bonds,
            &statuses,
            &TypeRegistry::default(),
            &AtomFilter::default(),
            SortPolicy::Priority,
            Utc::now(),
        );
        assert_eq!(ready.len(), 1);
    }
}
