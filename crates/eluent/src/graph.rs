//! In-memory typed dependency graph.
//!
//! Built from the bond set on demand; the store's version counter tells
//! consumers when a rebuilt graph is needed. Edges run from bond source to
//! bond target (the blocker points at the blocked). All traversals are
//! iterative with explicit work lists, so pathological depths cannot
//! overflow the stack.

use crate::domain::{Atom, AtomId, Bond, BondKind};
use crate::error::{Error, Result};
use crate::store::BondKey;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use std::collections::{HashMap, HashSet, VecDeque};

/// A typed DAG view over a set of atoms and bonds.
///
/// Bonds whose endpoints are not in the atom set (dangling bonds from a
/// partially-corrupt file) are skipped; they were already reported at load.
pub struct DepGraph {
    graph: DiGraph<AtomId, BondKind>,
    node_map: HashMap<AtomId, NodeIndex>,
}

impl DepGraph {
    /// Build from the store's maps.
    #[must_use]
    pub fn build(atoms: &HashMap<AtomId, Atom>, bonds: &HashMap<BondKey, Bond>) -> Self {
        let mut graph = DiGraph::new();
        let mut node_map = HashMap::with_capacity(atoms.len());

        for atom_id in atoms.keys() {
            let node = graph.add_node(atom_id.clone());
            node_map.insert(atom_id.clone(), node);
        }
        for bond in bonds.values() {
            let (Some(&source), Some(&target)) =
                (node_map.get(&bond.source_id), node_map.get(&bond.target_id))
            else {
                continue;
            };
            graph.add_edge(source, target, bond.kind);
        }

        Self { graph, node_map }
    }

    /// Whether a path from `a` to `b` exists along the given kinds.
    #[must_use]
    pub fn path_exists(&self, a: &AtomId, b: &AtomId, kinds: &[BondKind]) -> bool {
        self.find_path(a, b, kinds).is_some()
    }

    /// A path from `a` to `b` along the given kinds, if one exists.
    ///
    /// BFS, so the returned path is shortest by hop count and visits each
    /// node at most once.
    #[must_use]
    pub fn find_path(&self, a: &AtomId, b: &AtomId, kinds: &[BondKind]) -> Option<Vec<AtomId>> {
        let start = *self.node_map.get(a)?;
        let goal = *self.node_map.get(b)?;

        let mut predecessors: HashMap<NodeIndex, NodeIndex> = HashMap::new();
        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);

        while let Some(node) = queue.pop_front() {
            if node == goal {
                let mut path = vec![self.graph[goal].clone()];
                let mut cursor = goal;
                while let Some(&prev) = predecessors.get(&cursor) {
                    path.push(self.graph[prev].clone());
                    cursor = prev;
                }
                path.reverse();
                return Some(path);
            }
            for edge in self.graph.edges(node) {
                if !kinds.contains(edge.weight()) {
                    continue;
                }
                let next = edge.target();
                if visited.insert(next) {
                    predecessors.insert(next, node);
                    queue.push_back(next);
                }
            }
        }
        None
    }

    /// Every atom reachable from `a` along the given kinds, excluding `a`.
    #[must_use]
    pub fn descendants(&self, a: &AtomId, kinds: &[BondKind]) -> Vec<AtomId> {
        self.walk(a, kinds, Direction::Outgoing)
    }

    /// Every atom that can reach `a` along the given kinds, excluding `a`.
    #[must_use]
    pub fn ancestors(&self, a: &AtomId, kinds: &[BondKind]) -> Vec<AtomId> {
        self.walk(a, kinds, Direction::Incoming)
    }

    /// Sources of blocking bonds pointing at `a`, with the bond kind.
    #[must_use]
    pub fn direct_blockers(&self, a: &AtomId) -> Vec<(AtomId, BondKind)> {
        self.direct(a, Direction::Incoming)
    }

    /// Targets of blocking bonds leaving `a`, with the bond kind.
    #[must_use]
    pub fn direct_dependents(&self, a: &AtomId) -> Vec<(AtomId, BondKind)> {
        self.direct(a, Direction::Outgoing)
    }

    fn direct(&self, a: &AtomId, direction: Direction) -> Vec<(AtomId, BondKind)> {
        let Some(&node) = self.node_map.get(a) else {
            return Vec::new();
        };
        let mut out: Vec<(AtomId, BondKind)> = self
            .graph
            .edges_directed(node, direction)
            .filter(|edge| edge.weight().is_blocking())
            .map(|edge| {
                let other = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                (self.graph[other].clone(), *edge.weight())
            })
            .collect();
        out.sort();
        out
    }

    fn walk(&self, a: &AtomId, kinds: &[BondKind], direction: Direction) -> Vec<AtomId> {
        let Some(&start) = self.node_map.get(a) else {
            return Vec::new();
        };

        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut queue = VecDeque::from([start]);
        let mut out = Vec::new();

        while let Some(node) = queue.pop_front() {
            for edge in self.graph.edges_directed(node, direction) {
                if !kinds.contains(edge.weight()) {
                    continue;
                }
                let next = match direction {
                    Direction::Incoming => edge.source(),
                    Direction::Outgoing => edge.target(),
                };
                if visited.insert(next) {
                    out.push(self.graph[next].clone());
                    queue.push_back(next);
                }
            }
        }
        out.sort();
        out
    }
}

/// All blocking kinds, for traversal restriction.
#[must_use]
pub fn blocking_kinds() -> Vec<BondKind> {
    BondKind::all()
        .into_iter()
        .filter(|k| k.is_blocking())
        .collect()
}

/// Validate that inserting `(source, target, kind)` keeps the blocking
/// subgraph acyclic.
///
/// Self-bonds are rejected outright. For blocking kinds, a blocking path
/// from `target` back to `source` means the new edge would close a cycle;
/// the error carries the full cycle path, starting and ending at `source`.
/// Informational kinds are never checked — they are allowed to form loops.
///
/// # Errors
///
/// [`Error::CycleDetected`] with the offending path.
pub fn check_insert(
    bonds: &HashMap<BondKey, Bond>,
    source: &AtomId,
    target: &AtomId,
    kind: BondKind,
) -> Result<()> {
    if source == target {
        return Err(Error::CycleDetected {
            path: vec![source.clone(), source.clone()],
        });
    }
    if !kind.is_blocking() {
        return Ok(());
    }

    // Build a graph over just the bond endpoints; the atoms map is not
    // needed for cycle checking.
    let mut endpoint_atoms: HashMap<AtomId, Atom> = HashMap::new();
    for (s, t, _) in bonds.keys() {
        endpoint_atoms
            .entry(s.clone())
            .or_insert_with(|| placeholder_atom(s));
        endpoint_atoms
            .entry(t.clone())
            .or_insert_with(|| placeholder_atom(t));
    }
    endpoint_atoms
        .entry(source.clone())
        .or_insert_with(|| placeholder_atom(source));
    endpoint_atoms
        .entry(target.clone())
        .or_insert_with(|| placeholder_atom(target));

    let graph = DepGraph::build(&endpoint_atoms, bonds);
    if let Some(back_path) = graph.find_path(target, source, &blocking_kinds()) {
        let mut cycle = Vec::with_capacity(back_path.len() + 1);
        cycle.push(source.clone());
        cycle.extend(back_path);
        return Err(Error::CycleDetected { path: cycle });
    }
    Ok(())
}

fn placeholder_atom(id: &AtomId) -> Atom {
    use crate::domain::{IssueType, Status};
    let epoch = chrono::DateTime::<chrono::Utc>::UNIX_EPOCH;
    Atom {
        id: id.clone(),
        title: String::new(),
        description: String::new(),
        status: Status::Open,
        issue_type: IssueType::Task,
        priority: 0,
        labels: Default::default(),
        assignee: None,
        parent_id: None,
        defer_until: None,
        close_reason: None,
        created_at: epoch,
        updated_at: epoch,
        metadata: Default::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn atoms(ids: &[&str]) -> HashMap<AtomId, Atom> {
        ids.iter()
            .map(|id| (AtomId::new(*id), placeholder_atom(&AtomId::new(*id))))
            .collect()
    }

    fn bond_map(edges: &[(&str, &str, BondKind)]) -> HashMap<BondKey, Bond> {
        edges
            .iter()
            .map(|(s, t, k)| {
                let bond = Bond {
                    source_id: AtomId::new(*s),
                    target_id: AtomId::new(*t),
                    kind: *k,
                    created_at: Utc::now(),
                    metadata: Default::default(),
                };
                (bond.key(), bond)
            })
            .collect()
    }

    #[test]
    fn path_exists_respects_kind_restriction() {
        let atoms = atoms(&["a", "b", "c"]);
        let bonds = bond_map(&[
            ("a", "b", BondKind::Blocks),
            ("b", "c", BondKind::Related),
        ]);
        let graph = DepGraph::build(&atoms, &bonds);

        let a = AtomId::new("a");
        let c = AtomId::new("c");
        assert!(graph.path_exists(&a, &c, &BondKind::all()));
        assert!(!graph.path_exists(&a, &c, &blocking_kinds()));
    }

    #[test]
    fn descendants_and_ancestors() {
        let atoms = atoms(&["a", "b", "c", "d"]);
        let bonds = bond_map(&[
            ("a", "b", BondKind::Blocks),
            ("b", "c", BondKind::WaitsFor),
            ("a", "d", BondKind::Related),
        ]);
        let graph = DepGraph::build(&atoms, &bonds);

        let a = AtomId::new("a");
        assert_eq!(
            graph.descendants(&a, &blocking_kinds()),
            vec![AtomId::new("b"), AtomId::new("c")]
        );
        assert_eq!(
            graph.ancestors(&AtomId::new("c"), &blocking_kinds()),
            vec![AtomId::new("a"), AtomId::new("b")]
        );
    }

    #[test]
    fn direct_blockers_excludes_informational() {
        let atoms = atoms(&["a", "b", "c"]);
        let bonds = bond_map(&[
            ("b", "a", BondKind::Blocks),
            ("c", "a", BondKind::Related),
        ]);
        let graph = DepGraph::build(&atoms, &bonds);

        assert_eq!(
            graph.direct_blockers(&AtomId::new("a")),
            vec![(AtomId::new("b"), BondKind::Blocks)]
        );
        assert_eq!(
            graph.direct_dependents(&AtomId::new("b")),
            vec![(AtomId::new("a"), BondKind::Blocks)]
        );
    }

    #[test]
    fn self_bond_is_rejected() {
        let bonds = bond_map(&[]);
        let a = AtomId::new("a");
        let err = check_insert(&bonds, &a, &a, BondKind::Blocks).unwrap_err();
        match err {
            Error::CycleDetected { path } => assert_eq!(path, vec![a.clone(), a]),
            other => panic!("expected CycleDetected, got {other}"),
        }
    }

    #[test]
    fn cycle_path_names_every_hop() {
        // a blocks b, b blocks c; adding c -> a closes the loop.
        let bonds = bond_map(&[
            ("a", "b", BondKind::Blocks),
            ("b", "c", BondKind::Blocks),
        ]);
        let err = check_insert(
            &bonds,
            &AtomId::new("c"),
            &AtomId::new("a"),
            BondKind::Blocks,
        )
        .unwrap_err();

        match err {
            Error::CycleDetected { path } => {
                let names: Vec<&str> = path.iter().map(AtomId::as_str).collect();
                assert_eq!(names, vec!["c", "a", "b", "c"]);
            }
            other => panic!("expected CycleDetected, got {other}"),
        }
    }

    #[test]
    fn informational_kinds_may_loop() {
        let bonds = bond_map(&[("a", "b", BondKind::Related)]);
        check_insert(
            &bonds,
            &AtomId::new("b"),
            &AtomId::new("a"),
            BondKind::Related,
        )
        .unwrap();
    }

    #[test]
    fn mixed_kind_cycle_still_detected() {
        // waits_for and parent_child are both blocking; a loop through
        // them is as illegal as one through plain blocks.
        let bonds = bond_map(&[
            ("a", "b", BondKind::WaitsFor),
            ("b", "c", BondKind::ParentChild),
        ]);
        assert!(check_insert(
            &bonds,
            &AtomId::new("c"),
            &AtomId::new("a"),
            BondKind::ConditionalBlocks,
        )
        .is_err());
    }

    #[test]
    fn deep_chain_does_not_overflow() {
        // 10k-node chain; recursion would blow the stack here.
        let ids: Vec<String> = (0..10_000).map(|i| format!("n{i}")).collect();
        let mut edges = Vec::new();
        for pair in ids.windows(2) {
            edges.push((pair[0].as_str(), pair[1].as_str(), BondKind::Blocks));
        }
        let bonds = bond_map(&edges);

        let err = check_insert(
            &bonds,
            &AtomId::new(ids.last().unwrap().as_str()),
            &AtomId::new(ids[0].as_str()),
            BondKind::Blocks,
        )
        .unwrap_err();
        match err {
            Error::CycleDetected { path } => assert_eq!(path.len(), ids.len() + 1),
            other => panic!("expected CycleDetected, got {other}"),
        }
    }
}
