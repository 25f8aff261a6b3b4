//! Immutable snapshots of a record set.
//!
//! A [`Snapshot`] is what the dependency graph, readiness calculator, and
//! merge engine consume: a self-contained `{atoms, bonds, comments}` view
//! with no ties back to the live store. Snapshots are also how the sync
//! layer sees historical states — a blob of JSONL read out of a git commit
//! parses into a snapshot the same way the working file does.

use crate::domain::{Atom, AtomId, Bond, BondKind, Comment, Header, Record};
use std::collections::BTreeMap;

/// Key identifying a bond: the `(source, target, kind)` triple.
pub type BondKey = (AtomId, AtomId, BondKind);

/// A problem found while assembling a snapshot from records.
///
/// These are reported, never fatal; the offending record is kept or
/// dropped as documented per variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotWarning {
    /// Two atom records share an id; the later one won.
    DuplicateAtom {
        /// The contested id.
        id: AtomId,
    },
    /// Two bond records share the identity triple; the first one won.
    DuplicateBond {
        /// Source of the contested bond.
        source_id: AtomId,
        /// Target of the contested bond.
        target_id: AtomId,
        /// Kind of the contested bond.
        kind: BondKind,
    },
    /// A bond references an atom the snapshot does not contain. The bond
    /// is kept; readiness simply never sees the missing endpoint.
    DanglingBond {
        /// Source of the dangling bond.
        source_id: AtomId,
        /// Target of the dangling bond.
        target_id: AtomId,
        /// Kind of the dangling bond.
        kind: BondKind,
    },
    /// A comment references an atom the snapshot does not contain.
    OrphanComment {
        /// Id of the orphaned comment.
        id: String,
    },
}

/// An immutable `{atoms, bonds, comments}` view.
///
/// `BTreeMap`s keep iteration deterministic, which keeps serialized output
/// and merge results deterministic in turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Atoms by id.
    pub atoms: BTreeMap<AtomId, Atom>,
    /// Bonds by identity triple.
    pub bonds: BTreeMap<BondKey, Bond>,
    /// Comments in file order.
    pub comments: Vec<Comment>,
}

impl Snapshot {
    /// An empty snapshot (the shape of "no file at that commit").
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Assemble a snapshot from parsed records.
    ///
    /// Returns the header if one was present, plus warnings for duplicate
    /// and dangling records. Input order matters only for duplicate-atom
    /// resolution (later wins, matching append semantics) and comment
    /// ordering.
    #[must_use]
    pub fn from_records(records: Vec<Record>) -> (Self, Option<Header>, Vec<SnapshotWarning>) {
        let mut snapshot = Self::default();
        let mut header = None;
        let mut warnings = Vec::new();

        for record in records {
            match record {
                Record::Header(h) => {
                    if header.is_none() {
                        header = Some(h);
                    }
                }
                Record::Atom(atom) => {
                    if snapshot.atoms.insert(atom.id.clone(), atom.clone()).is_some() {
                        warnings.push(SnapshotWarning::DuplicateAtom { id: atom.id });
                    }
                }
                Record::Bond(bond) => {
                    let key = bond.key();
                    if snapshot.bonds.contains_key(&key) {
                        warnings.push(SnapshotWarning::DuplicateBond {
                            source_id: bond.source_id,
                            target_id: bond.target_id,
                            kind: bond.kind,
                        });
                    } else {
                        snapshot.bonds.insert(key, bond);
                    }
                }
                Record::Comment(comment) => snapshot.comments.push(comment),
            }
        }

        for bond in snapshot.bonds.values() {
            if !snapshot.atoms.contains_key(&bond.source_id)
                || !snapshot.atoms.contains_key(&bond.target_id)
            {
                warnings.push(SnapshotWarning::DanglingBond {
                    source_id: bond.source_id.clone(),
                    target_id: bond.target_id.clone(),
                    kind: bond.kind,
                });
            }
        }
        for comment in &snapshot.comments {
            if !snapshot.atoms.contains_key(&comment.parent_id) {
                warnings.push(SnapshotWarning::OrphanComment {
                    id: comment.id.clone(),
                });
            }
        }

        (snapshot, header, warnings)
    }

    /// Parse a snapshot from raw JSONL text (e.g. a blob from `git show`).
    ///
    /// Malformed lines are skipped and counted; this never fails on
    /// content, matching the merge engine's propagation policy.
    #[must_use]
    pub fn parse_jsonl(text: &str) -> (Self, Option<Header>, usize) {
        let mut records = Vec::new();
        let mut skipped = 0usize;

        for (idx, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<Record>(trimmed) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(line = idx + 1, error = %e, "skipping malformed snapshot line");
                    skipped += 1;
                }
            }
        }

        let (snapshot, header, _) = Self::from_records(records);
        (snapshot, header, skipped)
    }

    /// Serialize to records in the canonical file order: atoms by
    /// `(created_at, id)`, then bonds by `(created_at, key)`, then comments
    /// by `(created_at, id)`. The header is the caller's to prepend.
    #[must_use]
    pub fn to_records(&self) -> Vec<Record> {
        let mut atoms: Vec<&Atom> = self.atoms.values().collect();
        atoms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut bonds: Vec<&Bond> = self.bonds.values().collect();
        bonds.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key().cmp(&b.key()))
        });

        let mut comments: Vec<&Comment> = self.comments.iter().collect();
        comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        atoms
            .into_iter()
            .map(|a| Record::Atom(a.clone()))
            .chain(bonds.into_iter().map(|b| Record::Bond(b.clone())))
            .chain(comments.into_iter().map(|c| Record::Comment(c.clone())))
            .collect()
    }

    /// Whether the snapshot holds no records at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty() && self.bonds.is_empty() && self.comments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IssueType, Status};
    use chrono::Utc;

    fn atom(id: &str) -> Atom {
        let now = Utc::now();
        Atom {
            id: AtomId::new(id),
            title: format!("atom {id}"),
            description: String::new(),
            status: Status::Open,
            issue_type: IssueType::Task,
            priority: 2,
            labels: Default::default(),
            assignee: None,
            parent_id: None,
            defer_until: None,
            close_reason: None,
            created_at: now,
            updated_at: now,
            metadata: Default::default(),
        }
    }

    fn bond(source: &str, target: &str, kind: BondKind) -> Bond {
        Bond {
            source_id: AtomId::new(source),
            target_id: AtomId::new(target),
            kind,
            created_at: Utc::now(),
            metadata: Default::default(),
        }
    }

    #[test]
    fn later_duplicate_atom_wins() {
        let mut first = atom("r-1");
        first.title = "first".to_string();
        let mut second = atom("r-1");
        second.title = "second".to_string();

        let (snapshot, _, warnings) =
            Snapshot::from_records(vec![Record::Atom(first), Record::Atom(second)]);

        assert_eq!(snapshot.atoms[&AtomId::new("r-1")].title, "second");
        assert_eq!(
            warnings,
            vec![SnapshotWarning::DuplicateAtom {
                id: AtomId::new("r-1")
            }]
        );
    }

    #[test]
    fn dangling_bond_is_kept_but_reported() {
        let (snapshot, _, warnings) = Snapshot::from_records(vec![
            Record::Atom(atom("r-1")),
            Record::Bond(bond("r-1", "r-ghost", BondKind::Blocks)),
        ]);

        assert_eq!(snapshot.bonds.len(), 1);
        assert!(warnings
            .iter()
            .any(|w| matches!(w, SnapshotWarning::DanglingBond { .. })));
    }

    #[test]
    fn parse_jsonl_counts_malformed_lines() {
        let a = atom("r-1");
        let good = serde_json::to_string(&Record::Atom(a)).unwrap();
        let text = format!("{good}\ngarbage line\n{{\"_type\":\"mystery\"}}\n");

        let (snapshot, _, skipped) = Snapshot::parse_jsonl(&text);
        assert_eq!(snapshot.atoms.len(), 1);
        assert_eq!(skipped, 2);
    }

    #[test]
    fn to_records_orders_by_creation() {
        let mut older = atom("r-b");
        older.created_at = Utc::now() - chrono::Duration::hours(1);
        older.updated_at = older.created_at;
        let newer = atom("r-a");

        let (snapshot, _, _) =
            Snapshot::from_records(vec![Record::Atom(newer), Record::Atom(older)]);
        let records = snapshot.to_records();

        match (&records[0], &records[1]) {
            (Record::Atom(first), Record::Atom(second)) => {
                assert_eq!(first.id.as_str(), "r-b");
                assert_eq!(second.id.as_str(), "r-a");
            }
            other => panic!("unexpected record order: {other:?}"),
        }
    }

    #[test]
    fn empty_text_parses_to_empty_snapshot() {
        let (snapshot, header, skipped) = Snapshot::parse_jsonl("");
        assert!(snapshot.is_empty());
        assert!(header.is_none());
        assert_eq!(skipped, 0);
    }
}
