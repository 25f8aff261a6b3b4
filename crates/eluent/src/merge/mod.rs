//! Three-way merge of record snapshots.
//!
//! Input is three [`Snapshot`]s — `base` (the common ancestor, possibly
//! empty), `local`, and `remote`. Output is a merged snapshot plus conflict
//! records describing every divergence that needed a policy decision.
//!
//! Per-record-kind policy:
//!
//! - **Atoms** union by id with field-level merge: scalars follow a
//!   last-writer-wins precedence chain, labels merge as a set union with
//!   tombstones, metadata merges recursively with remote-wins scalar
//!   tie-breaks. An atom deleted on one side but modified on the other is
//!   *resurrected* (the modification wins) with a conflict record.
//! - **Bonds** union across local and remote; a bond deleted on only one
//!   side survives unless the resolver says otherwise.
//! - **Comments** union across all three, deduplicated on a content
//!   hash + author + minute-truncated timestamp; comments are never
//!   deleted.
//!
//! The engine never fails on content. Malformed lines were already dropped
//! during snapshot parsing; everything here is total.

pub mod resolver;

pub use resolver::{ConflictResolver, DefaultResolver, Side, Verdict};

use crate::domain::{Atom, AtomId, Bond, Comment};
use crate::store::{BondKey, Snapshot};
use chrono::{DateTime, Timelike, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

/// What kind of divergence a conflict record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Deleted on one side, modified on the other; the modification won.
    DeleteVsModify,
    /// A metadata key diverged on both sides; remote won.
    MetadataDivergence,
    /// A bond present in base was removed on one side only.
    BondRemoval,
}

/// One divergence the engine had to decide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    /// The record involved (atom id, or a bond/comment descriptor).
    pub record: String,
    /// The field or metadata path involved, when field-level.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The divergence class.
    pub kind: ConflictKind,
    /// Human-readable outcome, for audit output.
    pub resolution: String,
}

/// The result of a three-way merge.
#[derive(Debug, Clone, Default)]
pub struct MergeOutcome {
    /// The merged snapshot.
    pub snapshot: Snapshot,
    /// Every divergence that required a policy decision.
    pub conflicts: Vec<Conflict>,
}

/// Merge with the default policy.
#[must_use]
pub fn merge(base: &Snapshot, local: &Snapshot, remote: &Snapshot) -> MergeOutcome {
    merge_with(base, local, remote, &DefaultResolver)
}

/// Merge with a caller-supplied conflict resolver.
#[must_use]
pub fn merge_with(
    base: &Snapshot,
    local: &Snapshot,
    remote: &Snapshot,
    resolver: &dyn ConflictResolver,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    merge_atoms(base, local, remote, resolver, &mut outcome);
    merge_bonds(base, local, remote, resolver, &mut outcome);
    merge_comments(base, local, remote, &mut outcome);
    outcome
}

// ---------------------------------------------------------------------------
// Atoms
// ---------------------------------------------------------------------------

fn merge_atoms(
    base: &Snapshot,
    local: &Snapshot,
    remote: &Snapshot,
    resolver: &dyn ConflictResolver,
    outcome: &mut MergeOutcome,
) {
    let ids: BTreeSet<&AtomId> = base
        .atoms
        .keys()
        .chain(local.atoms.keys())
        .chain(remote.atoms.keys())
        .collect();

    for id in ids {
        let b = base.atoms.get(id);
        let l = local.atoms.get(id);
        let r = remote.atoms.get(id);

        let merged = match (b, l, r) {
            (_, None, None) => None, // deleted on both sides, or never existed
            (None, Some(l), None) => Some(l.clone()),
            (None, None, Some(r)) => Some(r.clone()),
            (_, Some(l), Some(r)) if l == r => Some(l.clone()),
            (b, Some(l), Some(r)) => Some(merge_fields(b, l, r, resolver, outcome)),
            (Some(b), Some(l), None) => resolve_delete(id, b, l, Side::Local, resolver, outcome),
            (Some(b), None, Some(r)) => resolve_delete(id, b, r, Side::Remote, resolver, outcome),
        };

        if let Some(atom) = merged {
            outcome.snapshot.atoms.insert(id.clone(), atom);
        }
    }
}

/// One side deleted the atom; `survivor` is the other side's copy.
fn resolve_delete(
    id: &AtomId,
    base: &Atom,
    survivor: &Atom,
    survivor_side: Side,
    resolver: &dyn ConflictResolver,
    outcome: &mut MergeOutcome,
) -> Option<Atom> {
    if survivor == base {
        // Untouched on the surviving side: the deletion stands.
        return None;
    }

    let verdict = resolver.on_delete_vs_modify(id, survivor_side);
    let kept = match (verdict, survivor_side) {
        (Verdict::Delete, _) => None,
        (Verdict::KeepLocal, Side::Remote) | (Verdict::KeepRemote, Side::Local) => None,
        _ => Some(survivor.clone()),
    };

    outcome.conflicts.push(Conflict {
        record: id.to_string(),
        field: None,
        kind: ConflictKind::DeleteVsModify,
        resolution: if kept.is_some() {
            format!("kept the modified {survivor_side:?} copy over the deletion")
        } else {
            "deletion upheld by resolver".to_string()
        },
    });
    kept
}

fn merge_fields(
    base: Option<&Atom>,
    local: &Atom,
    remote: &Atom,
    resolver: &dyn ConflictResolver,
    outcome: &mut MergeOutcome,
) -> Atom {
    // The side with the newer updated_at supplies diverged scalars; exact
    // ties go to remote, mirroring the metadata tie-break.
    let newer = if local.updated_at > remote.updated_at {
        Side::Local
    } else {
        Side::Remote
    };

    let scalar = |field: &str, differs_l: bool, differs_r: bool| -> Side {
        match (differs_l, differs_r) {
            (true, false) => Side::Local,
            (false, true) => Side::Remote,
            _ => match resolver.on_scalar_divergence(&local.id, field) {
                Verdict::KeepLocal => Side::Local,
                Verdict::KeepRemote => Side::Remote,
                _ => newer,
            },
        }
    };

    macro_rules! lww {
        ($field:ident, $name:literal) => {{
            if local.$field == remote.$field {
                local.$field.clone()
            } else {
                let base_value = base.map(|b| &b.$field);
                let side = scalar(
                    $name,
                    base_value != Some(&local.$field),
                    base_value != Some(&remote.$field),
                );
                match side {
                    Side::Local => local.$field.clone(),
                    Side::Remote => remote.$field.clone(),
                }
            }
        }};
    }

    macro_rules! lww_opt {
        ($field:ident, $name:literal) => {{
            match (&local.$field, &remote.$field) {
                // Only one side carries a value: take it.
                (Some(_), None) => local.$field.clone(),
                (None, Some(_)) => remote.$field.clone(),
                (None, None) => None,
                (Some(_), Some(_)) => lww!($field, $name),
            }
        }};
    }

    let labels = merge_labels(base, local, remote);
    let metadata = merge_metadata_maps(
        base.map(|b| &b.metadata),
        &local.metadata,
        &remote.metadata,
        &local.id,
        String::new(),
        outcome,
    );

    Atom {
        id: local.id.clone(),
        title: lww!(title, "title"),
        description: lww!(description, "description"),
        status: lww!(status, "status"),
        issue_type: lww!(issue_type, "issue_type"),
        priority: lww!(priority, "priority"),
        labels,
        assignee: lww_opt!(assignee, "assignee"),
        parent_id: lww_opt!(parent_id, "parent_id"),
        defer_until: lww_opt!(defer_until, "defer_until"),
        close_reason: lww_opt!(close_reason, "close_reason"),
        created_at: local.created_at,
        updated_at: local.updated_at.max(remote.updated_at),
        metadata,
    }
}

fn merge_labels(base: Option<&Atom>, local: &Atom, remote: &Atom) -> BTreeSet<String> {
    let empty = BTreeSet::new();
    let base_labels = base.map_or(&empty, |b| &b.labels);

    let local_added: BTreeSet<_> = local.labels.difference(base_labels).cloned().collect();
    let remote_added: BTreeSet<_> = remote.labels.difference(base_labels).cloned().collect();
    let local_removed: BTreeSet<_> = base_labels.difference(&local.labels).cloned().collect();
    let remote_removed: BTreeSet<_> = base_labels.difference(&remote.labels).cloned().collect();

    base_labels
        .iter()
        .chain(&local_added)
        .chain(&remote_added)
        .filter(|label| !local_removed.contains(*label) && !remote_removed.contains(*label))
        .cloned()
        .collect()
}

type JsonMap = serde_json::Map<String, serde_json::Value>;

fn merge_metadata_maps(
    base: Option<&JsonMap>,
    local: &JsonMap,
    remote: &JsonMap,
    atom_id: &AtomId,
    path: String,
    outcome: &mut MergeOutcome,
) -> JsonMap {
    let keys: BTreeSet<&String> = local.keys().chain(remote.keys()).collect();
    let mut merged = JsonMap::new();

    for key in keys {
        let child_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{path}.{key}")
        };
        let b = base.and_then(|m| m.get(key));
        let l = local.get(key);
        let r = remote.get(key);

        let value = match (l, r) {
            (Some(lv), Some(rv)) if lv == rv => Some(lv.clone()),
            (Some(serde_json::Value::Object(lm)), Some(serde_json::Value::Object(rm))) => {
                let base_child = match b {
                    Some(serde_json::Value::Object(bm)) => Some(bm),
                    _ => None,
                };
                Some(serde_json::Value::Object(merge_metadata_maps(
                    base_child, lm, rm, atom_id, child_path, outcome,
                )))
            }
            (Some(lv), Some(rv)) => {
                // Scalar divergence. A side that still matches base simply
                // lost to the other's edit; a genuine two-sided edit
                // resolves remote-wins with an audit record.
                if b == Some(lv) {
                    Some(rv.clone())
                } else if b == Some(rv) {
                    Some(lv.clone())
                } else {
                    outcome.conflicts.push(Conflict {
                        record: atom_id.to_string(),
                        field: Some(format!("metadata.{child_path}")),
                        kind: ConflictKind::MetadataDivergence,
                        resolution: "both sides edited; remote value kept".to_string(),
                    });
                    Some(rv.clone())
                }
            }
            (Some(lv), None) => {
                // Absent remotely: deleted there, or added locally.
                match b {
                    Some(bv) if bv == lv => None, // unchanged locally, deletion stands
                    _ => Some(lv.clone()),        // local edit or addition survives
                }
            }
            (None, Some(rv)) => match b {
                Some(bv) if bv == rv => None,
                _ => Some(rv.clone()),
            },
            (None, None) => None,
        };

        if let Some(value) = value {
            merged.insert(key.clone(), value);
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// Bonds
// ---------------------------------------------------------------------------

fn merge_bonds(
    base: &Snapshot,
    local: &Snapshot,
    remote: &Snapshot,
    resolver: &dyn ConflictResolver,
    outcome: &mut MergeOutcome,
) {
    let keys: BTreeSet<&BondKey> = local.bonds.keys().chain(remote.bonds.keys()).collect();

    for key in keys {
        let l = local.bonds.get(key);
        let r = remote.bonds.get(key);
        let in_base = base.bonds.contains_key(key);

        let kept = match (l, r) {
            (Some(bond), Some(_)) => Some(bond.clone()),
            (Some(bond), None) | (None, Some(bond)) => {
                if in_base {
                    // Present in base, deleted on exactly one side.
                    let removed_on = if l.is_none() { Side::Local } else { Side::Remote };
                    let verdict = resolver.on_bond_removal(bond, removed_on);
                    let keep = !matches!(verdict, Verdict::Delete)
                        && !(matches!(verdict, Verdict::KeepLocal) && removed_on == Side::Local)
                        && !(matches!(verdict, Verdict::KeepRemote) && removed_on == Side::Remote);
                    outcome.conflicts.push(Conflict {
                        record: format!(
                            "{} -> {} ({})",
                            bond.source_id, bond.target_id, bond.kind
                        ),
                        field: None,
                        kind: ConflictKind::BondRemoval,
                        resolution: if keep {
                            format!("removed on {removed_on:?} only; bond kept")
                        } else {
                            "removal upheld by resolver".to_string()
                        },
                    });
                    keep.then(|| bond.clone())
                } else {
                    // New on one side: plain union.
                    Some(bond.clone())
                }
            }
            (None, None) => None,
        };

        if let Some(bond) = kept {
            outcome.snapshot.bonds.insert(key.clone(), bond);
        }
    }
}

// ---------------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------------

/// Dedup key for comments: content hash + author + minute-truncated
/// timestamp. Two agents importing the same comment through different
/// paths collapse to one; distinct comments with identical text written
/// minutes apart do not.
fn comment_key(comment: &Comment) -> (String, String, DateTime<Utc>) {
    let mut hasher = Sha256::new();
    hasher.update(comment.content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    let truncated = comment
        .created_at
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(comment.created_at);
    (digest, comment.author.clone(), truncated)
}

fn merge_comments(
    base: &Snapshot,
    local: &Snapshot,
    remote: &Snapshot,
    outcome: &mut MergeOutcome,
) {
    let mut seen: BTreeMap<(String, String, DateTime<Utc>), Comment> = BTreeMap::new();
    for comment in base
        .comments
        .iter()
        .chain(&local.comments)
        .chain(&remote.comments)
    {
        seen.entry(comment_key(comment))
            .or_insert_with(|| comment.clone());
    }

    let mut comments: Vec<Comment> = seen.into_values().collect();
    comments.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    outcome.snapshot.comments = comments;
}
