//! The conflict-resolution seam of the merge engine.
//!
//! The engine mechanically detects divergence; *policy* for what survives
//! lives behind [`ConflictResolver`]. The default implementation encodes
//! the documented rules (resurrection beats deletion, newest-writer wins
//! on scalars, bond deletions lose to presence); callers with different
//! policies supply their own resolver.

use crate::domain::{AtomId, Bond};

/// Which side of a three-way merge something happened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The local snapshot.
    Local,
    /// The remote snapshot.
    Remote,
}

impl Side {
    /// The opposite side.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Local,
        }
    }
}

/// A resolver's decision for one divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Take the local side's version.
    KeepLocal,
    /// Take the remote side's version.
    KeepRemote,
    /// Apply the engine's default combination rule for this divergence.
    Merge,
    /// Drop the record entirely.
    Delete,
}

/// Policy hooks invoked by the merge engine when snapshots disagree.
///
/// Every method has a default returning [`Verdict::Merge`], i.e. "apply
/// the documented combination rule"; [`DefaultResolver`] is exactly that.
pub trait ConflictResolver: Send + Sync {
    /// An atom was deleted on one side and modified on the other.
    ///
    /// `modified_on` is the side that still has (and changed) the atom.
    /// `Merge` keeps the modified version — resurrection beats deletion.
    fn on_delete_vs_modify(&self, _atom_id: &AtomId, _modified_on: Side) -> Verdict {
        Verdict::Merge
    }

    /// A scalar field diverged on both sides relative to base.
    ///
    /// `Merge` applies the last-writer-wins chain (the side with the newer
    /// `updated_at` supplies the value).
    fn on_scalar_divergence(&self, _atom_id: &AtomId, _field: &str) -> Verdict {
        Verdict::Merge
    }

    /// A bond present in base was removed on one side.
    ///
    /// `Merge` keeps the bond: structural edits must be explicit on both
    /// sides to stick.
    fn on_bond_removal(&self, _bond: &Bond, _removed_on: Side) -> Verdict {
        Verdict::Merge
    }
}

/// The documented default policy: every hook returns [`Verdict::Merge`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultResolver;

impl ConflictResolver for DefaultResolver {}
