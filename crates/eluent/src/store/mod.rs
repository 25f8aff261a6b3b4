//! Durable record store over `.eluent/data.jsonl` and
//! `.eluent/ephemeral.jsonl`.
//!
//! The store owns the authoritative in-memory entities (atoms, bonds,
//! comments), a dual index (exact id map plus randomness-prefix trie), and
//! the two write disciplines: *append* for new records, *atomic rewrite*
//! for every modification. Consumers that derive state from the store (the
//! dependency graph, the readiness calculator) key their caches on
//! [`RecordStore::version`], which bumps on every mutation.
//!
//! Ephemeral atoms live in `ephemeral.jsonl`, never in the synced data
//! file. A bond or comment touching an ephemeral atom is itself ephemeral;
//! otherwise the synced file would reference records other clones cannot
//! see.

pub mod snapshot;

pub use snapshot::{BondKey, Snapshot, SnapshotWarning};

use crate::domain::{
    Atom, AtomFilter, AtomId, AtomUpdate, Bond, BondKind, Comment, Header, NewAtom, OfflineClaim,
    Record, SortPolicy, Status, StatusRegistry, TypeRegistry,
};
use crate::error::{Error, Result};
use crate::id::{self, IdIndex};
use crate::ready::{BlockingCache, BlockingResolver};
use crate::{graph, ready};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Directory that holds all eluent state inside a repository.
pub const ELUENT_DIR: &str = ".eluent";

/// Synced data file name.
pub const DATA_FILE: &str = "data.jsonl";

/// Local-only data file name.
pub const EPHEMERAL_FILE: &str = "ephemeral.jsonl";

/// How long file-lock acquisition waits before reporting contention.
const LOCK_WAIT: Duration = Duration::from_secs(2);

/// A non-fatal problem encountered while loading a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWarning {
    /// A line failed to parse and was skipped.
    Malformed {
        /// Which file (`data.jsonl` or `ephemeral.jsonl`).
        file: String,
        /// 1-based line number.
        line_number: usize,
        /// Parser description.
        error: String,
    },
    /// A structural problem in the assembled record set.
    Snapshot(SnapshotWarning),
    /// `data.jsonl` did not start with a header; one was synthesized from
    /// the directory name.
    MissingHeader,
}

/// The durable record store for one repository.
///
/// Cheap to clone; clones share the same underlying state. All mutating
/// operations serialize on an internal async mutex, per the one-writer
/// model: cross-process safety comes from the file locks underneath, not
/// from this mutex.
#[derive(Clone)]
pub struct RecordStore {
    inner: Arc<Mutex<StoreInner>>,
}

struct StoreInner {
    repo_root: PathBuf,
    header: Header,
    atoms: HashMap<AtomId, Atom>,
    ephemeral_ids: HashSet<AtomId>,
    bonds: HashMap<BondKey, Bond>,
    comments: HashMap<AtomId, Vec<Comment>>,
    id_index: IdIndex,
    statuses: StatusRegistry,
    types: TypeRegistry,
    version: u64,
    blocking_cache: BlockingCache,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Initialize a new `.eluent` directory with a header-only data file.
    ///
    /// # Errors
    ///
    /// [`Error::AlreadyInitialized`] if the directory exists; IO errors
    /// otherwise.
    pub async fn init(repo_root: &Path, repo_name: &str) -> Result<Self> {
        let dir = repo_root.join(ELUENT_DIR);
        if dir.exists() {
            return Err(Error::AlreadyInitialized(dir));
        }
        tokio::fs::create_dir_all(&dir).await?;

        let header = Header {
            repo_name: repo_name.to_string(),
            generator: generator_string(),
            created_at: Utc::now(),
        };
        eluent_jsonl::append_locked(
            dir.join(DATA_FILE),
            &[Record::Header(header.clone())],
            LOCK_WAIT,
        )?;

        let inner = StoreInner {
            repo_root: repo_root.to_path_buf(),
            header,
            atoms: HashMap::new(),
            ephemeral_ids: HashSet::new(),
            bonds: HashMap::new(),
            comments: HashMap::new(),
            id_index: IdIndex::new(),
            statuses: StatusRegistry::default(),
            types: TypeRegistry::default(),
            version: 0,
            blocking_cache: BlockingCache::new(),
        };
        Ok(Self {
            inner: Arc::new(Mutex::new(inner)),
        })
    }

    /// Open an existing store, loading both data files resiliently.
    ///
    /// # Errors
    ///
    /// [`Error::NotInitialized`] when the `.eluent` directory is absent;
    /// IO errors otherwise. Malformed content is returned as warnings,
    /// never an error.
    pub async fn open(repo_root: &Path) -> Result<(Self, Vec<StoreWarning>)> {
        let dir = repo_root.join(ELUENT_DIR);
        if !dir.is_dir() {
            return Err(Error::NotInitialized(dir));
        }

        let mut warnings = Vec::new();
        let records = load_records(&dir.join(DATA_FILE), DATA_FILE, &mut warnings).await?;
        let ephemeral =
            load_records(&dir.join(EPHEMERAL_FILE), EPHEMERAL_FILE, &mut warnings).await?;

        let ephemeral_ids: HashSet<AtomId> = ephemeral
            .iter()
            .filter_map(|r| match r {
                Record::Atom(a) => Some(a.id.clone()),
                _ => None,
            })
            .collect();

        let mut all = records;
        all.extend(ephemeral);

        let (snap, header, snap_warnings) = Snapshot::from_records(all);
        warnings.extend(snap_warnings.into_iter().map(StoreWarning::Snapshot));

        let header = match header {
            Some(h) => h,
            None => {
                tracing::warn!(path = %dir.display(), "data file has no header; synthesizing one");
                warnings.push(StoreWarning::MissingHeader);
                Header {
                    repo_name: repo_root
                        .file_name()
                        .map_or_else(|| "eluent".to_string(), |n| n.to_string_lossy().into_owned()),
                    generator: generator_string(),
                    created_at: Utc::now(),
                }
            }
        };

        let mut id_index = IdIndex::new();
        for atom_id in snap.atoms.keys() {
            id_index.insert(atom_id);
        }

        let mut comments: HashMap<AtomId, Vec<Comment>> = HashMap::new();
        for comment in snap.comments {
            comments.entry(comment.parent_id.clone()).or_default().push(comment);
        }
        for list in comments.values_mut() {
            list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        }

        let inner = StoreInner {
            repo_root: repo_root.to_path_buf(),
            header,
            atoms: snap.atoms.into_iter().collect(),
            ephemeral_ids,
            bonds: snap.bonds.into_iter().collect(),
            comments,
            id_index,
            statuses: StatusRegistry::default(),
            types: TypeRegistry::default(),
            version: 0,
            blocking_cache: BlockingCache::new(),
        };

        Ok((
            Self {
                inner: Arc::new(Mutex::new(inner)),
            },
            warnings,
        ))
    }

    /// The repository name recorded in the header.
    pub async fn repo_name(&self) -> String {
        self.inner.lock().await.header.repo_name.clone()
    }

    /// Monotonic mutation counter; bumps on every successful mutation.
    ///
    /// Derived-data consumers key their caches on this.
    pub async fn version(&self) -> u64 {
        self.inner.lock().await.version
    }

    /// Path of the synced data file.
    pub async fn data_path(&self) -> PathBuf {
        self.inner.lock().await.data_path()
    }

    // ========== Atom CRUD ==========

    /// Create a new atom.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] on bad input, [`Error::NotFound`] when the
    /// parent does not exist.
    pub async fn create_atom(&self, new_atom: NewAtom) -> Result<Atom> {
        let mut inner = self.inner.lock().await;

        new_atom.validate().map_err(Error::Validation)?;
        if let Some(parent) = &new_atom.parent_id {
            if !inner.atoms.contains_key(parent) {
                return Err(Error::NotFound(parent.to_string()));
            }
        }

        let mut atom_id = id::new_id(&inner.header.repo_name);
        while inner.atoms.contains_key(&atom_id) {
            atom_id = id::new_id(&inner.header.repo_name);
        }

        let now = Utc::now();
        let atom = Atom {
            id: atom_id.clone(),
            title: new_atom.title,
            description: new_atom.description,
            status: Status::Open,
            issue_type: new_atom.issue_type,
            priority: new_atom.priority,
            labels: new_atom.labels,
            assignee: new_atom.assignee,
            parent_id: new_atom.parent_id.clone(),
            defer_until: new_atom.defer_until,
            close_reason: None,
            created_at: now,
            updated_at: now,
            metadata: new_atom.metadata,
        };

        if new_atom.ephemeral {
            inner.ephemeral_ids.insert(atom_id.clone());
        }
        inner.append(&[Record::Atom(atom.clone())], new_atom.ephemeral)?;
        inner.atoms.insert(atom_id.clone(), atom.clone());
        inner.id_index.insert(&atom_id);

        // A declared parent gets its structural bond immediately.
        if let Some(parent) = new_atom.parent_id {
            let bond = Bond {
                source_id: parent,
                target_id: atom_id,
                kind: BondKind::ParentChild,
                created_at: now,
                metadata: serde_json::Map::new(),
            };
            let ephemeral_bond = inner.is_ephemeral_bond(&bond);
            inner.append(&[Record::Bond(bond.clone())], ephemeral_bond)?;
            inner.bonds.insert(bond.key(), bond);
        }

        inner.version += 1;
        Ok(atom)
    }

    /// Fetch an atom by exact id.
    pub async fn get_atom(&self, atom_id: &AtomId) -> Option<Atom> {
        self.inner.lock().await.atoms.get(atom_id).cloned()
    }

    /// Apply a partial update.
    ///
    /// Status changes are checked against the registry's transition table.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`], [`Error::InvalidState`] on an illegal
    /// transition, [`Error::Validation`] if the result fails validation.
    pub async fn update_atom(&self, atom_id: &AtomId, update: AtomUpdate) -> Result<Atom> {
        let mut inner = self.inner.lock().await;

        let current = inner
            .atoms
            .get(atom_id)
            .ok_or_else(|| Error::NotFound(atom_id.to_string()))?
            .clone();

        if let Some(next) = update.status {
            if !inner.statuses.can_transition(current.status, next) {
                return Err(Error::InvalidState {
                    current: current.status,
                });
            }
        }

        let mut atom = current;
        if let Some(title) = update.title {
            atom.title = title;
        }
        if let Some(description) = update.description {
            atom.description = description;
        }
        if let Some(status) = update.status {
            atom.status = status;
        }
        if let Some(issue_type) = update.issue_type {
            atom.issue_type = issue_type;
        }
        if let Some(priority) = update.priority {
            atom.priority = priority;
        }
        if let Some(assignee) = update.assignee {
            atom.assignee = assignee;
        }
        if let Some(defer_until) = update.defer_until {
            atom.defer_until = defer_until;
        }
        if let Some(close_reason) = update.close_reason {
            atom.close_reason = close_reason;
        }
        if let Some(labels) = update.labels {
            atom.labels = labels;
        }
        if let Some(patch) = update.metadata {
            for (key, value) in patch {
                if value.is_null() {
                    atom.metadata.remove(&key);
                } else {
                    atom.metadata.insert(key, value);
                }
            }
        }
        atom.updated_at = Utc::now();
        atom.validate().map_err(Error::Validation)?;

        inner.atoms.insert(atom_id.clone(), atom.clone());
        inner.rewrite_for(atom_id).await?;
        inner.version += 1;
        Ok(atom)
    }

    /// Close an atom with an optional reason.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidRequest`] for abstract types (they close implicitly
    /// when their children do), plus the conditions of
    /// [`RecordStore::update_atom`].
    pub async fn close_atom(&self, atom_id: &AtomId, reason: Option<String>) -> Result<Atom> {
        {
            let inner = self.inner.lock().await;
            let atom = inner
                .atoms
                .get(atom_id)
                .ok_or_else(|| Error::NotFound(atom_id.to_string()))?;
            if inner.types.is_abstract(atom.issue_type) {
                return Err(Error::InvalidRequest(format!(
                    "cannot directly close an abstract {} atom",
                    atom.issue_type
                )));
            }
        }
        self.update_atom(
            atom_id,
            AtomUpdate {
                status: Some(Status::Closed),
                close_reason: Some(reason),
                assignee: Some(None),
                ..Default::default()
            },
        )
        .await
    }

    /// Reopen a closed atom, clearing its close reason.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] unless the atom is currently closed.
    pub async fn reopen_atom(&self, atom_id: &AtomId) -> Result<Atom> {
        {
            let inner = self.inner.lock().await;
            let atom = inner
                .atoms
                .get(atom_id)
                .ok_or_else(|| Error::NotFound(atom_id.to_string()))?;
            if atom.status != Status::Closed {
                return Err(Error::InvalidState {
                    current: atom.status,
                });
            }
        }
        self.update_atom(
            atom_id,
            AtomUpdate {
                status: Some(Status::Open),
                close_reason: Some(None),
                ..Default::default()
            },
        )
        .await
    }

    /// Soft-delete an atom.
    ///
    /// # Errors
    ///
    /// Conditions of [`RecordStore::update_atom`].
    pub async fn discard_atom(&self, atom_id: &AtomId) -> Result<Atom> {
        self.update_atom(
            atom_id,
            AtomUpdate {
                status: Some(Status::Discard),
                assignee: Some(None),
                ..Default::default()
            },
        )
        .await
    }

    /// Restore a soft-deleted atom to open.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] unless the atom is currently discarded.
    pub async fn restore_atom(&self, atom_id: &AtomId) -> Result<Atom> {
        {
            let inner = self.inner.lock().await;
            let atom = inner
                .atoms
                .get(atom_id)
                .ok_or_else(|| Error::NotFound(atom_id.to_string()))?;
            if atom.status != Status::Discard {
                return Err(Error::InvalidState {
                    current: atom.status,
                });
            }
        }
        self.update_atom(
            atom_id,
            AtomUpdate {
                status: Some(Status::Open),
                ..Default::default()
            },
        )
        .await
    }

    /// Permanently remove discarded atoms older than the cutoff, with
    /// their bonds and comments. Returns the pruned ids.
    ///
    /// # Errors
    ///
    /// IO errors from the rewrite.
    pub async fn prune_discarded(&self, older_than: DateTime<Utc>) -> Result<Vec<AtomId>> {
        let mut inner = self.inner.lock().await;

        let doomed: Vec<AtomId> = inner
            .atoms
            .values()
            .filter(|a| a.status == Status::Discard && a.updated_at < older_than)
            .map(|a| a.id.clone())
            .collect();
        if doomed.is_empty() {
            return Ok(doomed);
        }

        let mut touched_ephemeral = false;
        let mut touched_data = false;
        for atom_id in &doomed {
            if inner.ephemeral_ids.remove(atom_id) {
                touched_ephemeral = true;
            } else {
                touched_data = true;
            }
            inner.atoms.remove(atom_id);
            inner.id_index.remove(atom_id);
            inner.comments.remove(atom_id);
            inner
                .bonds
                .retain(|(source, target, _), _| source != atom_id && target != atom_id);
        }

        if touched_data {
            inner.rewrite_data().await?;
        }
        if touched_ephemeral {
            inner.rewrite_ephemeral().await?;
        }
        inner.version += 1;
        Ok(doomed)
    }

    // ========== Claims (local half) ==========

    /// Claim an atom for an agent: status becomes `in_progress`, assignee
    /// is set. Idempotent when the same agent already holds the claim.
    ///
    /// This is the *local* half of claiming; the ledger syncer wraps it
    /// with the push/retry protocol.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] for closed/discarded/blocked atoms,
    /// [`Error::InvalidRequest`] for abstract types, [`Error::Conflict`]
    /// when another agent holds the claim.
    pub async fn claim_atom(&self, atom_id: &AtomId, agent_id: &str) -> Result<Atom> {
        let mut inner = self.inner.lock().await;

        let atom = inner
            .atoms
            .get(atom_id)
            .ok_or_else(|| Error::NotFound(atom_id.to_string()))?
            .clone();

        if inner.types.is_abstract(atom.issue_type) {
            return Err(Error::InvalidRequest(format!(
                "cannot claim an abstract {} atom",
                atom.issue_type
            )));
        }
        match atom.status {
            Status::Closed | Status::Discard | Status::Blocked => {
                return Err(Error::InvalidState {
                    current: atom.status,
                })
            }
            Status::InProgress => {
                let held_by_other = atom
                    .assignee
                    .as_deref()
                    .filter(|owner| *owner != agent_id)
                    .map(ToString::to_string);
                return match held_by_other {
                    Some(owner) => Err(Error::Conflict { owner }),
                    // Same agent re-claiming: nothing to change.
                    None => Ok(atom),
                };
            }
            Status::Open | Status::Deferred => {}
        }

        let mut claimed = atom;
        claimed.status = Status::InProgress;
        claimed.assignee = Some(agent_id.to_string());
        claimed.updated_at = Utc::now();

        inner.atoms.insert(atom_id.clone(), claimed.clone());
        inner.rewrite_for(atom_id).await?;
        inner.version += 1;
        Ok(claimed)
    }

    /// Release a claim: back to `open`, assignee cleared. Idempotent when
    /// the atom is not in progress.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`]; IO errors from the rewrite.
    pub async fn release_atom(&self, atom_id: &AtomId) -> Result<Atom> {
        let mut inner = self.inner.lock().await;

        let atom = inner
            .atoms
            .get(atom_id)
            .ok_or_else(|| Error::NotFound(atom_id.to_string()))?
            .clone();
        if atom.status != Status::InProgress {
            return Ok(atom);
        }

        let mut released = atom;
        released.status = Status::Open;
        released.assignee = None;
        released.updated_at = Utc::now();

        inner.atoms.insert(atom_id.clone(), released.clone());
        inner.rewrite_for(atom_id).await?;
        inner.version += 1;
        Ok(released)
    }

    /// Touch `updated_at` on an in-progress atom to signal liveness.
    ///
    /// Any agent may heartbeat any in-progress atom.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidState`] unless the atom is in progress.
    pub async fn heartbeat_atom(&self, atom_id: &AtomId) -> Result<Atom> {
        let mut inner = self.inner.lock().await;

        let atom = inner
            .atoms
            .get(atom_id)
            .ok_or_else(|| Error::NotFound(atom_id.to_string()))?
            .clone();
        if atom.status != Status::InProgress {
            return Err(Error::InvalidState {
                current: atom.status,
            });
        }

        let mut touched = atom;
        touched.updated_at = Utc::now();
        inner.atoms.insert(atom_id.clone(), touched.clone());
        inner.rewrite_for(atom_id).await?;
        inner.version += 1;
        Ok(touched)
    }

    // ========== Labels ==========

    /// Add a label (idempotent).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`]; IO errors from the rewrite.
    pub async fn add_label(&self, atom_id: &AtomId, label: &str) -> Result<Atom> {
        let mut inner = self.inner.lock().await;
        let atom = inner
            .atoms
            .get_mut(atom_id)
            .ok_or_else(|| Error::NotFound(atom_id.to_string()))?;

        if atom.labels.insert(label.to_string()) {
            atom.updated_at = Utc::now();
            let atom = atom.clone();
            inner.rewrite_for(atom_id).await?;
            inner.version += 1;
            Ok(atom)
        } else {
            Ok(atom.clone())
        }
    }

    /// Remove a label (idempotent).
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`]; IO errors from the rewrite.
    pub async fn remove_label(&self, atom_id: &AtomId, label: &str) -> Result<Atom> {
        let mut inner = self.inner.lock().await;
        let atom = inner
            .atoms
            .get_mut(atom_id)
            .ok_or_else(|| Error::NotFound(atom_id.to_string()))?;

        if atom.labels.remove(label) {
            atom.updated_at = Utc::now();
            let atom = atom.clone();
            inner.rewrite_for(atom_id).await?;
            inner.version += 1;
            Ok(atom)
        } else {
            Ok(atom.clone())
        }
    }

    // ========== Bonds ==========

    /// Add a bond.
    ///
    /// Blocking kinds are checked against the graph first: self-bonds and
    /// blocking cycles are rejected with the offending path.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown endpoints, [`Error::AlreadyExists`]
    /// for a duplicate triple, [`Error::CycleDetected`] when the bond
    /// would close a blocking cycle.
    pub async fn add_bond(
        &self,
        source_id: &AtomId,
        target_id: &AtomId,
        kind: BondKind,
    ) -> Result<Bond> {
        let mut inner = self.inner.lock().await;

        for endpoint in [source_id, target_id] {
            if !inner.atoms.contains_key(endpoint) {
                return Err(Error::NotFound(endpoint.to_string()));
            }
        }
        let key = (source_id.clone(), target_id.clone(), kind);
        if inner.bonds.contains_key(&key) {
            return Err(Error::AlreadyExists(format!(
                "bond {source_id} -> {target_id} ({kind})"
            )));
        }

        graph::check_insert(&inner.bonds, source_id, target_id, kind)?;

        let bond = Bond {
            source_id: source_id.clone(),
            target_id: target_id.clone(),
            kind,
            created_at: Utc::now(),
            metadata: serde_json::Map::new(),
        };
        let ephemeral = inner.is_ephemeral_bond(&bond);
        inner.append(&[Record::Bond(bond.clone())], ephemeral)?;
        inner.bonds.insert(key, bond.clone());

        // parent_child bonds keep the denormalized parent_id in step.
        if kind == BondKind::ParentChild {
            if let Some(child) = inner.atoms.get_mut(target_id) {
                child.parent_id = Some(source_id.clone());
                child.updated_at = Utc::now();
            }
            inner.rewrite_for(target_id).await?;
        }

        inner.version += 1;
        Ok(bond)
    }

    /// Remove a bond by its identity triple.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the triple is absent.
    pub async fn remove_bond(
        &self,
        source_id: &AtomId,
        target_id: &AtomId,
        kind: BondKind,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;

        let key = (source_id.clone(), target_id.clone(), kind);
        let removed = inner.bonds.remove(&key);
        if removed.is_none() {
            return Err(Error::NotFound(format!(
                "bond {source_id} -> {target_id} ({kind})"
            )));
        }

        if kind == BondKind::ParentChild {
            if let Some(child) = inner.atoms.get_mut(target_id) {
                if child.parent_id.as_ref() == Some(source_id) {
                    child.parent_id = None;
                    child.updated_at = Utc::now();
                }
            }
        }

        inner.rewrite_data().await?;
        if !inner.ephemeral_ids.is_empty() {
            inner.rewrite_ephemeral().await?;
        }
        inner.version += 1;
        Ok(())
    }

    /// All bonds, in deterministic key order.
    pub async fn bonds(&self) -> Vec<Bond> {
        let inner = self.inner.lock().await;
        let mut bonds: Vec<Bond> = inner.bonds.values().cloned().collect();
        bonds.sort_by_key(Bond::key);
        bonds
    }

    // ========== Comments ==========

    /// Append a comment to an atom. Comments are immutable once written.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] when the parent is absent.
    pub async fn add_comment(
        &self,
        parent_id: &AtomId,
        author: &str,
        content: &str,
    ) -> Result<Comment> {
        let mut inner = self.inner.lock().await;

        if !inner.atoms.contains_key(parent_id) {
            return Err(Error::NotFound(parent_id.to_string()));
        }

        let seq = inner.next_comment_seq(parent_id);
        let comment = Comment {
            id: format!("{parent_id}-c{seq}"),
            parent_id: parent_id.clone(),
            author: author.to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
        };

        let ephemeral = inner.ephemeral_ids.contains(parent_id);
        inner.append(&[Record::Comment(comment.clone())], ephemeral)?;
        inner
            .comments
            .entry(parent_id.clone())
            .or_default()
            .push(comment.clone());
        inner.version += 1;
        Ok(comment)
    }

    /// Comments on an atom, oldest first.
    pub async fn comments(&self, parent_id: &AtomId) -> Vec<Comment> {
        self.inner
            .lock()
            .await
            .comments
            .get(parent_id)
            .cloned()
            .unwrap_or_default()
    }

    // ========== Queries ==========

    /// List atoms matching a filter, newest first.
    pub async fn list(&self, filter: &AtomFilter) -> Vec<Atom> {
        let inner = self.inner.lock().await;
        let mut atoms: Vec<Atom> = inner
            .atoms
            .values()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect();
        atoms.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            atoms.truncate(limit);
        }
        atoms
    }

    /// The ready set: open, non-abstract, unblocked, past any defer gate.
    ///
    /// Delegates to [`crate::ready`]; see there for the exact semantics.
    pub async fn ready(
        &self,
        filter: &AtomFilter,
        policy: SortPolicy,
        now: DateTime<Utc>,
    ) -> Vec<Atom> {
        let inner = self.inner.lock().await;
        ready::ready_atoms(
            &inner.atoms,
            &inner.bonds,
            &inner.statuses,
            &inner.types,
            filter,
            policy,
            now,
        )
    }

    /// Whether the atom has an unsatisfied blocking dependency.
    ///
    /// Answers are memoized per `(atom_id, version)`; any mutation bumps
    /// the version and invalidates the memo wholesale.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] for unknown atoms.
    pub async fn is_blocked(&self, atom_id: &AtomId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if !inner.atoms.contains_key(atom_id) {
            return Err(Error::NotFound(atom_id.to_string()));
        }

        let StoreInner {
            atoms,
            bonds,
            version,
            blocking_cache,
            ..
        } = &mut *inner;
        let resolver = BlockingResolver::new(atoms, bonds);
        Ok(blocking_cache.is_blocked(*version, &resolver, atom_id))
    }

    /// Remove ephemeral atoms (with their bonds and comments) last touched
    /// before the cutoff. Returns the removed ids.
    ///
    /// Backed by the `ephemeral.cleanup_days` config key; the daemon runs
    /// this when it first opens a repository.
    ///
    /// # Errors
    ///
    /// IO errors from the rewrite.
    pub async fn cleanup_ephemeral(&self, older_than: DateTime<Utc>) -> Result<Vec<AtomId>> {
        let mut inner = self.inner.lock().await;

        let expired: Vec<AtomId> = inner
            .ephemeral_ids
            .iter()
            .filter(|atom_id| {
                inner
                    .atoms
                    .get(atom_id)
                    .is_none_or(|atom| atom.updated_at < older_than)
            })
            .cloned()
            .collect();
        if expired.is_empty() {
            return Ok(expired);
        }

        for atom_id in &expired {
            inner.ephemeral_ids.remove(atom_id);
            inner.atoms.remove(atom_id);
            inner.id_index.remove(atom_id);
            inner.comments.remove(atom_id);
            inner
                .bonds
                .retain(|(source, target, _), _| source != atom_id && target != atom_id);
        }

        inner.rewrite_ephemeral().await?;
        inner.version += 1;
        tracing::debug!(count = expired.len(), "cleaned up expired ephemeral atoms");
        Ok(expired)
    }

    /// Resolve user input (full id or randomness prefix) to an atom id.
    ///
    /// # Errors
    ///
    /// [`Error::NotFound`] / [`Error::Ambiguous`] per [`crate::id::resolve`].
    pub async fn resolve_id(&self, input: &str) -> Result<AtomId> {
        let inner = self.inner.lock().await;
        id::resolve(input, &inner.id_index, None)
    }

    /// Minimal unambiguous prefix for an id.
    pub async fn shorten_id(&self, atom_id: &AtomId) -> String {
        let inner = self.inner.lock().await;
        id::shorten(atom_id, &inner.id_index)
    }

    /// An immutable view of the synced (non-ephemeral) records.
    ///
    /// This is what sync and merge operate on; ephemeral records never
    /// leave the machine.
    pub async fn synced_snapshot(&self) -> Snapshot {
        let inner = self.inner.lock().await;
        inner.synced_snapshot()
    }

    /// Replace all synced records with a merged snapshot and rewrite the
    /// data file atomically. Ephemeral records are untouched.
    ///
    /// # Errors
    ///
    /// IO errors from the rewrite.
    pub async fn replace_synced(&self, merged: Snapshot) -> Result<()> {
        let mut inner = self.inner.lock().await;

        // Drop current synced records, keep ephemeral ones.
        let ephemeral_ids = inner.ephemeral_ids.clone();
        inner.atoms.retain(|atom_id, _| ephemeral_ids.contains(atom_id));
        inner.bonds.retain(|(s, t, _), _| {
            ephemeral_ids.contains(s) || ephemeral_ids.contains(t)
        });
        inner
            .comments
            .retain(|parent, _| ephemeral_ids.contains(parent));

        for (atom_id, atom) in merged.atoms {
            inner.atoms.insert(atom_id, atom);
        }
        for (key, bond) in merged.bonds {
            inner.bonds.insert(key, bond);
        }
        for comment in merged.comments {
            inner
                .comments
                .entry(comment.parent_id.clone())
                .or_default()
                .push(comment);
        }
        for list in inner.comments.values_mut() {
            list.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            list.dedup_by(|a, b| a.id == b.id);
        }

        let mut id_index = IdIndex::new();
        for atom_id in inner.atoms.keys() {
            id_index.insert(atom_id);
        }
        inner.id_index = id_index;

        inner.rewrite_data().await?;
        inner.version += 1;
        Ok(())
    }

    /// Reload from disk, discarding in-memory state.
    ///
    /// # Errors
    ///
    /// Conditions of [`RecordStore::open`].
    pub async fn reload(&self) -> Result<Vec<StoreWarning>> {
        let repo_root = {
            let inner = self.inner.lock().await;
            inner.repo_root.clone()
        };
        let (fresh, warnings) = Self::open(&repo_root).await?;
        let fresh_inner = Arc::try_unwrap(fresh.inner)
            .map_err(|_| Error::InvalidRequest("reload race".to_string()))?
            .into_inner();

        let mut inner = self.inner.lock().await;
        let version = inner.version + 1;
        *inner = fresh_inner;
        inner.version = version;
        Ok(warnings)
    }
}

impl StoreInner {
    fn eluent_dir(&self) -> PathBuf {
        self.repo_root.join(ELUENT_DIR)
    }

    fn data_path(&self) -> PathBuf {
        self.eluent_dir().join(DATA_FILE)
    }

    fn ephemeral_path(&self) -> PathBuf {
        self.eluent_dir().join(EPHEMERAL_FILE)
    }

    fn is_ephemeral_bond(&self, bond: &Bond) -> bool {
        self.ephemeral_ids.contains(&bond.source_id) || self.ephemeral_ids.contains(&bond.target_id)
    }

    fn append(&self, records: &[Record], ephemeral: bool) -> Result<()> {
        let path = if ephemeral {
            self.ephemeral_path()
        } else {
            self.data_path()
        };
        eluent_jsonl::append_locked(path, records, LOCK_WAIT)?;
        Ok(())
    }

    /// Rewrite whichever file holds the given atom.
    async fn rewrite_for(&self, atom_id: &AtomId) -> Result<()> {
        if self.ephemeral_ids.contains(atom_id) {
            self.rewrite_ephemeral().await
        } else {
            self.rewrite_data().await
        }
    }

    fn synced_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::empty();
        for (atom_id, atom) in &self.atoms {
            if !self.ephemeral_ids.contains(atom_id) {
                snapshot.atoms.insert(atom_id.clone(), atom.clone());
            }
        }
        for (key, bond) in &self.bonds {
            if !self.is_ephemeral_bond(bond) {
                snapshot.bonds.insert(key.clone(), bond.clone());
            }
        }
        for (parent, list) in &self.comments {
            if !self.ephemeral_ids.contains(parent) {
                snapshot.comments.extend(list.iter().cloned());
            }
        }
        snapshot
            .comments
            .sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        snapshot
    }

    async fn rewrite_data(&self) -> Result<()> {
        let snapshot = self.synced_snapshot();
        let mut records = vec![Record::Header(self.header.clone())];
        records.extend(snapshot.to_records());
        eluent_jsonl::rewrite_atomic(self.data_path(), records).await?;
        Ok(())
    }

    async fn rewrite_ephemeral(&self) -> Result<()> {
        let mut snapshot = Snapshot::empty();
        for atom_id in &self.ephemeral_ids {
            if let Some(atom) = self.atoms.get(atom_id) {
                snapshot.atoms.insert(atom_id.clone(), atom.clone());
            }
            if let Some(list) = self.comments.get(atom_id) {
                snapshot.comments.extend(list.iter().cloned());
            }
        }
        for (key, bond) in &self.bonds {
            if self.is_ephemeral_bond(bond) {
                snapshot.bonds.insert(key.clone(), bond.clone());
            }
        }
        eluent_jsonl::rewrite_atomic(self.ephemeral_path(), snapshot.to_records()).await?;
        Ok(())
    }

    fn next_comment_seq(&self, parent_id: &AtomId) -> u64 {
        let prefix = format!("{parent_id}-c");
        self.comments
            .get(parent_id)
            .map(|list| {
                list.iter()
                    .filter_map(|c| c.id.strip_prefix(&prefix)?.parse::<u64>().ok())
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
            + 1
    }
}

/// Record local claims made while the ledger was unreachable.
///
/// Kept here (not on the syncer) so a store-only configuration can still
/// queue claims for later reconciliation.
#[must_use]
pub fn offline_claim(atom_id: &AtomId, agent_id: &str) -> OfflineClaim {
    OfflineClaim {
        atom_id: atom_id.clone(),
        agent_id: agent_id.to_string(),
        claimed_at: Utc::now(),
    }
}

fn generator_string() -> String {
    format!("eluent {}", env!("CARGO_PKG_VERSION"))
}

async fn load_records(
    path: &Path,
    label: &str,
    warnings: &mut Vec<StoreWarning>,
) -> Result<Vec<Record>> {
    let (records, line_warnings) = eluent_jsonl::read_resilient::<Record>(path).await?;
    for warning in line_warnings {
        if let eluent_jsonl::LineWarning::Malformed { line_number, error } = warning {
            warnings.push(StoreWarning::Malformed {
                file: label.to_string(),
                line_number,
                error,
            });
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn fresh_store(dir: &Path) -> RecordStore {
        RecordStore::init(dir, "test").await.unwrap()
    }

    fn titled(title: &str) -> NewAtom {
        NewAtom {
            title: title.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn init_twice_is_an_error() {
        let dir = tempdir().unwrap();
        fresh_store(dir.path()).await;
        let err = RecordStore::init(dir.path(), "test").await.unwrap_err();
        assert!(matches!(err, Error::AlreadyInitialized(_)));
    }

    #[tokio::test]
    async fn open_uninitialized_is_an_error() {
        let dir = tempdir().unwrap();
        let err = RecordStore::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::NotInitialized(_)));
    }

    #[tokio::test]
    async fn create_and_reload_round_trips() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;

        let atom = store.create_atom(titled("First")).await.unwrap();
        assert!(atom.id.as_str().starts_with("test-"));

        let (reopened, warnings) = RecordStore::open(dir.path()).await.unwrap();
        assert!(warnings.is_empty());
        let loaded = reopened.get_atom(&atom.id).await.unwrap();
        assert_eq!(loaded, atom);
        assert_eq!(reopened.repo_name().await, "test");
    }

    #[tokio::test]
    async fn update_enforces_transitions() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let atom = store.create_atom(titled("A")).await.unwrap();

        store.close_atom(&atom.id, None).await.unwrap();

        // closed -> in_progress is not a legal transition.
        let err = store
            .update_atom(
                &atom.id,
                AtomUpdate {
                    status: Some(Status::InProgress),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState { current: Status::Closed }));

        // reopen clears the close reason and allows work again.
        let reopened = store.reopen_atom(&atom.id).await.unwrap();
        assert_eq!(reopened.status, Status::Open);
        assert!(reopened.close_reason.is_none());
    }

    #[tokio::test]
    async fn claim_is_exclusive_and_idempotent() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let atom = store.create_atom(titled("Claimable")).await.unwrap();

        let claimed = store.claim_atom(&atom.id, "agent-x").await.unwrap();
        assert_eq!(claimed.status, Status::InProgress);
        assert_eq!(claimed.assignee.as_deref(), Some("agent-x"));

        // Same agent: idempotent success.
        store.claim_atom(&atom.id, "agent-x").await.unwrap();

        // Different agent: conflict carrying the owner.
        let err = store.claim_atom(&atom.id, "agent-y").await.unwrap_err();
        match err {
            Error::Conflict { owner } => assert_eq!(owner, "agent-x"),
            other => panic!("expected Conflict, got {other}"),
        }
    }

    #[tokio::test]
    async fn claim_rejects_abstract_and_terminal() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;

        let epic = store
            .create_atom(NewAtom {
                title: "Epic".to_string(),
                issue_type: crate::domain::IssueType::Epic,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(matches!(
            store.claim_atom(&epic.id, "x").await,
            Err(Error::InvalidRequest(_))
        ));

        let done = store.create_atom(titled("Done")).await.unwrap();
        store.close_atom(&done.id, None).await.unwrap();
        assert!(matches!(
            store.claim_atom(&done.id, "x").await,
            Err(Error::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn release_and_heartbeat() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let atom = store.create_atom(titled("W")).await.unwrap();

        // Heartbeat requires an active claim.
        assert!(store.heartbeat_atom(&atom.id).await.is_err());

        store.claim_atom(&atom.id, "agent").await.unwrap();
        let before = store.get_atom(&atom.id).await.unwrap().updated_at;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let after = store.heartbeat_atom(&atom.id).await.unwrap().updated_at;
        assert!(after > before);

        let released = store.release_atom(&atom.id).await.unwrap();
        assert_eq!(released.status, Status::Open);
        assert!(released.assignee.is_none());

        // Releasing an open atom is a quiet no-op.
        store.release_atom(&atom.id).await.unwrap();
    }

    #[tokio::test]
    async fn bonds_reject_duplicates_and_unknown_endpoints() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let a = store.create_atom(titled("A")).await.unwrap();
        let b = store.create_atom(titled("B")).await.unwrap();

        store.add_bond(&a.id, &b.id, BondKind::Blocks).await.unwrap();
        assert!(matches!(
            store.add_bond(&a.id, &b.id, BondKind::Blocks).await,
            Err(Error::AlreadyExists(_))
        ));
        assert!(matches!(
            store
                .add_bond(&a.id, &AtomId::new("test-ghost"), BondKind::Blocks)
                .await,
            Err(Error::NotFound(_))
        ));

        // Same endpoints, different kind: a distinct bond.
        store.add_bond(&a.id, &b.id, BondKind::Related).await.unwrap();
        assert_eq!(store.bonds().await.len(), 2);
    }

    #[tokio::test]
    async fn blocking_cycle_is_rejected_with_path() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let a = store.create_atom(titled("A")).await.unwrap();
        let b = store.create_atom(titled("B")).await.unwrap();
        let c = store.create_atom(titled("C")).await.unwrap();

        store.add_bond(&a.id, &b.id, BondKind::Blocks).await.unwrap();
        store.add_bond(&b.id, &c.id, BondKind::Blocks).await.unwrap();

        let err = store.add_bond(&c.id, &a.id, BondKind::Blocks).await.unwrap_err();
        match err {
            Error::CycleDetected { path } => {
                assert_eq!(path.first(), path.last());
                assert!(path.len() >= 3);
            }
            other => panic!("expected CycleDetected, got {other}"),
        }

        // Informational kinds are allowed to "cycle".
        store.add_bond(&c.id, &a.id, BondKind::Related).await.unwrap();
    }

    #[tokio::test]
    async fn comments_are_sequenced_per_parent() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let atom = store.create_atom(titled("Discussed")).await.unwrap();

        let c1 = store.add_comment(&atom.id, "alice", "first").await.unwrap();
        let c2 = store.add_comment(&atom.id, "bob", "second").await.unwrap();
        assert_eq!(c1.id, format!("{}-c1", atom.id));
        assert_eq!(c2.id, format!("{}-c2", atom.id));

        let (reopened, _) = RecordStore::open(dir.path()).await.unwrap();
        let c3 = reopened.add_comment(&atom.id, "carol", "third").await.unwrap();
        assert_eq!(c3.id, format!("{}-c3", atom.id));
        assert_eq!(reopened.comments(&atom.id).await.len(), 3);
    }

    #[tokio::test]
    async fn ephemeral_atoms_never_reach_the_data_file() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;

        let eph = store
            .create_atom(NewAtom {
                title: "Local only".to_string(),
                ephemeral: true,
                ..Default::default()
            })
            .await
            .unwrap();
        store.add_comment(&eph.id, "me", "scratch note").await.unwrap();

        let data = std::fs::read_to_string(dir.path().join(ELUENT_DIR).join(DATA_FILE)).unwrap();
        assert!(!data.contains(eph.id.as_str()));

        let ephemeral =
            std::fs::read_to_string(dir.path().join(ELUENT_DIR).join(EPHEMERAL_FILE)).unwrap();
        assert!(ephemeral.contains(eph.id.as_str()));

        // And the synced snapshot excludes it too.
        assert!(store.synced_snapshot().await.atoms.is_empty());

        // But it is fully queryable locally.
        assert!(store.get_atom(&eph.id).await.is_some());
    }

    #[tokio::test]
    async fn prune_discarded_removes_old_soft_deletes() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let atom = store.create_atom(titled("Doomed")).await.unwrap();
        let keeper = store.create_atom(titled("Kept")).await.unwrap();

        store.discard_atom(&atom.id).await.unwrap();

        // Cutoff in the future: everything discarded qualifies.
        let pruned = store
            .prune_discarded(Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(pruned, vec![atom.id.clone()]);
        assert!(store.get_atom(&atom.id).await.is_none());
        assert!(store.get_atom(&keeper.id).await.is_some());

        // Pruned ids no longer resolve.
        assert!(store.resolve_id(atom.id.as_str()).await.is_err());
    }

    #[tokio::test]
    async fn restore_requires_discard() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let atom = store.create_atom(titled("A")).await.unwrap();

        assert!(store.restore_atom(&atom.id).await.is_err());
        store.discard_atom(&atom.id).await.unwrap();
        let restored = store.restore_atom(&atom.id).await.unwrap();
        assert_eq!(restored.status, Status::Open);
    }

    #[tokio::test]
    async fn version_bumps_on_every_mutation() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        assert_eq!(store.version().await, 0);

        let atom = store.create_atom(titled("A")).await.unwrap();
        assert_eq!(store.version().await, 1);

        store.add_label(&atom.id, "x").await.unwrap();
        assert_eq!(store.version().await, 2);

        // Idempotent no-op does not bump.
        store.add_label(&atom.id, "x").await.unwrap();
        assert_eq!(store.version().await, 2);
    }

    #[tokio::test]
    async fn parent_bond_maintains_parent_id() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let parent = store
            .create_atom(NewAtom {
                title: "Parent".to_string(),
                issue_type: crate::domain::IssueType::Epic,
                ..Default::default()
            })
            .await
            .unwrap();
        let child = store.create_atom(titled("Child")).await.unwrap();

        store
            .add_bond(&parent.id, &child.id, BondKind::ParentChild)
            .await
            .unwrap();
        assert_eq!(
            store.get_atom(&child.id).await.unwrap().parent_id,
            Some(parent.id.clone())
        );

        store
            .remove_bond(&parent.id, &child.id, BondKind::ParentChild)
            .await
            .unwrap();
        assert_eq!(store.get_atom(&child.id).await.unwrap().parent_id, None);
    }

    #[tokio::test]
    async fn is_blocked_memoizes_until_mutation() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        let blocker = store.create_atom(titled("Blocker")).await.unwrap();
        let blocked = store.create_atom(titled("Blocked")).await.unwrap();
        store
            .add_bond(&blocker.id, &blocked.id, BondKind::Blocks)
            .await
            .unwrap();

        assert!(store.is_blocked(&blocked.id).await.unwrap());
        assert!(!store.is_blocked(&blocker.id).await.unwrap());

        // Closing the blocker bumps the version; the memo refreshes.
        store.close_atom(&blocker.id, None).await.unwrap();
        assert!(!store.is_blocked(&blocked.id).await.unwrap());

        assert!(store.is_blocked(&AtomId::new("test-ghost")).await.is_err());
    }

    #[tokio::test]
    async fn ephemeral_cleanup_respects_the_cutoff() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;

        let ephemeral = store
            .create_atom(NewAtom {
                title: "Scratch".to_string(),
                ephemeral: true,
                ..Default::default()
            })
            .await
            .unwrap();
        let durable = store.create_atom(titled("Durable")).await.unwrap();

        // A cutoff in the past removes nothing.
        let removed = store
            .cleanup_ephemeral(Utc::now() - chrono::Duration::days(1))
            .await
            .unwrap();
        assert!(removed.is_empty());

        // A cutoff in the future removes the ephemeral atom only.
        let removed = store
            .cleanup_ephemeral(Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap();
        assert_eq!(removed, vec![ephemeral.id.clone()]);
        assert!(store.get_atom(&ephemeral.id).await.is_none());
        assert!(store.get_atom(&durable.id).await.is_some());
    }

    #[tokio::test]
    async fn malformed_lines_surface_as_warnings() {
        let dir = tempdir().unwrap();
        let store = fresh_store(dir.path()).await;
        store.create_atom(titled("Good")).await.unwrap();

        // Corrupt the file by hand.
        let path = dir.path().join(ELUENT_DIR).join(DATA_FILE);
        let mut contents = std::fs::read_to_string(&path).unwrap();
        contents.push_str("this is not json\n");
        std::fs::write(&path, contents).unwrap();

        let (reopened, warnings) = RecordStore::open(dir.path()).await.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(warnings[0], StoreWarning::Malformed { .. }));
        assert_eq!(reopened.list(&AtomFilter::default()).await.len(), 1);
    }
}
