//! Domain types for the eluent work-tracking engine.
//!
//! The primary record types are [`Atom`] (a work item), [`Bond`] (a typed
//! directed relationship between two atoms), and [`Comment`]. All three
//! serialize as JSON Lines records discriminated by a `_type` field; see
//! [`Record`].
//!
//! Status and issue-type behavior (which statuses block readiness, which
//! types are abstract, which transitions are legal) is not hard-coded at
//! call sites. It lives in [`StatusRegistry`] and [`TypeRegistry`], which
//! ship with the built-in table and accept runtime adjustment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Unique identifier for an atom.
///
/// Full form is `"<repo>-<26char>"` where the 26-character tail is a
/// 10-character millisecond timestamp followed by 16 random characters,
/// both in Crockford base32 (see [`crate::id`]). The inner field is private
/// so the format can evolve behind the newtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AtomId(String);

impl AtomId {
    /// Create an atom id from an already-formed string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The 26-character portion after the repo prefix, if well-formed.
    ///
    /// The repo name may itself contain hyphens, so the suffix is taken
    /// after the *last* hyphen.
    #[must_use]
    pub fn suffix(&self) -> Option<&str> {
        let (_, tail) = self.0.rsplit_once('-')?;
        (tail.len() == crate::id::SUFFIX_LEN).then_some(tail)
    }

    /// The 16-character randomness portion, if well-formed.
    ///
    /// This is the part prefix resolution indexes; the leading timestamp
    /// characters are too similar between ids minted close together.
    #[must_use]
    pub fn randomness(&self) -> Option<&str> {
        self.suffix().map(|s| &s[crate::id::TIME_LEN..])
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AtomId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AtomId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Status of an atom.
///
/// Whether a status blocks readiness, and which transitions out of it are
/// legal, is decided by the [`StatusRegistry`], not by the variant itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Ready to be picked up (subject to dependencies and gates).
    Open,
    /// Claimed and actively being worked.
    InProgress,
    /// Explicitly marked blocked, independent of the dependency graph.
    Blocked,
    /// Parked until a `defer_until` instant.
    Deferred,
    /// Finished; terminal except via reopen.
    Closed,
    /// Soft-deleted; restorable until pruned.
    Discard,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Deferred => "deferred",
            Self::Closed => "closed",
            Self::Discard => "discard",
        };
        write!(f, "{name}")
    }
}

/// Type of an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueType {
    /// General unit of work.
    Task,
    /// New functionality.
    Feature,
    /// Defect.
    Bug,
    /// A produced thing (document, binary, dataset) tracked like work.
    Artifact,
    /// Container for other atoms; abstract.
    Epic,
    /// Template instantiation root; abstract.
    Formula,
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Task => "task",
            Self::Feature => "feature",
            Self::Bug => "bug",
            Self::Artifact => "artifact",
            Self::Epic => "epic",
            Self::Formula => "formula",
        };
        write!(f, "{name}")
    }
}

/// Kind of a bond between two atoms.
///
/// The eight kinds partition into *blocking* kinds, which feed readiness,
/// and *informational* kinds, which do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BondKind {
    /// Source must close before the target is ready.
    Blocks,
    /// Source is the parent; the child is not ready while the immediate
    /// parent is unclosed. Does not cascade past the direct parent.
    ParentChild,
    /// Blocks only when the source closed with a failure reason.
    ConditionalBlocks,
    /// Source and everything reachable from it along blocking kinds must
    /// close before the target is ready.
    WaitsFor,
    /// Informational link.
    Related,
    /// Marks the source a duplicate of the target.
    Duplicates,
    /// The source surfaced while working the target.
    DiscoveredFrom,
    /// Threads a discussion atom under another.
    RepliesTo,
}

impl BondKind {
    /// Whether this kind participates in readiness computation.
    #[must_use]
    pub fn is_blocking(self) -> bool {
        matches!(
            self,
            Self::Blocks | Self::ParentChild | Self::ConditionalBlocks | Self::WaitsFor
        )
    }

    /// All eight kinds, in declaration order.
    #[must_use]
    pub fn all() -> [Self; 8] {
        [
            Self::Blocks,
            Self::ParentChild,
            Self::ConditionalBlocks,
            Self::WaitsFor,
            Self::Related,
            Self::Duplicates,
            Self::DiscoveredFrom,
            Self::RepliesTo,
        ]
    }
}

impl fmt::Display for BondKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Blocks => "blocks",
            Self::ParentChild => "parent_child",
            Self::ConditionalBlocks => "conditional_blocks",
            Self::WaitsFor => "waits_for",
            Self::Related => "related",
            Self::Duplicates => "duplicates",
            Self::DiscoveredFrom => "discovered_from",
            Self::RepliesTo => "replies_to",
        };
        write!(f, "{name}")
    }
}

/// Maximum length for atom titles.
pub const MAX_TITLE_LENGTH: usize = 200;

/// Maximum priority value (0 is highest urgency, 5 lowest).
pub const MAX_PRIORITY: u8 = 5;

/// A work item.
///
/// Bonds are not stored on the atom; the record store owns them as
/// first-class records and the dependency graph is rebuilt from the bond
/// set. `parent_id` is denormalized here because the merge engine treats it
/// as a scalar field, but the corresponding `parent_child` bond is the
/// authority for readiness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    /// Unique identifier.
    pub id: AtomId,

    /// Title (required, non-empty).
    pub title: String,

    /// Longer description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Current status.
    pub status: Status,

    /// Issue type.
    pub issue_type: IssueType,

    /// Priority, 0 (highest) through 5 (lowest).
    pub priority: u8,

    /// Labels, kept sorted for deterministic serialization.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub labels: BTreeSet<String>,

    /// Current assignee, set while claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    /// Parent atom, forming a forest via `parent_child` bonds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<AtomId>,

    /// Instant before which the atom is not ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_until: Option<DateTime<Utc>>,

    /// Why the atom closed; cleared by reopen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Last update timestamp; always >= `created_at`.
    pub updated_at: DateTime<Utc>,

    /// Free-form nested metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Atom {
    /// Validate structural invariants.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violation: empty or over-long
    /// title, out-of-range priority, or `updated_at < created_at`.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let trimmed = self.title.trim();
        if trimmed.is_empty() {
            return Err("title cannot be empty".to_string());
        }
        if trimmed.len() > MAX_TITLE_LENGTH {
            return Err(format!(
                "title cannot exceed {MAX_TITLE_LENGTH} characters (got {})",
                trimmed.len()
            ));
        }
        if self.priority > MAX_PRIORITY {
            return Err(format!(
                "priority must be in range 0-{MAX_PRIORITY} (got {})",
                self.priority
            ));
        }
        if self.updated_at < self.created_at {
            return Err("updated_at cannot precede created_at".to_string());
        }
        Ok(())
    }
}

/// A typed directed relationship between two atoms.
///
/// Identity is the `(source_id, target_id, kind)` triple; the store rejects
/// duplicate triples on insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bond {
    /// The atom the semantics flow *from* (the blocker, the parent).
    pub source_id: AtomId,

    /// The atom the semantics flow *to* (the blocked, the child).
    pub target_id: AtomId,

    /// Relationship kind.
    pub kind: BondKind,

    /// Creation timestamp.
    pub created_at: DateTime<Utc>,

    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Bond {
    /// The identity triple.
    #[must_use]
    pub fn key(&self) -> (AtomId, AtomId, BondKind) {
        (self.source_id.clone(), self.target_id.clone(), self.kind)
    }
}

/// An immutable comment on an atom.
///
/// Ids are `<parent>-c<seq>` with a per-parent sequence starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Comment id (`<parent>-c<seq>`).
    pub id: String,

    /// The atom this comment belongs to.
    pub parent_id: AtomId,

    /// Author (agent or human name).
    pub author: String,

    /// Comment body.
    pub content: String,

    /// Creation timestamp; comments are never edited.
    pub created_at: DateTime<Utc>,
}

/// The header line that opens every data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// Repository name; also the id prefix for atoms minted here.
    pub repo_name: String,

    /// The writing program and version, for forensics.
    pub generator: String,

    /// When the data file was first created.
    pub created_at: DateTime<Utc>,
}

/// One line of a data file, discriminated by `_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum Record {
    /// File header; must be the first line of `data.jsonl`.
    Header(Header),
    /// A work item.
    Atom(Atom),
    /// A relationship.
    Bond(Bond),
    /// A comment.
    Comment(Comment),
}

/// A claim made while the ledger remote was unreachable, awaiting
/// reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineClaim {
    /// The claimed atom.
    pub atom_id: AtomId,
    /// Who claimed it.
    pub agent_id: String,
    /// When the local claim was recorded.
    pub claimed_at: DateTime<Utc>,
}

/// Data for creating a new atom.
#[derive(Debug, Clone)]
pub struct NewAtom {
    /// Title (required).
    pub title: String,
    /// Description.
    pub description: String,
    /// Priority 0-5.
    pub priority: u8,
    /// Issue type.
    pub issue_type: IssueType,
    /// Initial labels.
    pub labels: BTreeSet<String>,
    /// Initial assignee.
    pub assignee: Option<String>,
    /// Parent atom.
    pub parent_id: Option<AtomId>,
    /// Defer gate.
    pub defer_until: Option<DateTime<Utc>>,
    /// Initial metadata.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Store in the local-only ephemeral file instead of the synced file.
    pub ephemeral: bool,
}

impl NewAtom {
    /// Validate the new atom data.
    ///
    /// # Errors
    ///
    /// Returns a description of the violation (empty/over-long title,
    /// out-of-range priority).
    pub fn validate(&self) -> std::result::Result<(), String> {
        let trimmed = self.title.trim();
        if trimmed.is_empty() {
            return Err("title cannot be empty".to_string());
        }
        if trimmed.len() > MAX_TITLE_LENGTH {
            return Err(format!(
                "title cannot exceed {MAX_TITLE_LENGTH} characters (got {})",
                trimmed.len()
            ));
        }
        if self.priority > MAX_PRIORITY {
            return Err(format!(
                "priority must be in range 0-{MAX_PRIORITY} (got {})",
                self.priority
            ));
        }
        Ok(())
    }
}

impl Default for NewAtom {
    fn default() -> Self {
        Self {
            title: "Untitled".to_string(),
            description: String::new(),
            priority: 2,
            issue_type: IssueType::Task,
            labels: BTreeSet::new(),
            assignee: None,
            parent_id: None,
            defer_until: None,
            metadata: serde_json::Map::new(),
            ephemeral: false,
        }
    }
}

/// Data for updating an existing atom.
///
/// Clearable fields use the double-`Option` pattern: `None` leaves the
/// field unchanged, `Some(None)` clears it, `Some(Some(v))` sets it.
#[derive(Debug, Clone, Default)]
pub struct AtomUpdate {
    /// New title.
    pub title: Option<String>,
    /// New description.
    pub description: Option<String>,
    /// New status; checked against the registry's transition table.
    pub status: Option<Status>,
    /// New issue type.
    pub issue_type: Option<IssueType>,
    /// New priority.
    pub priority: Option<u8>,
    /// Set or clear the assignee.
    pub assignee: Option<Option<String>>,
    /// Set or clear the defer gate.
    pub defer_until: Option<Option<DateTime<Utc>>>,
    /// Set or clear the close reason.
    pub close_reason: Option<Option<String>>,
    /// Replace the label set.
    pub labels: Option<BTreeSet<String>>,
    /// Merge these keys into metadata (`null` values delete keys).
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Filter for atom queries.
#[derive(Debug, Clone, Default)]
pub struct AtomFilter {
    /// Only this status.
    pub status: Option<Status>,
    /// Only this issue type.
    pub issue_type: Option<IssueType>,
    /// Only this assignee.
    pub assignee: Option<String>,
    /// Only atoms carrying every one of these labels.
    pub labels: Vec<String>,
    /// Only this exact priority.
    pub priority: Option<u8>,
    /// Include abstract types (epic, formula) in readiness results.
    pub include_abstract: bool,
    /// Cap the number of results.
    pub limit: Option<usize>,
}

impl AtomFilter {
    /// Whether the atom passes every set clause.
    ///
    /// `include_abstract` is not checked here; it gates readiness
    /// specifically and is applied by the readiness calculator.
    #[must_use]
    pub fn matches(&self, atom: &Atom) -> bool {
        if let Some(status) = self.status {
            if atom.status != status {
                return false;
            }
        }
        if let Some(issue_type) = self.issue_type {
            if atom.issue_type != issue_type {
                return false;
            }
        }
        if let Some(assignee) = &self.assignee {
            if atom.assignee.as_ref() != Some(assignee) {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if atom.priority != priority {
                return false;
            }
        }
        self.labels.iter().all(|l| atom.labels.contains(l))
    }
}

/// Ordering applied to readiness results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortPolicy {
    /// Priority ascending, then age (oldest first).
    #[default]
    Priority,
    /// Age only, oldest first.
    Oldest,
    /// Priority buckets with an age tie-break inside each bucket.
    Hybrid,
}

/// Behavior flags attached to a status variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags {
    /// A blocking status keeps the atom out of the ready set.
    pub is_blocking: bool,
}

/// Runtime registry of status behavior: per-status flags plus the allowed
/// transition table.
///
/// Ships with the built-in table; [`StatusRegistry::set_flags`] and
/// [`StatusRegistry::allow_transition`] adjust it at runtime.
#[derive(Debug, Clone)]
pub struct StatusRegistry {
    flags: HashMap<Status, StatusFlags>,
    transitions: HashMap<Status, BTreeSet<Status>>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        use Status::{Blocked, Closed, Deferred, Discard, InProgress, Open};

        let mut flags = HashMap::new();
        flags.insert(Open, StatusFlags { is_blocking: false });
        for status in [InProgress, Blocked, Deferred, Closed, Discard] {
            flags.insert(status, StatusFlags { is_blocking: true });
        }

        let mut transitions: HashMap<Status, BTreeSet<Status>> = HashMap::new();
        let mut allow = |from: Status, to: &[Status]| {
            transitions.insert(from, to.iter().copied().collect());
        };
        allow(Open, &[InProgress, Blocked, Deferred, Closed, Discard]);
        allow(InProgress, &[Open, Blocked, Deferred, Closed, Discard]);
        allow(Blocked, &[Open, InProgress, Closed, Discard]);
        allow(Deferred, &[Open, InProgress, Closed, Discard]);
        allow(Closed, &[Open, Discard]);
        allow(Discard, &[Open]);

        Self { flags, transitions }
    }
}

impl StatusRegistry {
    /// Whether this status keeps an atom out of the ready set.
    #[must_use]
    pub fn is_blocking(&self, status: Status) -> bool {
        self.flags.get(&status).is_none_or(|f| f.is_blocking)
    }

    /// Whether `from -> to` is a legal transition.
    ///
    /// Same-status "transitions" are always legal (idempotent updates).
    #[must_use]
    pub fn can_transition(&self, from: Status, to: Status) -> bool {
        from == to
            || self
                .transitions
                .get(&from)
                .is_some_and(|set| set.contains(&to))
    }

    /// Replace the flags for a status.
    pub fn set_flags(&mut self, status: Status, flags: StatusFlags) {
        self.flags.insert(status, flags);
    }

    /// Add a legal transition.
    pub fn allow_transition(&mut self, from: Status, to: Status) {
        self.transitions.entry(from).or_default().insert(to);
    }
}

/// Runtime registry of issue-type behavior.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    abstract_types: BTreeSet<IssueType>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self {
            abstract_types: [IssueType::Epic, IssueType::Formula].into_iter().collect(),
        }
    }
}

impl TypeRegistry {
    /// Whether this type is abstract (cannot be claimed or directly closed).
    #[must_use]
    pub fn is_abstract(&self, issue_type: IssueType) -> bool {
        self.abstract_types.contains(&issue_type)
    }

    /// Mark or unmark a type as abstract.
    pub fn set_abstract(&mut self, issue_type: IssueType, is_abstract: bool) {
        if is_abstract {
            self.abstract_types.insert(issue_type);
        } else {
            self.abstract_types.remove(&issue_type);
        }
    }
}
