//! Ledger claim protocol against real git repositories.
//!
//! Each test builds a repository with a local bare "remote" and drives
//! the orphan-branch claim protocol end to end: setup, idempotent
//! re-claim, cross-agent conflict, release, and stale-claim reaping.

mod common;

use chrono::{Duration, Utc};
use common::{add_bare_remote, clone_repo, commit_all, init_repo};
use eluent::config::UserContext;
use eluent::domain::{AtomId, NewAtom, Status};
use eluent::store::RecordStore;
use eluent::sync::{ClaimOutcome, LedgerConfig, LedgerSyncer};
use std::path::Path;
use tempfile::tempdir;

const BRANCH: &str = "eluent-sync";

/// Build a repo with one atom, a bare remote, and a ready ledger syncer.
async fn ledger_world() -> (
    tempfile::TempDir, // repo
    tempfile::TempDir, // bare remote
    tempfile::TempDir, // user data root
    LedgerSyncer,
    AtomId,
) {
    let repo = tempdir().unwrap();
    let bare = tempdir().unwrap();
    let data = tempdir().unwrap();

    init_repo(repo.path());
    let store = RecordStore::init(repo.path(), "ledger").await.unwrap();
    let atom = store
        .create_atom(NewAtom {
            title: "Claimable work".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    commit_all(repo.path(), "initial records");
    add_bare_remote(repo.path(), &bare.path().join("origin.git"));

    let syncer = syncer_for(repo.path(), data.path());
    syncer.setup().await.unwrap();

    (repo, bare, data, syncer, atom.id)
}

fn syncer_for(repo: &Path, data_root: &Path) -> LedgerSyncer {
    let user = UserContext::new(Some(data_root));
    LedgerSyncer::new(repo.to_path_buf(), LedgerConfig::new(BRANCH), &user).unwrap()
}

#[tokio::test]
async fn setup_creates_orphan_branch_and_worktree() {
    let (repo, _bare, _data, syncer, _atom) = ledger_world().await;

    // The branch exists and shares no history with main.
    let ledger_root = common::git(repo.path(), &["rev-list", "--max-parents=0", BRANCH]);
    let main_root = common::git(repo.path(), &["rev-list", "--max-parents=0", "main"]);
    assert_ne!(ledger_root, main_root);

    assert!(syncer.available().await.unwrap());
    assert!(syncer.online().await.unwrap());
    assert!(syncer.healthy().await.unwrap());
    assert!(!syncer.is_stale().await.unwrap());

    // The worktree carries the seeded data file.
    assert!(syncer
        .worktree_path()
        .join(".eluent")
        .join("data.jsonl")
        .exists());
}

#[tokio::test]
async fn claim_succeeds_and_is_idempotent() {
    let (_repo, _bare, _data, syncer, atom_id) = ledger_world().await;

    let first = syncer.claim_and_push(&atom_id, "agent-x").await.unwrap();
    assert_eq!(first, ClaimOutcome::Success { retries: 0 });

    // Re-claim by the same agent: success again, no second ledger commit.
    let commits_before = common::git(
        syncer.worktree_path(),
        &["rev-list", "--count", "HEAD"],
    );
    let second = syncer.claim_and_push(&atom_id, "agent-x").await.unwrap();
    assert_eq!(second, ClaimOutcome::Success { retries: 0 });
    let commits_after = common::git(
        syncer.worktree_path(),
        &["rev-list", "--count", "HEAD"],
    );
    assert_eq!(commits_before, commits_after);
}

#[tokio::test]
async fn competing_agent_sees_the_conflict() {
    let (_repo, bare, _data, syncer_a, atom_id) = ledger_world().await;

    // Agent A claims through the first checkout.
    let outcome = syncer_a.claim_and_push(&atom_id, "agent-a").await.unwrap();
    assert_eq!(outcome, ClaimOutcome::Success { retries: 0 });

    // Agent B works from an independent clone with its own data root.
    let repo_b = tempdir().unwrap();
    let data_b = tempdir().unwrap();
    clone_repo(&bare.path().join("origin.git"), repo_b.path());
    let syncer_b = syncer_for(repo_b.path(), data_b.path());
    syncer_b.setup().await.unwrap();

    let outcome = syncer_b.claim_and_push(&atom_id, "agent-b").await.unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Conflict {
            owner: "agent-a".to_string()
        }
    );
}

#[tokio::test]
async fn closed_atoms_are_rejected() {
    let (_repo, _bare, _data, syncer, atom_id) = ledger_world().await;

    // Close the atom in the ledger worktree, then try to claim it.
    let (worktree_store, _) = RecordStore::open(syncer.worktree_path()).await.unwrap();
    worktree_store.close_atom(&atom_id, None).await.unwrap();
    syncer.push("eluent: close for test").await.unwrap();

    let outcome = syncer.claim_and_push(&atom_id, "agent-x").await.unwrap();
    assert_eq!(
        outcome,
        ClaimOutcome::Rejected {
            reason: "atom is closed".to_string()
        }
    );
}

#[tokio::test]
async fn release_claim_is_idempotent() {
    let (_repo, _bare, _data, syncer, atom_id) = ledger_world().await;

    syncer.claim_and_push(&atom_id, "agent-x").await.unwrap();
    syncer.release_claim(&atom_id).await.unwrap();

    let (worktree_store, _) = RecordStore::open(syncer.worktree_path()).await.unwrap();
    let atom = worktree_store.get_atom(&atom_id).await.unwrap();
    assert_eq!(atom.status, Status::Open);
    assert!(atom.assignee.is_none());

    // Releasing again is a quiet success.
    syncer.release_claim(&atom_id).await.unwrap();
}

#[tokio::test]
async fn heartbeat_touches_the_claim() {
    let (_repo, _bare, _data, syncer, atom_id) = ledger_world().await;

    syncer.claim_and_push(&atom_id, "agent-x").await.unwrap();
    let (worktree_store, _) = RecordStore::open(syncer.worktree_path()).await.unwrap();
    let before = worktree_store.get_atom(&atom_id).await.unwrap().updated_at;

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    syncer.heartbeat(&atom_id).await.unwrap();

    let (worktree_store, _) = RecordStore::open(syncer.worktree_path()).await.unwrap();
    let after = worktree_store.get_atom(&atom_id).await.unwrap().updated_at;
    assert!(after > before);
}

#[tokio::test]
async fn stale_claims_are_reaped_in_one_batch() {
    let (_repo, bare, _data, syncer, atom_id) = ledger_world().await;

    syncer.claim_and_push(&atom_id, "agent-gone").await.unwrap();

    // A threshold in the future makes the fresh claim count as stale,
    // standing in for an hour-old claim without clock games.
    let released = syncer
        .release_stale_claims(Utc::now() + Duration::hours(1))
        .await
        .unwrap();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].0, atom_id);
    assert_eq!(released[0].1.as_deref(), Some("agent-gone"));

    // The release is visible to a fresh clone after a pull.
    let repo_b = tempdir().unwrap();
    let data_b = tempdir().unwrap();
    clone_repo(&bare.path().join("origin.git"), repo_b.path());
    let syncer_b = syncer_for(repo_b.path(), data_b.path());
    syncer_b.setup().await.unwrap();
    syncer_b.pull().await.unwrap();

    let (store_b, _) = RecordStore::open(syncer_b.worktree_path()).await.unwrap();
    let atom = store_b.get_atom(&atom_id).await.unwrap();
    assert_eq!(atom.status, Status::Open);
    assert!(atom.assignee.is_none());

    // The batch message names the released claim.
    let message = common::git(
        syncer.worktree_path(),
        &["log", "-1", "--format=%s", BRANCH],
    );
    assert!(message.contains("stale claim"));
    assert!(message.contains("agent-gone"));
}

#[tokio::test]
async fn stale_worktree_is_recovered_transparently() {
    let (_repo, _bare, _data, syncer, atom_id) = ledger_world().await;

    // Blow the worktree away behind the syncer's back.
    std::fs::remove_dir_all(syncer.worktree_path()).unwrap();
    assert!(syncer.is_stale().await.unwrap());

    // The next claim recovers the worktree and proceeds.
    let outcome = syncer.claim_and_push(&atom_id, "agent-x").await.unwrap();
    assert_eq!(outcome, ClaimOutcome::Success { retries: 0 });
    assert!(!syncer.is_stale().await.unwrap());
}

#[tokio::test]
async fn sync_to_main_reflects_ledger_state() {
    let (repo, _bare, _data, syncer, atom_id) = ledger_world().await;

    syncer.claim_and_push(&atom_id, "agent-x").await.unwrap();
    syncer.sync_to_main().unwrap();

    let (main_store, _) = RecordStore::open(repo.path()).await.unwrap();
    let atom = main_store.get_atom(&atom_id).await.unwrap();
    assert_eq!(atom.status, Status::InProgress);
    assert_eq!(atom.assignee.as_deref(), Some("agent-x"));
}

#[tokio::test]
async fn teardown_leaves_branches_alone() {
    let (repo, _bare, _data, syncer, _atom) = ledger_world().await;

    syncer.teardown().await.unwrap();
    assert!(!syncer.worktree_path().exists());

    // Local and remote ledger branches both survive teardown.
    common::git(repo.path(), &["rev-parse", "--verify", BRANCH]);
    let remote = common::git(repo.path(), &["ls-remote", "origin", BRANCH]);
    assert!(!remote.is_empty());
}
