//! Shared helpers for integration tests that need real git repositories.
//!
//! "Remotes" are local bare repositories; the git file transport keeps
//! everything offline and deterministic.

use std::path::Path;
use std::process::Command;

/// Run a git command in a directory, panicking with context on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(args)
        .output()
        .expect("failed to spawn git");
    assert!(
        output.status.success(),
        "git {:?} in {} failed: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a repository on branch `main` with a test identity.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "--quiet", "-b", "main"]);
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test Agent"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// Stage everything and commit.
pub fn commit_all(dir: &Path, message: &str) {
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "--quiet", "-m", message]);
}

/// Create a bare repository at `bare`, wire it up as `origin` of `repo`,
/// and push `main`.
pub fn add_bare_remote(repo: &Path, bare: &Path) {
    std::fs::create_dir_all(bare).unwrap();
    let output = Command::new("git")
        .arg("init")
        .arg("--bare")
        .arg("--quiet")
        .arg(bare)
        .output()
        .expect("failed to spawn git");
    assert!(output.status.success());

    git(repo, &["remote", "add", "origin", &bare.to_string_lossy()]);
    git(repo, &["push", "--quiet", "-u", "origin", "main"]);
}

/// Clone `bare` into `dest` with a test identity.
pub fn clone_repo(bare: &Path, dest: &Path) {
    let output = Command::new("git")
        .arg("clone")
        .arg("--quiet")
        .arg(bare)
        .arg(dest)
        .output()
        .expect("failed to spawn git");
    assert!(
        output.status.success(),
        "clone failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    git(dest, &["config", "user.email", "test@example.com"]);
    git(dest, &["config", "user.name", "Test Agent"]);
    git(dest, &["config", "commit.gpgsign", "false"]);
}
