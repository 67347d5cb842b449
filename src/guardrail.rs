//! Guardrail Enforcer (C5): snapshots the worktree before the test-writing
//! phase, and after the agent runs reverts anything written outside the
//! configured allow-list.
//!
//! Grounded in `src/loop/engine.rs`'s `git status --porcelain` based change
//! detection, generalized from "read changed files for a prompt" to
//! "snapshot, diff, and selectively revert". Falls back to a `walkdir`
//! content-hash snapshot when git isn't available, since spec.md §4.5
//! requires the guardrail to function without version control.
//!
//! Emits no events itself — the task loop (C8) emits `guardrail.revert`
//! for each path this module reports, since only C8 knows the task id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use glob::Pattern;
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum GuardrailError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A change detected between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Added(PathBuf),
    Modified(PathBuf),
}

impl Change {
    pub fn path(&self) -> &Path {
        match self {
            Change::Added(p) | Change::Modified(p) => p,
        }
    }
}

/// A point-in-time record of file contents under a worktree, used to compute
/// what an agent turn actually changed.
pub struct Snapshot {
    /// Absolute path -> content hash, for files that existed at snapshot time.
    contents: HashMap<PathBuf, String>,
}

impl Snapshot {
    /// Prefer `git status --porcelain` (cheap, ignores `.gitignore`d files);
    /// fall back to a full content hash walk when git isn't on PATH or the
    /// directory isn't a repo.
    pub async fn capture(worktree: &Path) -> Result<Self, GuardrailError> {
        if let Some(snapshot) = Self::capture_via_git(worktree).await {
            return Ok(snapshot);
        }
        debug!("git unavailable, falling back to walkdir content hashing");
        Self::capture_via_walk(worktree)
    }

    async fn capture_via_git(worktree: &Path) -> Option<Self> {
        let output = tokio::process::Command::new("git")
            .args(["ls-files", "-z"])
            .current_dir(worktree)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let mut contents = HashMap::new();
        for rel in output.stdout.split(|b| *b == 0).filter(|s| !s.is_empty()) {
            let rel = String::from_utf8_lossy(rel).to_string();
            let abs = worktree.join(&rel);
            if let Ok(bytes) = std::fs::read(&abs) {
                contents.insert(abs, crate::session::digest_hex(&bytes));
            }
        }
        Some(Self { contents })
    }

    fn capture_via_walk(worktree: &Path) -> Result<Self, GuardrailError> {
        let mut contents = HashMap::new();
        for entry in WalkDir::new(worktree)
            .into_iter()
            .filter_entry(|e| !is_vcs_dir(e.path()))
        {
            let entry = entry.map_err(std::io::Error::from)?;
            if entry.file_type().is_file() {
                let bytes = std::fs::read(entry.path())?;
                contents.insert(entry.path().to_path_buf(), crate::session::digest_hex(&bytes));
            }
        }
        Ok(Self { contents })
    }

    /// Diff `self` (before) against `after`, returning every added or
    /// modified path relative to `worktree`.
    pub fn diff_against(&self, after: &Snapshot) -> Vec<Change> {
        let mut changes = Vec::new();
        for (path, hash) in &after.contents {
            match self.contents.get(path) {
                None => changes.push(Change::Added(path.clone())),
                Some(before_hash) if before_hash != hash => changes.push(Change::Modified(path.clone())),
                _ => {}
            }
        }
        changes
    }

    /// Pre-agent content of `path`, if it existed at snapshot time.
    fn previous_content(&self, path: &Path) -> Option<Vec<u8>> {
        if !self.contents.contains_key(path) {
            return None;
        }
        std::fs::read(path).ok()
    }
}

fn is_vcs_dir(path: &Path) -> bool {
    path.file_name().map(|n| n == ".git").unwrap_or(false)
}

/// A glob-pattern allow-list for the test-writing phase.
pub struct AllowList {
    globs: Vec<String>,
    patterns: Vec<Pattern>,
}

impl AllowList {
    pub fn new(globs: &[String]) -> Self {
        let patterns = globs.iter().filter_map(|g| Pattern::new(g).ok()).collect();
        Self {
            globs: globs.to_vec(),
            patterns,
        }
    }

    /// Sensible defaults: common test directories plus `.test.`/`.spec.` suffixes.
    pub fn defaults() -> Self {
        Self::new(&[
            "tests/**".into(),
            "test/**".into(),
            "**/*.test.*".into(),
            "**/*.spec.*".into(),
            "**/tests/**".into(),
        ])
    }

    pub fn allows(&self, relative_path: &Path) -> bool {
        self.patterns.iter().any(|p| p.matches_path(relative_path))
    }

    /// The raw glob strings this allow-list was built from, for embedding in
    /// the test-writing prompt.
    pub fn patterns_display(&self) -> Vec<String> {
        self.globs.clone()
    }
}

/// Compare before/after snapshots, revert anything outside `allow_list`, and
/// report what was reverted and why. `worktree` is used to compute paths
/// relative to it for allow-list matching.
pub async fn enforce(
    worktree: &Path,
    before: &Snapshot,
    after: &Snapshot,
    allow_list: &AllowList,
) -> Result<Vec<(PathBuf, String)>, GuardrailError> {
    let mut reverted = Vec::new();
    for change in before.diff_against(after) {
        let path = change.path().to_path_buf();
        let relative = path.strip_prefix(worktree).unwrap_or(&path);
        if allow_list.allows(relative) {
            continue;
        }

        match &change {
            Change::Added(p) => {
                if let Err(e) = std::fs::remove_file(p) {
                    warn!(path = %p.display(), error = %e, "failed to revert added file");
                }
                reverted.push((path, "added file outside allow-list".to_string()));
            }
            Change::Modified(p) => {
                if let Some(original) = before.previous_content(p) {
                    if let Err(e) = std::fs::write(p, &original) {
                        warn!(path = %p.display(), error = %e, "failed to revert modified file");
                    }
                }
                reverted.push((path, "modified file outside allow-list".to_string()));
            }
        }
    }
    Ok(reverted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reverts_added_file_outside_allow_list() {
        let dir = tempdir().unwrap();
        let before = Snapshot::capture_via_walk(dir.path()).unwrap();

        std::fs::write(dir.path().join("src.rs"), "fn main() {}").unwrap();
        let after = Snapshot::capture_via_walk(dir.path()).unwrap();

        let allow_list = AllowList::defaults();
        let reverted = enforce(dir.path(), &before, &after, &allow_list).await.unwrap();

        assert_eq!(reverted.len(), 1);
        assert!(!dir.path().join("src.rs").exists());
    }

    #[tokio::test]
    async fn leaves_allow_listed_additions_in_place() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("tests")).unwrap();
        let before = Snapshot::capture_via_walk(dir.path()).unwrap();

        std::fs::write(dir.path().join("tests/new_test.rs"), "#[test] fn t() {}").unwrap();
        let after = Snapshot::capture_via_walk(dir.path()).unwrap();

        let allow_list = AllowList::defaults();
        let reverted = enforce(dir.path(), &before, &after, &allow_list).await.unwrap();

        assert!(reverted.is_empty());
        assert!(dir.path().join("tests/new_test.rs").exists());
    }

    #[tokio::test]
    async fn restores_modified_file_to_prior_content() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("src.rs"), "original").unwrap();
        let before = Snapshot::capture_via_walk(dir.path()).unwrap();

        std::fs::write(dir.path().join("src.rs"), "tampered by test-writing agent").unwrap();
        let after = Snapshot::capture_via_walk(dir.path()).unwrap();

        let allow_list = AllowList::defaults();
        let reverted = enforce(dir.path(), &before, &after, &allow_list).await.unwrap();

        assert_eq!(reverted.len(), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("src.rs")).unwrap(), "original");
    }

    #[test]
    fn allow_list_matches_common_test_suffixes() {
        let allow_list = AllowList::defaults();
        assert!(allow_list.allows(Path::new("tests/foo.rs")));
        assert!(allow_list.allows(Path::new("src/foo.spec.ts")));
        assert!(!allow_list.allows(Path::new("src/main.rs")));
    }
}
