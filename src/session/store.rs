//! Checksum-paired session status store (C3).
//!
//! `task-status.json` carries the run's mutable state; `task-status.json.sha256`
//! is a sidecar digest of its exact bytes. Every write recomputes and rewrites
//! both files atomically (write to a temp file, then rename); every read
//! recomputes the digest and refuses to return data whose sidecar doesn't
//! match, since a manual edit of one without the other is exactly the kind
//! of tampering spec.md §4.3 exists to catch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use super::digest::digest_hex;
use super::token::SessionToken;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("checksum mismatch: expected {expected}, found {actual}")]
    TamperingDetected { expected: String, actual: String },
    #[error("session store not initialized at {0}")]
    NotFound(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskState {
    pub passes: bool,
    #[serde(default)]
    pub last_phase: Option<String>,
    #[serde(default)]
    pub iteration: u32,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Reason the task's last attempt failed, if it has — cleared once the
    /// task passes.
    #[serde(default)]
    pub last_failure: Option<String>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            passes: false,
            last_phase: None,
            iteration: 0,
            started_at: None,
            completed_at: None,
            last_failure: None,
        }
    }
}

/// The full persisted state of one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskStatus {
    pub session_token: String,
    pub started_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub current_task_id: Option<String>,
    /// `BTreeMap` so on-disk key order is stable regardless of insertion
    /// order — required for the digest to be reproducible across writers.
    pub tasks: BTreeMap<String, TaskState>,
}

impl TaskStatus {
    pub fn new(token: &SessionToken) -> Self {
        let now = Utc::now();
        Self {
            session_token: token.to_string(),
            started_at: now,
            last_updated: now,
            current_task_id: None,
            tasks: BTreeMap::new(),
        }
    }

    /// Canonical on-disk form: sorted keys (via `BTreeMap`), no incidental
    /// whitespace, so two writers of the same state produce identical bytes.
    fn to_canonical_bytes(&self) -> Result<Vec<u8>, SessionError> {
        Ok(serde_json::to_vec(self)?)
    }
}

pub struct SessionStore {
    status_path: PathBuf,
    digest_path: PathBuf,
    lock: Mutex<()>,
}

impl SessionStore {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        let run_dir = run_dir.into();
        Self {
            status_path: run_dir.join("task-status.json"),
            digest_path: run_dir.join("task-status.json.sha256"),
            lock: Mutex::new(()),
        }
    }

    pub async fn init(&self, token: &SessionToken) -> Result<TaskStatus, SessionError> {
        let status = TaskStatus::new(token);
        self.write(&status).await?;
        Ok(status)
    }

    pub async fn write(&self, status: &TaskStatus) -> Result<(), SessionError> {
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.status_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = status.to_canonical_bytes()?;
        let digest = digest_hex(&bytes);

        let status_tmp = self.status_path.with_extension("json.tmp");
        let digest_tmp = self.digest_path.with_extension("sha256.tmp");
        tokio::fs::write(&status_tmp, &bytes).await?;
        tokio::fs::write(&digest_tmp, digest.as_bytes()).await?;
        tokio::fs::rename(&status_tmp, &self.status_path).await?;
        tokio::fs::rename(&digest_tmp, &self.digest_path).await?;
        Ok(())
    }

    /// Read and verify the stored status, failing closed (spec.md §4.3: a
    /// missing or mismatched digest is treated as tampering, never ignored).
    pub async fn read(&self) -> Result<TaskStatus, SessionError> {
        let _guard = self.lock.lock().await;
        if !self.status_path.exists() {
            return Err(SessionError::NotFound(self.status_path.clone()));
        }
        let bytes = tokio::fs::read(&self.status_path).await?;
        let expected = tokio::fs::read_to_string(&self.digest_path)
            .await
            .map_err(|_| SessionError::TamperingDetected {
                expected: "<missing digest sidecar>".into(),
                actual: digest_hex(&bytes),
            })?;
        let expected = expected.trim().to_string();
        let actual = digest_hex(&bytes);
        if expected != actual {
            return Err(SessionError::TamperingDetected { expected, actual });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn status_path(&self) -> &Path {
        &self.status_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn init_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let token = SessionToken::generate();
        let status = store.init(&token).await.unwrap();

        let read_back = store.read().await.unwrap();
        assert_eq!(read_back, status);
    }

    #[tokio::test]
    async fn write_then_read_survives_mutation() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let token = SessionToken::generate();
        let mut status = store.init(&token).await.unwrap();

        status.current_task_id = Some("T-001".into());
        status.tasks.insert(
            "T-001".into(),
            TaskState {
                passes: true,
                last_phase: Some("review".into()),
                iteration: 3,
                ..Default::default()
            },
        );
        store.write(&status).await.unwrap();

        let read_back = store.read().await.unwrap();
        assert_eq!(read_back.current_task_id.as_deref(), Some("T-001"));
        assert_eq!(read_back.tasks["T-001"].iteration, 3);
    }

    #[tokio::test]
    async fn tampered_status_file_fails_closed() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let token = SessionToken::generate();
        store.init(&token).await.unwrap();

        // mutate the status file without touching the digest sidecar
        let mut status: TaskStatus =
            serde_json::from_slice(&tokio::fs::read(store.status_path()).await.unwrap()).unwrap();
        status.current_task_id = Some("T-999".into());
        tokio::fs::write(store.status_path(), serde_json::to_vec(&status).unwrap())
            .await
            .unwrap();

        let err = store.read().await.unwrap_err();
        assert!(matches!(err, SessionError::TamperingDetected { .. }));
    }

    #[tokio::test]
    async fn missing_digest_sidecar_fails_closed() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let token = SessionToken::generate();
        store.init(&token).await.unwrap();
        tokio::fs::remove_file(dir.path().join("task-status.json.sha256"))
            .await
            .unwrap();

        let err = store.read().await.unwrap_err();
        assert!(matches!(err, SessionError::TamperingDetected { .. }));
    }

    #[tokio::test]
    async fn read_before_init_is_not_found() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let err = store.read().await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }
}
