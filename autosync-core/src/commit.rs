//! SHA-guarded commit of the current selection to the remote file store.
//!
//! One attempt is:
//!
//! 1. serialize the selected entries (catalog order) to a compact JSON array
//! 2. base64-encode it
//! 3. read the remote file for its current sha (`NotFound` means create)
//! 4. write `{message, content, sha}` once
//!
//! The read always completes before the write is issued. Nothing is retried,
//! and a write rejected because the sha moved on is reported like any other
//! write failure.

use std::sync::Arc;

use autosync_common::SelectableItem;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::github::{CommitRequest, FileStore, RemoteFileSnapshot, StoreError, WriteReceipt};

/// One element of the persisted selection file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistEntry {
    pub id: String,
    pub title: String,
}

impl From<&SelectableItem> for PlaylistEntry {
    fn from(item: &SelectableItem) -> Self {
        Self {
            id: item.id.clone(),
            title: item.title.clone(),
        }
    }
}

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("failed to encode selection: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to read current file: {0}")]
    Read(StoreError),
    #[error("failed to write file: {0}")]
    Write(StoreError),
}

/// Terminal outcome of a commit attempt, as published to status observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitStatus {
    Succeeded { sha: String },
    Failed { message: String },
}

impl CommitStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, CommitStatus::Succeeded { .. })
    }
}

impl std::fmt::Display for CommitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommitStatus::Succeeded { .. } => write!(f, "Playlists synced successfully!"),
            CommitStatus::Failed { message } => write!(f, "Error syncing playlists: {message}"),
        }
    }
}

/// Canonical file body: compact JSON array, base64 with no line wrapping.
pub fn encode_entries(entries: &[PlaylistEntry]) -> Result<String, serde_json::Error> {
    let json = serde_json::to_vec(entries)?;
    Ok(STANDARD.encode(json))
}

/// Parse a previously persisted selection file.
pub fn decode_entries(snapshot: &RemoteFileSnapshot) -> Result<Vec<PlaylistEntry>, serde_json::Error> {
    serde_json::from_slice(&snapshot.content)
}

pub struct CommitCoordinator {
    store: Arc<dyn FileStore>,
    path: String,
    message: String,
    status_tx: broadcast::Sender<CommitStatus>,
}

impl CommitCoordinator {
    pub fn new(store: Arc<dyn FileStore>, path: impl Into<String>, message: impl Into<String>) -> Self {
        let (status_tx, _) = broadcast::channel(16);
        Self {
            store,
            path: path.into(),
            message: message.into(),
            status_tx,
        }
    }

    /// Subscribe to commit status events.
    pub fn subscribe(&self) -> broadcast::Receiver<CommitStatus> {
        self.status_tx.subscribe()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Run one commit attempt and publish its outcome.
    pub async fn commit(&self, entries: &[PlaylistEntry]) -> CommitStatus {
        let status = match self.attempt(entries).await {
            Ok(receipt) => {
                info!(
                    "Committed {} playlist(s) to {} (sha {})",
                    entries.len(),
                    self.path,
                    receipt.sha
                );
                CommitStatus::Succeeded { sha: receipt.sha }
            }
            Err(e) => {
                warn!("Commit to {} failed: {e}", self.path);
                CommitStatus::Failed {
                    message: e.to_string(),
                }
            }
        };
        self.publish(status.clone());
        status
    }

    fn publish(&self, status: CommitStatus) {
        let _ = self.status_tx.send(status);
    }

    async fn attempt(&self, entries: &[PlaylistEntry]) -> Result<WriteReceipt, CommitError> {
        let content = encode_entries(entries)?;

        let sha = match self.store.read(&self.path).await {
            Ok(snapshot) => snapshot.sha,
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(CommitError::Read(e)),
        };

        let request = CommitRequest {
            message: self.message.clone(),
            content,
            sha,
        };

        self.store
            .write(&self.path, &request)
            .await
            .map_err(CommitError::Write)
    }
}
