//! In-memory fakes of the remote collaborators, shared by unit and
//! integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::auth::{Identity, IdentityError, IdentityStore};
use crate::github::{CommitRequest, FileStore, RemoteFileSnapshot, StoreError, WriteReceipt};
use crate::oauth::OAuthTokens;
use crate::token::{AccessToken, TokenProvider};
use crate::youtube::{FetchError, PlaylistCatalog, PlaylistSummary, VideoSummary};

pub fn test_identity(scopes: &[&str]) -> Identity {
    Identity {
        account: "listener@example.com".to_string(),
        tokens: OAuthTokens {
            access_token: "initial-access".to_string(),
            refresh_token: Some("refresh-123".to_string()),
            expires_at: None,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            email: Some("listener@example.com".to_string()),
        },
    }
}

pub fn playlist(id: &str, title: &str) -> PlaylistSummary {
    PlaylistSummary {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
    }
}

pub fn video(id: &str, title: &str) -> VideoSummary {
    VideoSummary {
        id: id.to_string(),
        title: title.to_string(),
        description: String::new(),
        video_id: format!("v-{id}"),
    }
}

pub struct MemoryIdentityStore {
    identity: Mutex<Option<Identity>>,
    fail: bool,
}

impl MemoryIdentityStore {
    pub fn empty() -> Self {
        Self {
            identity: Mutex::new(None),
            fail: false,
        }
    }

    pub fn with(identity: Identity) -> Self {
        Self {
            identity: Mutex::new(Some(identity)),
            fail: false,
        }
    }

    /// Every load fails as if the stored JSON were corrupt.
    pub fn failing() -> Self {
        Self {
            identity: Mutex::new(None),
            fail: true,
        }
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn load(&self) -> Result<Option<Identity>, IdentityError> {
        if self.fail {
            let err = serde_json::from_str::<Identity>("{").unwrap_err();
            return Err(IdentityError::Corrupt(err));
        }
        Ok(self.identity.lock().unwrap().clone())
    }

    fn save(&self, identity: &Identity) -> Result<(), IdentityError> {
        *self.identity.lock().unwrap() = Some(identity.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), IdentityError> {
        *self.identity.lock().unwrap() = None;
        Ok(())
    }
}

/// Hands out a fixed token (or nothing) and counts exchanges.
pub struct StaticTokenProvider {
    token: Option<String>,
    calls: AtomicUsize,
}

impl StaticTokenProvider {
    pub fn new(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            token: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, _identity: &Identity) -> Option<AccessToken> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.as_deref().map(AccessToken::new)
    }
}

/// Catalog with canned playlists and per-playlist items.
pub struct FakeCatalog {
    playlists: Vec<PlaylistSummary>,
    items: HashMap<String, Vec<VideoSummary>>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeCatalog {
    pub fn new(playlists: Vec<PlaylistSummary>) -> Self {
        Self {
            playlists,
            items: HashMap::new(),
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn with_items(mut self, playlist_id: &str, items: Vec<VideoSummary>) -> Self {
        self.items.insert(playlist_id.to_string(), items);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(FetchError::Status {
                status: 503,
                body: "backend unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlaylistCatalog for FakeCatalog {
    async fn fetch_playlists(
        &self,
        _token: &AccessToken,
    ) -> Result<Vec<PlaylistSummary>, FetchError> {
        self.check()?;
        Ok(self.playlists.clone())
    }

    async fn fetch_playlist_items(
        &self,
        _token: &AccessToken,
        playlist_id: &str,
    ) -> Result<Vec<VideoSummary>, FetchError> {
        self.check()?;
        Ok(self.items.get(playlist_id).cloned().unwrap_or_default())
    }
}

/// SHA-guarded in-memory file store with GitHub's conflict semantics:
/// updating needs the current sha (409 on mismatch), creating over an
/// existing file without one is rejected (422).
#[derive(Default)]
pub struct MemoryFileStore {
    files: Mutex<HashMap<String, RemoteFileSnapshot>>,
    writes: Mutex<Vec<CommitRequest>>,
    next_sha: AtomicUsize,
    read_failure: Mutex<Option<u16>>,
    move_sha_after_read: Mutex<bool>,
}

impl MemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn mint_sha(&self) -> String {
        format!("blob-{}", self.next_sha.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn seed(&self, path: &str, content: &[u8]) -> String {
        let sha = self.mint_sha();
        self.files.lock().unwrap().insert(
            path.to_string(),
            RemoteFileSnapshot {
                sha: Some(sha.clone()),
                content: content.to_vec(),
            },
        );
        sha
    }

    pub fn snapshot(&self, path: &str) -> Option<RemoteFileSnapshot> {
        self.files.lock().unwrap().get(path).cloned()
    }

    /// Every write request received, in order.
    pub fn writes(&self) -> Vec<CommitRequest> {
        self.writes.lock().unwrap().clone()
    }

    pub fn fail_reads_with(&self, status: u16) {
        *self.read_failure.lock().unwrap() = Some(status);
    }

    /// Simulate a concurrent writer landing between the next read and write.
    pub fn move_sha_after_read(&self) {
        *self.move_sha_after_read.lock().unwrap() = true;
    }
}

#[async_trait]
impl FileStore for MemoryFileStore {
    async fn read(&self, path: &str) -> Result<RemoteFileSnapshot, StoreError> {
        if let Some(status) = *self.read_failure.lock().unwrap() {
            return Err(StoreError::Status {
                status,
                body: "read failed".to_string(),
            });
        }

        let snapshot = self
            .snapshot(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        let mut moved = self.move_sha_after_read.lock().unwrap();
        if *moved {
            *moved = false;
            let sha = self.mint_sha();
            if let Some(file) = self.files.lock().unwrap().get_mut(path) {
                file.sha = Some(sha);
            }
        }
        Ok(snapshot)
    }

    async fn write(
        &self,
        path: &str,
        request: &CommitRequest,
    ) -> Result<WriteReceipt, StoreError> {
        self.writes.lock().unwrap().push(request.clone());

        let content = crate::github::decode_content(&request.content)?;
        let mut files = self.files.lock().unwrap();
        let current = files.get(path).and_then(|f| f.sha.clone());
        match (&current, &request.sha) {
            (Some(current), Some(given)) if current != given => {
                return Err(StoreError::Status {
                    status: 409,
                    body: format!("{path} does not match {given}"),
                });
            }
            (Some(_), None) => {
                return Err(StoreError::Status {
                    status: 422,
                    body: "\"sha\" wasn't supplied".to_string(),
                });
            }
            (None, Some(_)) => {
                return Err(StoreError::Status {
                    status: 422,
                    body: format!("{path} does not exist"),
                });
            }
            _ => {}
        }

        let sha = self.mint_sha();
        files.insert(
            path.to_string(),
            RemoteFileSnapshot {
                sha: Some(sha.clone()),
                content,
            },
        );
        Ok(WriteReceipt {
            sha,
            commit_sha: None,
        })
    }
}
