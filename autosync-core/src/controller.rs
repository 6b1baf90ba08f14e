//! Session/synchronization controller.
//!
//! Wires the auth state machine, the token provider, the catalog client, the
//! selection store and the commit coordinator together. Every remote call is
//! raced against the caller-owned `CancellationToken`; once that scope is
//! cancelled, in-flight results are dropped instead of being applied.

use std::future::Future;
use std::sync::Arc;

use autosync_common::{SelectableItem, SelectionStore};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthSession, AuthSessionManager, IdentityError, IdentityStore};
use crate::commit::{CommitCoordinator, CommitStatus, PlaylistEntry};
use crate::config::SyncConfig;
use crate::github::FileStore;
use crate::oauth::{OAuthTokens, YOUTUBE_READONLY_SCOPE};
use crate::token::{AccessToken, TokenProvider};
use crate::youtube::{PlaylistCatalog, PlaylistSummary, VideoSummary};

/// External services the controller talks to.
pub struct Collaborators {
    pub identities: Arc<dyn IdentityStore>,
    pub tokens: Arc<dyn TokenProvider>,
    pub catalog: Arc<dyn PlaylistCatalog>,
    pub files: Arc<dyn FileStore>,
}

/// Videos of the playlist currently being previewed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreviewState {
    pub playlist_id: Option<String>,
    pub loading: bool,
    pub videos: Vec<VideoSummary>,
}

pub struct SyncController {
    auth: AuthSessionManager,
    tokens: Arc<dyn TokenProvider>,
    catalog: Arc<dyn PlaylistCatalog>,
    commits: CommitCoordinator,
    selection: watch::Sender<SelectionStore>,
    preview: watch::Sender<PreviewState>,
    scope: CancellationToken,
}

impl SyncController {
    pub fn new(config: SyncConfig, deps: Collaborators, scope: CancellationToken) -> Self {
        let (selection, _) = watch::channel(SelectionStore::new());
        let (preview, _) = watch::channel(PreviewState::default());
        Self {
            auth: AuthSessionManager::new(deps.identities, YOUTUBE_READONLY_SCOPE),
            tokens: deps.tokens,
            catalog: deps.catalog,
            commits: CommitCoordinator::new(deps.files, config.file_path, config.commit_message),
            selection,
            preview,
            scope,
        }
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Race `fut` against the scope. None if the scope ended first or
    /// while `fut` was completing.
    async fn scoped<F: Future>(&self, fut: F) -> Option<F::Output> {
        let out = tokio::select! {
            biased;
            _ = self.scope.cancelled() => None,
            out = fut => Some(out),
        };
        out.filter(|_| !self.scope.is_cancelled())
    }

    // -- Auth --

    /// Resolve the cached session and, when signed in, load the catalog.
    pub async fn start(&self) -> AuthSession {
        let session = self.auth.check_status();
        if matches!(session, AuthSession::Authenticated(_)) {
            self.load_playlists().await;
        }
        session
    }

    /// Re-read the cached identity without touching the network.
    pub fn check_status(&self) -> AuthSession {
        self.auth.check_status()
    }

    /// Hand over the tokens from a finished interactive sign-in.
    pub async fn complete_sign_in(&self, tokens: OAuthTokens) -> AuthSession {
        let session = self.auth.complete_sign_in(tokens);
        if matches!(session, AuthSession::Authenticated(_)) {
            self.load_playlists().await;
        }
        session
    }

    pub fn on_sign_in_failed(&self, message: impl Into<String>) {
        self.auth.on_sign_in_failed(message);
    }

    pub fn sign_out(&self) -> Result<(), IdentityError> {
        self.auth.sign_out()?;
        self.selection.send_modify(|store| store.replace_catalog(Vec::new()));
        self.preview.send_replace(PreviewState::default());
        Ok(())
    }

    pub fn auth_state(&self) -> AuthSession {
        self.auth.current()
    }

    pub fn subscribe_auth(&self) -> watch::Receiver<AuthSession> {
        self.auth.subscribe()
    }

    async fn access_token(&self) -> Option<AccessToken> {
        self.scoped(self.auth.access_token(self.tokens.as_ref()))
            .await
            .flatten()
    }

    // -- Catalog --

    /// Fetch the first page of playlists into the selection store.
    ///
    /// Without a token nothing is fetched. Fetch failures are logged and
    /// come back as an empty list, leaving the store as it was.
    pub async fn load_playlists(&self) -> Vec<PlaylistSummary> {
        let Some(token) = self.access_token().await else {
            debug!("No access token, skipping playlist fetch");
            return Vec::new();
        };

        let Some(result) = self.scoped(self.catalog.fetch_playlists(&token)).await else {
            info!("Scope ended, discarding playlist fetch");
            return Vec::new();
        };

        match result {
            Ok(playlists) => {
                info!("Fetched {} playlist(s)", playlists.len());
                self.selection.send_modify(|store| {
                    store.replace_catalog(
                        playlists
                            .iter()
                            .map(|p| SelectableItem::new(&p.id, &p.title)),
                    )
                });
                playlists
            }
            Err(e) => {
                warn!("Failed to fetch playlists: {e}");
                Vec::new()
            }
        }
    }

    /// Fetch the first page of videos in a playlist for preview.
    pub async fn preview(&self, playlist_id: &str) -> Vec<VideoSummary> {
        let previous = self.preview.send_replace(PreviewState {
            playlist_id: Some(playlist_id.to_string()),
            loading: true,
            videos: Vec::new(),
        });

        let videos = match self.access_token().await {
            Some(token) => self
                .scoped(self.catalog.fetch_playlist_items(&token, playlist_id))
                .await
                .unwrap_or_else(|| Ok(Vec::new()))
                .unwrap_or_else(|e| {
                    warn!("Failed to fetch videos for {playlist_id}: {e}");
                    Vec::new()
                }),
            None => Vec::new(),
        };

        if self.scope.is_cancelled() {
            info!("Scope ended, discarding preview of {playlist_id}");
            self.preview.send_replace(PreviewState {
                loading: false,
                ..previous
            });
            return Vec::new();
        }

        self.preview.send_replace(PreviewState {
            playlist_id: Some(playlist_id.to_string()),
            loading: false,
            videos: videos.clone(),
        });
        videos
    }

    pub fn preview_state(&self) -> PreviewState {
        self.preview.borrow().clone()
    }

    pub fn subscribe_preview(&self) -> watch::Receiver<PreviewState> {
        self.preview.subscribe()
    }

    // -- Selection --

    /// Flip one item's selection. False if the id isn't in the catalog.
    pub fn toggle(&self, id: &str) -> bool {
        let mut found = false;
        self.selection.send_if_modified(|store| {
            found = store.toggle(id);
            found
        });
        found
    }

    pub fn set_query(&self, query: impl Into<String>) {
        let query = query.into();
        self.selection.send_modify(|store| store.set_query(query));
    }

    /// Catalog filtered by the current query, derived on every call.
    pub fn filtered(&self) -> Vec<SelectableItem> {
        self.selection
            .borrow()
            .filtered()
            .into_iter()
            .cloned()
            .collect()
    }

    /// Selected entries in catalog order.
    pub fn selection(&self) -> Vec<PlaylistEntry> {
        self.selection
            .borrow()
            .selected()
            .into_iter()
            .map(PlaylistEntry::from)
            .collect()
    }

    pub fn selection_store(&self) -> SelectionStore {
        self.selection.borrow().clone()
    }

    pub fn subscribe_selection(&self) -> watch::Receiver<SelectionStore> {
        self.selection.subscribe()
    }

    // -- Commit --

    /// Commit the current selection. None if the scope ended before the
    /// attempt finished.
    pub async fn commit(&self) -> Option<CommitStatus> {
        let entries = self.selection();
        let status = self.scoped(self.commits.commit(&entries)).await;
        if status.is_none() {
            info!("Scope ended, discarding commit result");
        }
        status
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<CommitStatus> {
        self.commits.subscribe()
    }

    pub fn spawn_commit(self: &Arc<Self>) -> JoinHandle<Option<CommitStatus>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.commit().await })
    }

    pub fn spawn_load_playlists(self: &Arc<Self>) -> JoinHandle<Vec<PlaylistSummary>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.load_playlists().await })
    }

    pub fn spawn_preview(self: &Arc<Self>, playlist_id: String) -> JoinHandle<Vec<VideoSummary>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.preview(&playlist_id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::decode_entries;
    use crate::test_support::{
        playlist, test_identity, video, FakeCatalog, MemoryFileStore, MemoryIdentityStore,
        StaticTokenProvider,
    };
    use crate::youtube::FetchError;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    struct Harness {
        controller: Arc<SyncController>,
        tokens: Arc<StaticTokenProvider>,
        catalog: Arc<FakeCatalog>,
        files: Arc<MemoryFileStore>,
    }

    fn harness(signed_in: bool, tokens: StaticTokenProvider, catalog: FakeCatalog) -> Harness {
        let identities = if signed_in {
            MemoryIdentityStore::with(test_identity(&[YOUTUBE_READONLY_SCOPE]))
        } else {
            MemoryIdentityStore::empty()
        };
        let tokens = Arc::new(tokens);
        let catalog = Arc::new(catalog);
        let files = Arc::new(MemoryFileStore::new());
        let controller = SyncController::new(
            SyncConfig::default(),
            Collaborators {
                identities: Arc::new(identities),
                tokens: tokens.clone(),
                catalog: catalog.clone(),
                files: files.clone(),
            },
            CancellationToken::new(),
        );
        Harness {
            controller: Arc::new(controller),
            tokens,
            catalog,
            files,
        }
    }

    fn rock_and_jazz() -> FakeCatalog {
        FakeCatalog::new(vec![playlist("1", "Rock"), playlist("2", "Jazz Mix")])
    }

    fn ids(items: &[SelectableItem]) -> Vec<&str> {
        items.iter().map(|item| item.id.as_str()).collect()
    }

    #[tokio::test]
    async fn start_loads_catalog_when_signed_in() {
        let h = harness(true, StaticTokenProvider::new("tok"), rock_and_jazz());
        let session = h.controller.start().await;

        assert!(matches!(session, AuthSession::Authenticated(_)));
        assert_eq!(ids(&h.controller.filtered()), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn start_signed_out_fetches_nothing() {
        let h = harness(false, StaticTokenProvider::new("tok"), rock_and_jazz());
        assert_eq!(h.controller.start().await, AuthSession::Unauthenticated);
        assert_eq!(h.tokens.calls(), 0);
        assert_eq!(h.catalog.calls(), 0);
    }

    #[tokio::test]
    async fn token_failure_skips_fetch_and_signs_out() {
        let h = harness(true, StaticTokenProvider::failing(), rock_and_jazz());
        h.controller.start().await;

        assert_eq!(h.catalog.calls(), 0);
        assert_eq!(h.controller.auth_state(), AuthSession::Unauthenticated);
        assert!(h.controller.filtered().is_empty());
    }

    #[tokio::test]
    async fn fetch_failure_is_empty_and_keeps_store() {
        let h = harness(true, StaticTokenProvider::new("tok"), FakeCatalog::failing());
        h.controller.start().await;

        assert!(h.controller.load_playlists().await.is_empty());
        assert!(h.controller.selection_store().is_empty());
        assert!(matches!(
            h.controller.auth_state(),
            AuthSession::Authenticated(_)
        ));
    }

    #[tokio::test]
    async fn filter_scenario() {
        let h = harness(true, StaticTokenProvider::new("tok"), rock_and_jazz());
        h.controller.start().await;

        h.controller.set_query("jazz");
        assert_eq!(ids(&h.controller.filtered()), vec!["2"]);
        h.controller.set_query("");
        assert_eq!(ids(&h.controller.filtered()), vec!["1", "2"]);
    }

    #[tokio::test]
    async fn toggle_notifies_only_on_change() {
        let h = harness(true, StaticTokenProvider::new("tok"), rock_and_jazz());
        h.controller.start().await;
        let mut rx = h.controller.subscribe_selection();
        rx.borrow_and_update();

        assert!(!h.controller.toggle("missing"));
        assert!(!rx.has_changed().unwrap());
        assert!(h.controller.toggle("2"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().is_selected("2"), Some(true));
    }

    #[tokio::test]
    async fn commit_writes_selection_in_catalog_order() {
        let h = harness(
            true,
            StaticTokenProvider::new("tok"),
            FakeCatalog::new(vec![
                playlist("a", "Foo"),
                playlist("x", "Unpicked"),
                playlist("b", "Bar"),
            ]),
        );
        h.controller.start().await;
        h.controller.toggle("b");
        h.controller.toggle("a");
        h.controller.set_query("bar");

        let status = h.controller.commit().await.unwrap();
        assert!(status.is_success());
        let stored = decode_entries(&h.files.snapshot("PythonScripts/playlists.json").unwrap())
            .unwrap();
        let stored_ids: Vec<&str> = stored.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(stored_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn repeated_commits_chain_shas() {
        let h = harness(true, StaticTokenProvider::new("tok"), rock_and_jazz());
        h.controller.start().await;
        h.controller.toggle("1");

        let first = h.controller.commit().await.unwrap();
        h.controller.toggle("2");
        let second = h.controller.commit().await.unwrap();

        let CommitStatus::Succeeded { sha } = first else {
            panic!("first commit failed: {first}");
        };
        assert!(second.is_success());
        let writes = h.files.writes();
        assert_eq!(writes[0].sha, None);
        assert_eq!(writes[1].sha, Some(sha));
    }

    #[tokio::test]
    async fn preview_publishes_state() {
        let catalog = rock_and_jazz().with_items("2", vec![video("i1", "Take Five")]);
        let h = harness(true, StaticTokenProvider::new("tok"), catalog);
        h.controller.start().await;

        let videos = h.controller.preview("2").await;
        assert_eq!(videos.len(), 1);
        let state = h.controller.preview_state();
        assert!(!state.loading);
        assert_eq!(state.playlist_id.as_deref(), Some("2"));
        assert_eq!(state.videos, videos);
    }

    #[tokio::test]
    async fn preview_failure_is_empty() {
        let h = harness(true, StaticTokenProvider::new("tok"), FakeCatalog::failing());
        h.controller.start().await;
        assert!(h.controller.preview("2").await.is_empty());
        assert!(!h.controller.preview_state().loading);
    }

    #[tokio::test]
    async fn cancelled_scope_skips_commit() {
        let h = harness(true, StaticTokenProvider::new("tok"), rock_and_jazz());
        h.controller.start().await;
        h.controller.toggle("1");
        h.controller.scope().cancel();

        assert_eq!(h.controller.spawn_commit().await.unwrap(), None);
        assert!(h.files.writes().is_empty());
    }

    #[tokio::test]
    async fn sign_out_clears_catalog() {
        let h = harness(true, StaticTokenProvider::new("tok"), rock_and_jazz());
        h.controller.start().await;
        h.controller.sign_out().unwrap();

        assert_eq!(h.controller.auth_state(), AuthSession::Unauthenticated);
        assert!(h.controller.filtered().is_empty());
    }

    /// Holds every fetch until the gate opens.
    struct GatedCatalog {
        inner: FakeCatalog,
        gate: Notify,
    }

    #[async_trait]
    impl PlaylistCatalog for GatedCatalog {
        async fn fetch_playlists(
            &self,
            token: &AccessToken,
        ) -> Result<Vec<PlaylistSummary>, FetchError> {
            self.gate.notified().await;
            self.inner.fetch_playlists(token).await
        }

        async fn fetch_playlist_items(
            &self,
            token: &AccessToken,
            playlist_id: &str,
        ) -> Result<Vec<VideoSummary>, FetchError> {
            self.gate.notified().await;
            self.inner.fetch_playlist_items(token, playlist_id).await
        }
    }

    #[tokio::test]
    async fn cancelled_fetch_result_is_discarded() {
        let catalog = Arc::new(GatedCatalog {
            inner: rock_and_jazz(),
            gate: Notify::new(),
        });
        let scope = CancellationToken::new();
        let controller = Arc::new(SyncController::new(
            SyncConfig::default(),
            Collaborators {
                identities: Arc::new(MemoryIdentityStore::with(test_identity(&[
                    YOUTUBE_READONLY_SCOPE,
                ]))),
                tokens: Arc::new(StaticTokenProvider::new("tok")),
                catalog: catalog.clone(),
                files: Arc::new(MemoryFileStore::new()),
            },
            scope.clone(),
        ));
        controller.check_status();

        let handle = controller.spawn_load_playlists();
        tokio::task::yield_now().await;
        scope.cancel();
        catalog.gate.notify_one();

        assert!(handle.await.unwrap().is_empty());
        assert!(controller.selection_store().is_empty());
    }

    #[tokio::test]
    async fn cancelled_preview_restores_previous_state() {
        let catalog = Arc::new(GatedCatalog {
            inner: rock_and_jazz().with_items("1", vec![video("i1", "Anthem")]),
            gate: Notify::new(),
        });
        let scope = CancellationToken::new();
        let controller = Arc::new(SyncController::new(
            SyncConfig::default(),
            Collaborators {
                identities: Arc::new(MemoryIdentityStore::with(test_identity(&[
                    YOUTUBE_READONLY_SCOPE,
                ]))),
                tokens: Arc::new(StaticTokenProvider::new("tok")),
                catalog: catalog.clone(),
                files: Arc::new(MemoryFileStore::new()),
            },
            scope.clone(),
        ));
        controller.check_status();

        catalog.gate.notify_one();
        let first = controller.preview("1").await;
        assert_eq!(first.len(), 1);

        let handle = controller.spawn_preview("2".to_string());
        tokio::task::yield_now().await;
        scope.cancel();
        catalog.gate.notify_one();

        assert!(handle.await.unwrap().is_empty());
        let state = controller.preview_state();
        assert!(!state.loading);
        assert_eq!(state.playlist_id.as_deref(), Some("1"));
        assert_eq!(state.videos, first);
    }
}
