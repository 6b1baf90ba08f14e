pub mod auth;
pub mod commit;
pub mod config;
pub mod controller;
pub mod github;
pub mod keys;
pub mod oauth;
pub mod token;
pub mod youtube;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_support;

pub use auth::{AuthSession, AuthSessionManager, Identity, IdentityStore, KeyringIdentityStore};
pub use commit::{CommitCoordinator, CommitStatus, PlaylistEntry};
pub use config::{Config, SyncConfig};
pub use controller::{Collaborators, PreviewState, SyncController};
pub use github::{FileStore, GitHubContents};
pub use token::{AccessToken, OAuthTokenProvider, TokenProvider};
pub use youtube::{PlaylistCatalog, PlaylistSummary, VideoSummary, YouTubeClient};
