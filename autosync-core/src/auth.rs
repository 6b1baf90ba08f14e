//! Authentication session state machine.
//!
//! `AuthSessionManager` owns the single live `AuthSession` and republishes it
//! on a watch channel whenever it is replaced:
//!
//! ```text
//! Idle -> Loading -> Authenticated | Unauthenticated | Error
//! ```
//!
//! Checking status is a local lookup of the cached identity. The only network
//! call is the token exchange in `access_token`, and a failed exchange drops
//! the session back to `Unauthenticated`. Nothing here retries.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::keys::{KeyError, KeyService};
use crate::oauth::OAuthTokens;
use crate::token::{AccessToken, TokenProvider};

/// A signed-in Google account together with the tokens it was granted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub account: String,
    pub tokens: OAuthTokens,
}

impl Identity {
    pub fn from_tokens(tokens: OAuthTokens) -> Self {
        let account = tokens
            .email
            .clone()
            .unwrap_or_else(|| "google account".to_string());
        Self { account, tokens }
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.tokens.scopes.iter().any(|s| s == scope)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens.refresh_token.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthSession {
    Idle,
    Loading,
    Unauthenticated,
    Authenticated(Identity),
    Error(String),
}

impl AuthSession {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            AuthSession::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthSession::Idle => write!(f, "idle"),
            AuthSession::Loading => write!(f, "loading"),
            AuthSession::Unauthenticated => write!(f, "signed out"),
            AuthSession::Authenticated(identity) => write!(f, "signed in as {}", identity.account),
            AuthSession::Error(message) => write!(f, "sign-in error: {message}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("key storage error: {0}")]
    Key(#[from] KeyError),
    #[error("stored identity is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Local cache of the last authorized identity.
pub trait IdentityStore: Send + Sync {
    fn load(&self) -> Result<Option<Identity>, IdentityError>;
    fn save(&self, identity: &Identity) -> Result<(), IdentityError>;
    fn clear(&self) -> Result<(), IdentityError>;
}

/// Keeps the identity as JSON in the keyring (env var in dev mode).
pub struct KeyringIdentityStore {
    keys: KeyService,
}

impl KeyringIdentityStore {
    pub fn new(keys: KeyService) -> Self {
        Self { keys }
    }
}

impl IdentityStore for KeyringIdentityStore {
    fn load(&self) -> Result<Option<Identity>, IdentityError> {
        match self.keys.get_identity_json() {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn save(&self, identity: &Identity) -> Result<(), IdentityError> {
        let json = serde_json::to_string(identity)?;
        self.keys.set_identity_json(&json)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), IdentityError> {
        self.keys.delete_identity()?;
        Ok(())
    }
}

pub struct AuthSessionManager {
    store: Arc<dyn IdentityStore>,
    required_scope: String,
    state: watch::Sender<AuthSession>,
}

impl AuthSessionManager {
    pub fn new(store: Arc<dyn IdentityStore>, required_scope: impl Into<String>) -> Self {
        let (state, _) = watch::channel(AuthSession::Idle);
        Self {
            store,
            required_scope: required_scope.into(),
            state,
        }
    }

    pub fn current(&self) -> AuthSession {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSession> {
        self.state.subscribe()
    }

    fn replace(&self, next: AuthSession) {
        self.state.send_replace(next);
    }

    /// Resolve the session from the cached identity. No network access.
    ///
    /// Anything short of a stored identity holding the required scope
    /// resolves to `Unauthenticated`, including a store that can't be read.
    pub fn check_status(&self) -> AuthSession {
        self.replace(AuthSession::Loading);

        let next = match self.store.load() {
            Ok(Some(identity)) if identity.has_scope(&self.required_scope) => {
                AuthSession::Authenticated(identity)
            }
            Ok(Some(identity)) => {
                info!(
                    "Cached identity {} lacks scope {}",
                    identity.account, self.required_scope
                );
                AuthSession::Unauthenticated
            }
            Ok(None) => AuthSession::Unauthenticated,
            Err(e) => {
                warn!("Failed to read cached identity: {e}");
                AuthSession::Unauthenticated
            }
        };

        self.replace(next.clone());
        next
    }

    /// Persist the identity produced by an interactive sign-in and re-check.
    pub fn complete_sign_in(&self, tokens: OAuthTokens) -> AuthSession {
        let identity = Identity::from_tokens(tokens);
        if let Err(e) = self.store.save(&identity) {
            warn!("Failed to persist identity for {}: {e}", identity.account);
            let session = AuthSession::Error(format!("could not save sign-in: {e}"));
            self.replace(session.clone());
            return session;
        }
        self.check_status()
    }

    /// Record that the interactive sign-in flow itself failed.
    pub fn on_sign_in_failed(&self, message: impl Into<String>) {
        self.replace(AuthSession::Error(message.into()));
    }

    pub fn sign_out(&self) -> Result<(), IdentityError> {
        self.store.clear()?;
        self.replace(AuthSession::Unauthenticated);
        Ok(())
    }

    /// Exchange the current identity for a short-lived access token.
    ///
    /// Returns None without calling the provider unless authenticated. A
    /// failed exchange moves the session to `Unauthenticated`.
    pub async fn access_token(&self, provider: &dyn TokenProvider) -> Option<AccessToken> {
        let identity = match self.current() {
            AuthSession::Authenticated(identity) => identity,
            _ => return None,
        };

        match provider.access_token(&identity).await {
            Some(token) => Some(token),
            None => {
                warn!(
                    "Token exchange failed for {}, signing out",
                    identity.account
                );
                self.replace(AuthSession::Unauthenticated);
                None
            }
        }
    }
}
