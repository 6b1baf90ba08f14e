use async_trait::async_trait;
use tracing::{debug, warn};

use crate::auth::Identity;
use crate::oauth::{self, OAuthConfig};

/// Short-lived bearer token. Valid for one operation; never stored.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Exchanges an authenticated identity for a scope-limited bearer token.
///
/// Failures of any kind come back as `None`; the cause is only logged.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self, identity: &Identity) -> Option<AccessToken>;
}

/// Mints read-only access tokens from the identity's refresh token.
pub struct OAuthTokenProvider {
    config: OAuthConfig,
    scope: String,
}

impl OAuthTokenProvider {
    pub fn new(config: OAuthConfig, scope: impl Into<String>) -> Self {
        Self {
            config,
            scope: scope.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for OAuthTokenProvider {
    async fn access_token(&self, identity: &Identity) -> Option<AccessToken> {
        let Some(refresh_token) = identity.refresh_token() else {
            warn!("No refresh token for {}, cannot mint access token", identity.account);
            return None;
        };

        match oauth::refresh(&self.config, refresh_token, Some(&self.scope)).await {
            Ok(tokens) => {
                debug!("Minted access token for {}", identity.account);
                Some(AccessToken::new(tokens.access_token))
            }
            Err(e) => {
                warn!("Token exchange for {} failed: {e}", identity.account);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::YOUTUBE_READONLY_SCOPE;
    use crate::test_support::test_identity;

    #[test]
    fn access_token_debug_is_redacted() {
        let token = AccessToken::new("ya29.secret");
        assert_eq!(format!("{token:?}"), "AccessToken(<redacted>)");
        assert_eq!(token.secret(), "ya29.secret");
    }

    #[tokio::test]
    async fn missing_refresh_token_yields_none() {
        let mut identity = test_identity(&[YOUTUBE_READONLY_SCOPE]);
        identity.tokens.refresh_token = None;
        let provider = OAuthTokenProvider::new(
            OAuthConfig {
                client_id: "client".into(),
                client_secret: None,
                auth_url: "http://127.0.0.1:9/auth".into(),
                token_url: "http://127.0.0.1:9/token".into(),
                scopes: vec![],
                redirect_port: 0,
                extra_auth_params: vec![],
            },
            YOUTUBE_READONLY_SCOPE,
        );
        assert!(provider.access_token(&identity).await.is_none());
    }
}
