//! OAuth 2.0 helper for Google sign-in.
//!
//! Provides the PKCE authorization code flow with a localhost callback server
//! (interactive sign-in) and the refresh-token exchange the token provider
//! uses to mint short-lived, scope-limited access tokens.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

use crate::config::Config;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const YOUTUBE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/youtube.readonly";

/// Endpoints, client and scopes for one OAuth flow.
#[derive(Clone, Debug)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Only set for confidential clients; installed apps rely on PKCE alone.
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_port: u16,
    pub extra_auth_params: Vec<(String, String)>,
}

impl OAuthConfig {
    /// Google configuration requesting the account email plus read-only
    /// YouTube access, with offline access so a refresh token is issued.
    pub fn google(config: &Config) -> Self {
        Self {
            client_id: config.google_client_id.clone(),
            client_secret: config.google_client_secret.clone(),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                YOUTUBE_READONLY_SCOPE.to_string(),
            ],
            redirect_port: config.redirect_port,
            extra_auth_params: vec![
                ("access_type".to_string(), "offline".to_string()),
                ("prompt".to_string(), "consent".to_string()),
            ],
        }
    }
}

/// Result of a sign-in or a refresh.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix seconds. None when the provider omitted `expires_in`.
    pub expires_at: Option<i64>,
    /// Scopes the provider reports as granted.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Email claim from the ID token, when one was issued.
    #[serde(default)]
    pub email: Option<String>,
}

impl std::fmt::Debug for OAuthTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("email", &self.email)
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum OAuthError {
    #[error("could not open the browser: {0}")]
    BrowserOpen(String),
    #[error("sign-in callback failed: {0}")]
    Callback(String),
    #[error("Google denied the sign-in: {0}")]
    Denied(String),
    #[error("no sign-in callback within {} s", CALLBACK_TIMEOUT.as_secs())]
    Timeout,
    #[error("token request failed: {0}")]
    TokenExchange(String),
}

const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

const SIGNED_IN_PAGE: &str = "<!doctype html><title>autosync</title>\
    <p>Sign-in received. Return to the terminal.</p>";

/// Fields Google may send back to the token endpoint caller.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
    id_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct IdTokenClaims {
    email: Option<String>,
}

/// 32 random bytes, URL-safe. Used for the PKCE verifier and the `state` nonce.
fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 PKCE challenge.
fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Read the `email` claim from an ID token's payload segment.
///
/// The token came straight from the token endpoint over TLS, so the
/// signature is not verified here.
fn id_token_email(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes).ok()?;
    claims.email
}

#[derive(Serialize)]
struct AuthorizationRequest<'a> {
    response_type: &'static str,
    client_id: &'a str,
    redirect_uri: &'a str,
    code_challenge: &'a str,
    code_challenge_method: &'static str,
    state: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

fn authorization_url(
    config: &OAuthConfig,
    redirect_uri: &str,
    challenge: &str,
    state: &str,
) -> Result<String, OAuthError> {
    let request = AuthorizationRequest {
        response_type: "code",
        client_id: &config.client_id,
        redirect_uri,
        code_challenge: challenge,
        code_challenge_method: "S256",
        state,
        scope: (!config.scopes.is_empty()).then(|| config.scopes.join(" ")),
    };
    let encode_err = |e: serde_urlencoded::ser::Error| OAuthError::Callback(e.to_string());

    let mut query = serde_urlencoded::to_string(&request).map_err(encode_err)?;
    if !config.extra_auth_params.is_empty() {
        query.push('&');
        query.push_str(&serde_urlencoded::to_string(&config.extra_auth_params).map_err(encode_err)?);
    }
    Ok(format!("{}?{query}", config.auth_url))
}

/// Query string of the redirect back to `/callback`.
#[derive(Debug, Default, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

impl CallbackParams {
    fn into_code(self, expected_state: &str) -> Result<String, OAuthError> {
        if let Some(error) = self.error {
            return Err(OAuthError::Denied(self.error_description.unwrap_or(error)));
        }
        if self.state.as_deref() != Some(expected_state) {
            return Err(OAuthError::Callback("state does not match".to_string()));
        }
        self.code
            .ok_or_else(|| OAuthError::Callback("no code in callback".to_string()))
    }
}

type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// Only the first redirect is forwarded; later hits just get the page.
async fn handle_callback(
    State(slot): State<CallbackSlot>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    let sender = slot.lock().ok().and_then(|mut slot| slot.take());
    if let Some(sender) = sender {
        let _ = sender.send(params);
    }
    Html(SIGNED_IN_PAGE)
}

/// Interactive Google sign-in: open the consent page in the browser, catch
/// the redirect on `127.0.0.1:{redirect_port}/callback`, then trade the code
/// for tokens.
pub async fn authorize(config: &OAuthConfig) -> Result<OAuthTokens, OAuthError> {
    let verifier = random_token();
    let state = random_token();
    let redirect_uri = format!("http://localhost:{}/callback", config.redirect_port);
    let url = authorization_url(config, &redirect_uri, &code_challenge(&verifier), &state)?;

    let listener = TcpListener::bind(("127.0.0.1", config.redirect_port))
        .await
        .map_err(|e| OAuthError::Callback(format!("bind port {}: {e}", config.redirect_port)))?;
    let (tx, rx) = oneshot::channel();
    let app = Router::new()
        .route("/callback", get(handle_callback))
        .with_state(Arc::new(Mutex::new(Some(tx))));
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    if let Err(e) = open::that(&url) {
        server.abort();
        return Err(OAuthError::BrowserOpen(e.to_string()));
    }
    info!("Waiting for Google sign-in in the browser");

    let callback = tokio::time::timeout(CALLBACK_TIMEOUT, rx).await;
    server.abort();
    let params = callback
        .map_err(|_| OAuthError::Timeout)?
        .map_err(|_| OAuthError::Callback("callback server stopped".to_string()))?;
    let code = params.into_code(&state)?;

    info!("Authorization code received");
    request_tokens(
        config,
        Grant::AuthorizationCode {
            code: &code,
            verifier: &verifier,
            redirect_uri: &redirect_uri,
        },
    )
    .await
}

/// Exchange a refresh token for a fresh access token.
///
/// `scope`, when given, asks Google to down-scope the new access token to a
/// subset of what the user originally granted.
pub async fn refresh(
    config: &OAuthConfig,
    refresh_token: &str,
    scope: Option<&str>,
) -> Result<OAuthTokens, OAuthError> {
    request_tokens(
        config,
        Grant::RefreshToken {
            refresh_token,
            scope,
        },
    )
    .await
}

enum Grant<'a> {
    AuthorizationCode {
        code: &'a str,
        verifier: &'a str,
        redirect_uri: &'a str,
    },
    RefreshToken {
        refresh_token: &'a str,
        scope: Option<&'a str>,
    },
}

impl<'a> Grant<'a> {
    fn form(&self, config: &'a OAuthConfig) -> Vec<(&'static str, &'a str)> {
        let mut form = match *self {
            Grant::AuthorizationCode {
                code,
                verifier,
                redirect_uri,
            } => vec![
                ("grant_type", "authorization_code"),
                ("code", code),
                ("code_verifier", verifier),
                ("redirect_uri", redirect_uri),
            ],
            Grant::RefreshToken {
                refresh_token,
                scope,
            } => {
                let mut form = vec![
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ];
                form.extend(scope.map(|scope| ("scope", scope)));
                form
            }
        };
        form.push(("client_id", config.client_id.as_str()));
        form.extend(config.client_secret.as_deref().map(|s| ("client_secret", s)));
        form
    }

    /// Google does not always rotate refresh tokens; keep the one we had.
    fn existing_refresh_token(&self) -> Option<&'a str> {
        match *self {
            Grant::RefreshToken { refresh_token, .. } => Some(refresh_token),
            Grant::AuthorizationCode { .. } => None,
        }
    }
}

async fn request_tokens(config: &OAuthConfig, grant: Grant<'_>) -> Result<OAuthTokens, OAuthError> {
    let resp = reqwest::Client::new()
        .post(&config.token_url)
        .form(&grant.form(config))
        .send()
        .await
        .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;

    let status = resp.status();
    let body: TokenResponse = resp
        .json()
        .await
        .map_err(|e| OAuthError::TokenExchange(format!("HTTP {status}, unreadable body: {e}")))?;

    if let Some(error) = body.error.clone() {
        let detail = body.error_description.clone().unwrap_or(error);
        return Err(OAuthError::TokenExchange(format!("HTTP {status}: {detail}")));
    }
    if !status.is_success() {
        return Err(OAuthError::TokenExchange(format!("HTTP {status}")));
    }
    into_tokens(body, grant.existing_refresh_token())
}

fn into_tokens(
    resp: TokenResponse,
    existing_refresh: Option<&str>,
) -> Result<OAuthTokens, OAuthError> {
    let access_token = resp
        .access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| OAuthError::TokenExchange("no access_token in response".to_string()))?;

    Ok(OAuthTokens {
        access_token,
        refresh_token: resp
            .refresh_token
            .or_else(|| existing_refresh.map(str::to_string)),
        expires_at: resp
            .expires_in
            .map(|secs| chrono::Utc::now().timestamp() + secs),
        scopes: resp
            .scope
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default(),
        email: resp.id_token.as_deref().and_then(id_token_email),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> TokenResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn pkce_verifier_is_url_safe() {
        let verifier = random_token();
        assert!(verifier.len() >= 43);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    fn google_config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-1".to_string(),
            client_secret: None,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scopes: vec!["openid".to_string(), YOUTUBE_READONLY_SCOPE.to_string()],
            redirect_port: 19285,
            extra_auth_params: vec![("access_type".to_string(), "offline".to_string())],
        }
    }

    #[test]
    fn authorization_url_carries_pkce_state_and_extras() {
        let url = authorization_url(
            &google_config(),
            "http://localhost:19285/callback",
            "chal",
            "nonce",
        )
        .unwrap();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?response_type=code"));
        assert!(url.contains("code_challenge=chal&code_challenge_method=S256&state=nonce"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A19285%2Fcallback"));
        assert!(url.contains("scope=openid+https%3A%2F%2Fwww.googleapis.com%2Fauth%2Fyoutube.readonly"));
        assert!(url.ends_with("&access_type=offline"));
    }

    #[test]
    fn callback_yields_code_when_state_matches() {
        let params = CallbackParams {
            code: Some("abc".to_string()),
            state: Some("nonce".to_string()),
            ..Default::default()
        };
        assert_eq!(params.into_code("nonce").unwrap(), "abc");
    }

    #[test]
    fn callback_rejects_foreign_state() {
        let params = CallbackParams {
            code: Some("abc".to_string()),
            state: Some("other".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            params.into_code("nonce"),
            Err(OAuthError::Callback(_))
        ));
    }

    #[test]
    fn callback_error_is_denied() {
        let params = CallbackParams {
            error: Some("access_denied".to_string()),
            ..Default::default()
        };
        match params.into_code("nonce") {
            Err(OAuthError::Denied(reason)) => assert_eq!(reason, "access_denied"),
            other => panic!("expected denial, got {other:?}"),
        }
    }

    #[test]
    fn refresh_form_keeps_scope_and_refresh_token() {
        let config = google_config();
        let grant = Grant::RefreshToken {
            refresh_token: "rt",
            scope: Some(YOUTUBE_READONLY_SCOPE),
        };
        let form = grant.form(&config);
        assert!(form.contains(&("grant_type", "refresh_token")));
        assert!(form.contains(&("scope", YOUTUBE_READONLY_SCOPE)));
        assert!(form.contains(&("client_id", "client-1")));
        assert!(!form.iter().any(|(k, _)| *k == "client_secret"));
        assert_eq!(grant.existing_refresh_token(), Some("rt"));
    }

    #[test]
    fn pkce_challenge_matches_rfc7636_vector() {
        assert_eq!(
            code_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn id_token_email_reads_payload_claim() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"email":"me@example.com","sub":"1"}"#);
        let token = format!("header.{payload}.signature");
        assert_eq!(id_token_email(&token), Some("me@example.com".to_string()));
    }

    #[test]
    fn id_token_email_tolerates_garbage() {
        assert_eq!(id_token_email("not-a-jwt"), None);
        assert_eq!(id_token_email("a.!!!.c"), None);
    }

    #[test]
    fn into_tokens_splits_granted_scopes() {
        let tokens = into_tokens(
            response(
                r#"{"access_token":"at","expires_in":3600,
                    "scope":"openid https://www.googleapis.com/auth/youtube.readonly"}"#,
            ),
            Some("rt-old"),
        )
        .unwrap();
        assert_eq!(tokens.access_token, "at");
        assert_eq!(tokens.refresh_token.as_deref(), Some("rt-old"));
        assert_eq!(tokens.scopes, vec!["openid", YOUTUBE_READONLY_SCOPE]);
        assert!(tokens.expires_at.is_some());
    }

    #[test]
    fn into_tokens_requires_access_token() {
        let result = into_tokens(response(r#"{"expires_in":3600}"#), None);
        assert!(matches!(result, Err(OAuthError::TokenExchange(_))));
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let tokens = OAuthTokens {
            access_token: "at_123".to_string(),
            refresh_token: Some("rt_456".to_string()),
            expires_at: Some(1700000000),
            scopes: vec![],
            email: None,
        };
        let debug = format!("{tokens:?}");
        assert!(!debug.contains("at_123"));
        assert!(!debug.contains("rt_456"));
    }

    #[test]
    fn oauth_tokens_deserialize_without_new_fields() {
        let json = r#"{"access_token":"at","refresh_token":"rt","expires_at":null}"#;
        let parsed: OAuthTokens = serde_json::from_str(json).unwrap();
        assert!(parsed.scopes.is_empty());
        assert_eq!(parsed.email, None);
    }
}
