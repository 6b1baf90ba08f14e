//! Version-controlled remote file store backed by the GitHub contents API.
//!
//! Writes are SHA-guarded: updating an existing file requires the blob sha
//! the caller last read, and GitHub rejects the write if it has changed.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = "autosync/0.1";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid file content: {0}")]
    Content(String),
}

/// Last-known state of a remote file. `sha == None` means the file does
/// not exist yet. `content` is empty when the stored body could not be decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFileSnapshot {
    pub sha: Option<String>,
    pub content: Vec<u8>,
}

/// Body of a create-or-update write. `sha` must be omitted to create and
/// present to update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub message: String,
    /// Base64-encoded file content.
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sha: Option<String>,
}

/// Result of a successful write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReceipt {
    /// Blob sha of the file as now stored.
    pub sha: String,
    /// Sha of the commit that stored it, when the server reports one.
    pub commit_sha: Option<String>,
}

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Read a file. Absence is `StoreError::NotFound`.
    async fn read(&self, path: &str) -> Result<RemoteFileSnapshot, StoreError>;

    /// Create or update a file in a single attempt.
    async fn write(&self, path: &str, request: &CommitRequest)
        -> Result<WriteReceipt, StoreError>;
}

// -- Wire types --

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: Option<ContentRef>,
    commit: Option<CommitRef>,
}

#[derive(Debug, Deserialize)]
struct ContentRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

/// GitHub returns base64 wrapped at 60 columns; strip whitespace first.
pub fn decode_content(encoded: &str) -> Result<Vec<u8>, StoreError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| StoreError::Content(format!("base64: {e}")))
}

/// A single repository's contents endpoint, authenticated with a long-lived
/// personal access token.
pub struct GitHubContents {
    base_url: String,
    owner: String,
    repo: String,
    token: String,
    http: Client,
}

impl GitHubContents {
    pub fn new(
        base_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token: token.into(),
            http: Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}",
            self.base_url,
            self.owner,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .header("User-Agent", USER_AGENT)
    }

    async fn map_error(path: &str, resp: reqwest::Response) -> StoreError {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if status == StatusCode::NOT_FOUND {
            StoreError::NotFound(path.to_string())
        } else {
            StoreError::Status {
                status: status.as_u16(),
                body,
            }
        }
    }
}

#[async_trait]
impl FileStore for GitHubContents {
    async fn read(&self, path: &str) -> Result<RemoteFileSnapshot, StoreError> {
        debug!("GitHub read {}/{}:{}", self.owner, self.repo, path);
        let resp = self.request(reqwest::Method::GET, path).send().await?;
        if !resp.status().is_success() {
            return Err(Self::map_error(path, resp).await);
        }

        // The sha alone is enough to update the file, so a body that fails
        // to decode must not hide it.
        let body: ContentsResponse = resp.json().await?;
        let content = decode_content(&body.content).unwrap_or_else(|e| {
            warn!("Ignoring undecodable content of {path}: {e}");
            Vec::new()
        });
        Ok(RemoteFileSnapshot {
            sha: Some(body.sha),
            content,
        })
    }

    async fn write(
        &self,
        path: &str,
        request: &CommitRequest,
    ) -> Result<WriteReceipt, StoreError> {
        debug!(
            "GitHub write {}/{}:{} ({})",
            self.owner,
            self.repo,
            path,
            if request.sha.is_some() { "update" } else { "create" }
        );
        let resp = self
            .request(reqwest::Method::PUT, path)
            .json(request)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::map_error(path, resp).await);
        }

        let body: WriteResponse = resp.json().await?;
        let sha = body
            .content
            .map(|c| c.sha)
            .ok_or_else(|| StoreError::Content("write response has no content sha".into()))?;
        Ok(WriteReceipt {
            sha,
            commit_sha: body.commit.map(|c| c.sha),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_omits_sha() {
        let req = CommitRequest {
            message: "m".into(),
            content: "W10=".into(),
            sha: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("sha").is_none());
        assert_eq!(json["content"], "W10=");
    }

    #[test]
    fn update_request_carries_sha() {
        let req = CommitRequest {
            message: "m".into(),
            content: "W10=".into(),
            sha: Some("abc".into()),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["sha"], "abc");
    }

    #[test]
    fn decode_content_strips_line_breaks() {
        let decoded = decode_content("W3siaWQiOiJhIiwidGl0bGUi\nOiJGb28ifV0=\n").unwrap();
        assert_eq!(decoded, br#"[{"id":"a","title":"Foo"}]"#);
    }

    #[test]
    fn decode_content_rejects_garbage() {
        assert!(matches!(
            decode_content("***"),
            Err(StoreError::Content(_))
        ));
    }

    #[test]
    fn contents_url_layout() {
        let gh = GitHubContents::new("https://api.github.com/", "octo", "repo", "pat");
        assert_eq!(
            gh.url("PythonScripts/playlists.json"),
            "https://api.github.com/repos/octo/repo/contents/PythonScripts/playlists.json"
        );
    }

    #[test]
    fn parse_write_response() {
        let json = r#"{"content": {"name": "playlists.json", "sha": "blob1"},
                       "commit": {"sha": "commit1", "message": "m"}}"#;
        let resp: WriteResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.content.unwrap().sha, "blob1");
        assert_eq!(resp.commit.unwrap().sha, "commit1");
    }
}
