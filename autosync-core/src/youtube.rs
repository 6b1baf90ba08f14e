//! YouTube Data API v3 client for the signed-in user's playlists.
//!
//! Only the first page of each listing is requested (`maxResults=50`); there
//! is no pagination.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::token::AccessToken;

pub const PAGE_SIZE: u32 = 50;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("YouTube API returned {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub id: String,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSummary {
    /// Playlist-item id (not the video id).
    pub id: String,
    pub title: String,
    pub description: String,
    pub video_id: String,
}

// -- Wire types --

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct PlaylistResource {
    id: String,
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistSnippet {
    title: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemResource {
    id: String,
    snippet: PlaylistItemSnippet,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemSnippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "resourceId", default)]
    resource_id: ResourceId,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceId {
    #[serde(rename = "videoId", default)]
    video_id: String,
}

impl From<PlaylistResource> for PlaylistSummary {
    fn from(p: PlaylistResource) -> Self {
        Self {
            id: p.id,
            title: p.snippet.title,
            description: p.snippet.description,
        }
    }
}

impl From<PlaylistItemResource> for VideoSummary {
    fn from(item: PlaylistItemResource) -> Self {
        Self {
            id: item.id,
            title: item.snippet.title,
            description: item.snippet.description,
            video_id: item.snippet.resource_id.video_id,
        }
    }
}

/// Read-only view of the user's playlist catalog. Single request per call,
/// no retry.
#[async_trait]
pub trait PlaylistCatalog: Send + Sync {
    async fn fetch_playlists(&self, token: &AccessToken)
        -> Result<Vec<PlaylistSummary>, FetchError>;

    async fn fetch_playlist_items(
        &self,
        token: &AccessToken,
        playlist_id: &str,
    ) -> Result<Vec<VideoSummary>, FetchError>;
}

pub struct YouTubeClient {
    base_url: String,
    http: Client,
}

impl YouTubeClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    async fn list<T>(
        &self,
        token: &AccessToken,
        resource: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<T>, FetchError>
    where
        T: serde::de::DeserializeOwned,
    {
        let url = format!("{}/youtube/v3/{}", self.base_url, resource);
        let page_size = PAGE_SIZE.to_string();
        debug!("YouTube API request: {} {:?}", url, params);

        let resp = self
            .http
            .get(&url)
            .bearer_auth(token.secret())
            .query(&[("part", "snippet"), ("maxResults", page_size.as_str())])
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let list: ListResponse<T> = resp.json().await?;
        Ok(list.items)
    }
}

#[async_trait]
impl PlaylistCatalog for YouTubeClient {
    async fn fetch_playlists(
        &self,
        token: &AccessToken,
    ) -> Result<Vec<PlaylistSummary>, FetchError> {
        let items: Vec<PlaylistResource> =
            self.list(token, "playlists", &[("mine", "true")]).await?;
        Ok(items.into_iter().map(PlaylistSummary::from).collect())
    }

    async fn fetch_playlist_items(
        &self,
        token: &AccessToken,
        playlist_id: &str,
    ) -> Result<Vec<VideoSummary>, FetchError> {
        let items: Vec<PlaylistItemResource> = self
            .list(token, "playlistItems", &[("playlistId", playlist_id)])
            .await?;
        Ok(items.into_iter().map(VideoSummary::from).collect())
    }
}
