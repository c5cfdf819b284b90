#![forbid(unsafe_code)]

//! Thin blocking client for the handful of YouTube Data API v3 endpoints the
//! engagement flow needs.
//!
//! [`YouTubeApi`] is the seam between the orchestration code (discovery, state
//! checks, processing) and the network. [`YouTubeClient`] implements it over
//! `ureq`; tests substitute an in-memory fake.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use serde::Deserialize;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde_json::{Value, json};

use crate::auth::CredentialProvider;
use crate::error::ApiError;
use crate::metadata::{Rating, VideoRecord};

pub const API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const COMMENT_PAGE_SIZE: usize = 100;
/// Thumbnails larger than this fail with [`ApiError::TooLarge`].
const MAX_THUMBNAIL_BYTES: u64 = 8 * 1024 * 1024;

/// One page of top-level comment threads, reduced to what the state check
/// needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentPage {
    pub author_channel_ids: Vec<String>,
    pub next_page_token: Option<String>,
}

/// Platform operations used by discovery and engagement. Every call is a
/// single synchronous request.
pub trait YouTubeApi {
    /// Videos matching `query` published after `published_after`; never more
    /// than `max_results` and never paginated.
    fn search_videos(
        &self,
        query: &str,
        published_after: DateTime<Utc>,
        max_results: usize,
    ) -> Result<Vec<VideoRecord>, ApiError>;

    /// Channel id of the authenticated account, if it owns a channel.
    fn my_channel_id(&self) -> Result<Option<String>, ApiError>;

    fn is_subscribed(&self, channel_id: &str) -> Result<bool, ApiError>;

    fn subscribe(&self, channel_id: &str) -> Result<(), ApiError>;

    fn rating(&self, video_id: &str) -> Result<Rating, ApiError>;

    fn rate(&self, video_id: &str, rating: Rating) -> Result<(), ApiError>;

    /// One page of top-level threads, newest first. `search_terms` narrows
    /// the listing to threads whose text matches.
    fn comment_threads(
        &self,
        video_id: &str,
        search_terms: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<CommentPage, ApiError>;

    fn post_comment(&self, video_id: &str, text: &str) -> Result<(), ApiError>;
}

impl<T: YouTubeApi + ?Sized> YouTubeApi for Arc<T> {
    fn search_videos(
        &self,
        query: &str,
        published_after: DateTime<Utc>,
        max_results: usize,
    ) -> Result<Vec<VideoRecord>, ApiError> {
        (**self).search_videos(query, published_after, max_results)
    }

    fn my_channel_id(&self) -> Result<Option<String>, ApiError> {
        (**self).my_channel_id()
    }

    fn is_subscribed(&self, channel_id: &str) -> Result<bool, ApiError> {
        (**self).is_subscribed(channel_id)
    }

    fn subscribe(&self, channel_id: &str) -> Result<(), ApiError> {
        (**self).subscribe(channel_id)
    }

    fn rating(&self, video_id: &str) -> Result<Rating, ApiError> {
        (**self).rating(video_id)
    }

    fn rate(&self, video_id: &str, rating: Rating) -> Result<(), ApiError> {
        (**self).rate(video_id, rating)
    }

    fn comment_threads(
        &self,
        video_id: &str,
        search_terms: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<CommentPage, ApiError> {
        (**self).comment_threads(video_id, search_terms, page_token)
    }

    fn post_comment(&self, video_id: &str, text: &str) -> Result<(), ApiError> {
        (**self).post_comment(video_id, text)
    }
}

/// Shared HTTP agent with the tool's timeout and user agent.
pub fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("tube-engage/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Downloads a public resource such as a thumbnail. No credentials are sent.
pub fn fetch_bytes(agent: &ureq::Agent, url: &str) -> Result<Vec<u8>, ApiError> {
    fetch_bytes_limited(agent, url, MAX_THUMBNAIL_BYTES)
}

fn fetch_bytes_limited(agent: &ureq::Agent, url: &str, limit: u64) -> Result<Vec<u8>, ApiError> {
    let response = agent.get(url).call().map_err(|err| map_ureq_error(url, err))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .take(limit + 1)
        .read_to_end(&mut bytes)
        .map_err(|source| ApiError::Decode {
            endpoint: url.to_string(),
            source,
        })?;
    if bytes.len() as u64 > limit {
        return Err(ApiError::TooLarge {
            endpoint: url.to_string(),
            limit,
        });
    }
    Ok(bytes)
}

fn map_ureq_error(endpoint: &str, err: ureq::Error) -> ApiError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            ApiError::from_status(endpoint, status, &body)
        }
        ureq::Error::Transport(transport) => ApiError::Transport {
            endpoint: endpoint.to_string(),
            reason: transport.to_string(),
        },
    }
}

pub struct YouTubeClient {
    agent: ureq::Agent,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl YouTubeClient {
    pub fn new(agent: ureq::Agent, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self {
            agent,
            base_url: API_BASE.to_string(),
            credentials,
        }
    }

    /// Points the client at another API root (a local stub in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn agent(&self) -> &ureq::Agent {
        &self.agent
    }

    fn request(
        &self,
        method: &str,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<ureq::Request, ApiError> {
        let token = self.credentials.access_token()?;
        let url = format!("{}/{endpoint}", self.base_url);
        let request = query.iter().fold(
            self.agent.request(method, &url),
            |request, (key, value)| request.query(key, value),
        );
        Ok(request.set("Authorization", &format!("Bearer {token}")))
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        debug!("GET {endpoint} {query:?}");
        let response = self
            .request("GET", endpoint, query)?
            .call()
            .map_err(|err| map_ureq_error(endpoint, err))?;
        response.into_json().map_err(|source| ApiError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    fn post_json(&self, endpoint: &str, query: &[(&str, &str)], body: Value) -> Result<(), ApiError> {
        debug!("POST {endpoint} {query:?}");
        self.request("POST", endpoint, query)?
            .send_json(body)
            .map_err(|err| map_ureq_error(endpoint, err))?;
        Ok(())
    }
}

#[derive(Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct SearchResult {
    id: SearchResultId,
    snippet: Option<SearchSnippet>,
}

#[derive(Deserialize)]
struct SearchResultId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    channel_title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Deserialize, Default)]
struct Thumbnails {
    high: Option<Thumbnail>,
    medium: Option<Thumbnail>,
    default: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

impl Thumbnails {
    fn best_url(self) -> String {
        self.high
            .or(self.medium)
            .or(self.default)
            .map(|thumbnail| thumbnail.url)
            .unwrap_or_default()
    }
}

impl SearchResult {
    /// `None` for channel or playlist hits, which carry no video id.
    fn into_record(self) -> Option<VideoRecord> {
        let video_id = self.id.video_id.filter(|id| !id.is_empty())?;
        let snippet = self.snippet?;
        Some(VideoRecord {
            video_id,
            title: unescape_html(&snippet.title),
            channel_id: snippet.channel_id,
            channel_title: unescape_html(&snippet.channel_title),
            thumbnail_url: snippet.thumbnails.best_url(),
        })
    }
}

#[derive(Deserialize)]
struct ChannelItem {
    id: String,
}

#[derive(Deserialize)]
struct RatingItem {
    rating: Rating,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadItem {
    snippet: CommentThreadSnippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentThreadSnippet {
    top_level_comment: TopLevelComment,
}

#[derive(Deserialize)]
struct TopLevelComment {
    snippet: CommentSnippet,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommentSnippet {
    author_channel_id: Option<AuthorChannelId>,
}

#[derive(Deserialize)]
struct AuthorChannelId {
    value: String,
}

/// Search snippets come back HTML-escaped.
fn unescape_html(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

impl YouTubeApi for YouTubeClient {
    fn search_videos(
        &self,
        query: &str,
        published_after: DateTime<Utc>,
        max_results: usize,
    ) -> Result<Vec<VideoRecord>, ApiError> {
        let published_after = published_after.to_rfc3339_opts(SecondsFormat::Secs, true);
        let max_results = max_results.to_string();
        let response: ListResponse<SearchResult> = self.get_json(
            "search",
            &[
                ("part", "snippet"),
                ("q", query),
                ("type", "video"),
                ("publishedAfter", &published_after),
                ("maxResults", &max_results),
            ],
        )?;
        Ok(response
            .items
            .into_iter()
            .filter_map(SearchResult::into_record)
            .collect())
    }

    fn my_channel_id(&self) -> Result<Option<String>, ApiError> {
        let response: ListResponse<ChannelItem> =
            self.get_json("channels", &[("part", "id"), ("mine", "true")])?;
        Ok(response.items.into_iter().next().map(|channel| channel.id))
    }

    fn is_subscribed(&self, channel_id: &str) -> Result<bool, ApiError> {
        let response: ListResponse<IgnoredAny> = self.get_json(
            "subscriptions",
            &[
                ("part", "snippet,contentDetails"),
                ("mine", "true"),
                ("forChannelId", channel_id),
            ],
        )?;
        Ok(!response.items.is_empty())
    }

    fn subscribe(&self, channel_id: &str) -> Result<(), ApiError> {
        self.post_json(
            "subscriptions",
            &[("part", "snippet")],
            json!({
                "snippet": {
                    "resourceId": {
                        "kind": "youtube#channel",
                        "channelId": channel_id,
                    }
                }
            }),
        )
    }

    fn rating(&self, video_id: &str) -> Result<Rating, ApiError> {
        let response: ListResponse<RatingItem> =
            self.get_json("videos/getRating", &[("id", video_id)])?;
        Ok(response
            .items
            .into_iter()
            .next()
            .map(|item| item.rating)
            .unwrap_or(Rating::None))
    }

    fn rate(&self, video_id: &str, rating: Rating) -> Result<(), ApiError> {
        let endpoint = "videos/rate";
        debug!("POST {endpoint} {video_id} {}", rating.as_str());
        self.request("POST", endpoint, &[("id", video_id), ("rating", rating.as_str())])?
            .send_bytes(&[])
            .map_err(|err| map_ureq_error(endpoint, err))?;
        Ok(())
    }

    fn comment_threads(
        &self,
        video_id: &str,
        search_terms: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<CommentPage, ApiError> {
        let page_size = COMMENT_PAGE_SIZE.to_string();
        let mut query = vec![
            ("part", "snippet"),
            ("videoId", video_id),
            ("maxResults", page_size.as_str()),
            ("textFormat", "plainText"),
        ];
        if let Some(terms) = search_terms {
            query.push(("searchTerms", terms));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        let response: ListResponse<CommentThreadItem> = self.get_json("commentThreads", &query)?;
        Ok(CommentPage {
            author_channel_ids: response
                .items
                .into_iter()
                .filter_map(|thread| thread.snippet.top_level_comment.snippet.author_channel_id)
                .map(|author| author.value)
                .collect(),
            next_page_token: response.next_page_token.filter(|token| !token.is_empty()),
        })
    }

    fn post_comment(&self, video_id: &str, text: &str) -> Result<(), ApiError> {
        self.post_json(
            "commentThreads",
            &[("part", "snippet")],
            json!({
                "snippet": {
                    "videoId": video_id,
                    "topLevelComment": {
                        "snippet": { "textOriginal": text }
                    }
                }
            }),
        )
    }
}
