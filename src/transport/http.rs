use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::{FetchError, StoryTransport};
use crate::story::{FeedContext, FeedSource, Story, StoryId};
use crate::util::validate_base_url;

const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024; // 10MB
const SESSION_COOKIE: &str = "newsblur_sessionid";

/// Knobs for [`HttpTransport`]. Built from [`crate::config::Config`] by the
/// binary; tests shrink the backoff.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    /// First backoff delay; doubles per retry (base, 2*base, 4*base...)
    pub backoff_base: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

/// [`StoryTransport`] over the NewsBlur reader HTTP API.
///
/// - `GET  /reader/feed/{id}?page=N`
/// - `GET  /reader/river_stories?feeds=..&page=N`
/// - `POST /reader/mark_story_hashes_as_read` and friends for flag changes
///
/// Requests retry on 429, 5xx and truncated bodies with exponential backoff.
/// Bodies are capped at 10MB.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    session: Option<Arc<SecretString>>,
    options: TransportOptions,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url.as_str())
            .field("session", &self.session.as_ref().map(|_| "[REDACTED]"))
            .field("options", &self.options)
            .finish()
    }
}

impl HttpTransport {
    /// Create a transport for `base_url`.
    ///
    /// # Errors
    ///
    /// [`FetchError::InvalidBaseUrl`] when the URL does not parse or is plain
    /// HTTP to anything other than localhost (the session cookie would leak).
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        session: Option<SecretString>,
        options: TransportOptions,
    ) -> Result<Self, FetchError> {
        let mut base_url =
            validate_base_url(base_url).map_err(|e| FetchError::InvalidBaseUrl(e.to_string()))?;
        // Url::join treats a path without trailing slash as a file
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            session: session.map(Arc::new),
            options,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        self.base_url
            .join(path)
            .map_err(|e| FetchError::InvalidBaseUrl(e.to_string()))
    }

    fn page_url(&self, context: &FeedContext, page: u32) -> Result<Url, FetchError> {
        let mut url = match &context.source {
            FeedSource::Feed(id) => self.endpoint(&format!("reader/feed/{id}"))?,
            FeedSource::River(ids) => {
                let mut url = self.endpoint("reader/river_stories")?;
                {
                    let mut pairs = url.query_pairs_mut();
                    for id in ids {
                        pairs.append_pair("feeds", &id.to_string());
                    }
                }
                url
            }
        };
        url.query_pairs_mut()
            .append_pair("page", &page.to_string());
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: &Url) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, url.as_str());
        if let Some(session) = &self.session {
            request = request.header(
                reqwest::header::COOKIE,
                format!("{}={}", SESSION_COOKIE, session.expose_secret()),
            );
        }
        request
    }

    /// Send a request built by `build`, retrying transient failures.
    ///
    /// `build` is called once per attempt because a `RequestBuilder` cannot be
    /// reused after `send()`.
    async fn send_with_retry<F>(&self, build: F) -> Result<Vec<u8>, FetchError>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let max_retries = self.options.max_retries;
        let mut retry_count = 0;

        loop {
            let delay = backoff_delay(self.options.backoff_base, retry_count);

            let response = tokio::time::timeout(self.options.timeout, build().send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                if retry_count >= max_retries {
                    return Err(FetchError::RateLimited(max_retries));
                }
                tracing::warn!(
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            if status.is_server_error() {
                if retry_count >= max_retries {
                    return Err(FetchError::HttpStatus(status.as_u16()));
                }
                tracing::warn!(
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Server error, retrying after delay"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx fails immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, MAX_RESPONSE_SIZE).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < max_retries =>
                {
                    tracing::debug!(
                        expected,
                        received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// POST a form to a flag-changing endpoint and check `{"result": "ok"}`.
    async fn post_form(&self, path: &str, pairs: &[(&str, String)]) -> Result<(), FetchError> {
        let url = self.endpoint(path)?;
        let body = {
            let mut serializer = url::form_urlencoded::Serializer::new(String::new());
            for (key, value) in pairs {
                serializer.append_pair(key, value);
            }
            serializer.finish()
        };

        let bytes = self
            .send_with_retry(|| {
                self.request(reqwest::Method::POST, &url)
                    .header(
                        reqwest::header::CONTENT_TYPE,
                        "application/x-www-form-urlencoded",
                    )
                    .body(body.clone())
            })
            .await?;

        let reply: ResultReply =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
        match reply.result.as_deref() {
            Some("ok") => Ok(()),
            Some(other) => Err(FetchError::Rejected(other.to_string())),
            None => Err(FetchError::Rejected(
                reply.message.unwrap_or_else(|| "no result field".to_string()),
            )),
        }
    }
}

#[async_trait]
impl StoryTransport for HttpTransport {
    async fn fetch_page(&self, context: &FeedContext, page: u32) -> Result<Vec<Story>, FetchError> {
        let url = self.page_url(context, page)?;
        tracing::debug!(context = %context, page, "Fetching story page");

        let bytes = self
            .send_with_retry(|| self.request(reqwest::Method::GET, &url))
            .await?;

        parse_stories(&bytes)
    }

    async fn mark_read(&self, story_id: &StoryId) -> Result<(), FetchError> {
        self.post_form(
            "reader/mark_story_hashes_as_read",
            &[("story_hash", story_id.to_string())],
        )
        .await
    }

    async fn mark_unread(&self, story_id: &StoryId) -> Result<(), FetchError> {
        self.post_form(
            "reader/mark_story_hash_as_unread",
            &[("story_hash", story_id.to_string())],
        )
        .await
    }

    async fn mark_saved(&self, story_id: &StoryId) -> Result<(), FetchError> {
        self.post_form(
            "reader/mark_story_hash_as_starred",
            &[("story_hash", story_id.to_string())],
        )
        .await
    }

    async fn mark_unsaved(&self, story_id: &StoryId) -> Result<(), FetchError> {
        self.post_form(
            "reader/mark_story_hash_as_unstarred",
            &[("story_hash", story_id.to_string())],
        )
        .await
    }

    async fn mark_context_read(&self, context: &FeedContext) -> Result<(), FetchError> {
        let pairs: Vec<(&str, String)> = match &context.source {
            FeedSource::Feed(id) => vec![("feed_id", id.to_string())],
            FeedSource::River(ids) => ids.iter().map(|id| ("feed_id", id.to_string())).collect(),
        };
        self.post_form("reader/mark_feed_as_read", &pairs).await
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

// ============================================================================
// Wire Format
// ============================================================================

#[derive(Debug, Deserialize)]
struct ResultReply {
    result: Option<String>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StoriesReply {
    stories: Vec<WireStory>,
}

#[derive(Debug, Deserialize)]
struct WireStory {
    story_hash: String,
    story_feed_id: i64,
    #[serde(default)]
    story_title: String,
    story_content: Option<String>,
    story_permalink: Option<String>,
    #[serde(default)]
    image_urls: Vec<String>,
    /// The server sends this as a string of unix seconds
    #[serde(default)]
    story_timestamp: Option<WireTimestamp>,
    #[serde(default)]
    read_status: i64,
    #[serde(default)]
    starred: bool,
    #[serde(default)]
    intelligence: WireIntelligence,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Int(i64),
    Text(String),
}

impl WireTimestamp {
    fn seconds(&self) -> i64 {
        match self {
            WireTimestamp::Int(n) => *n,
            WireTimestamp::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

/// Per-classifier scores. Each is negative, zero or positive.
#[derive(Debug, Default, Deserialize)]
struct WireIntelligence {
    #[serde(default)]
    feed: i64,
    #[serde(default)]
    author: i64,
    #[serde(default)]
    tags: i64,
    #[serde(default)]
    title: i64,
}

impl WireIntelligence {
    /// Collapse the classifier breakdown into a single -1/0/1 score.
    ///
    /// Any positive author/tag/title classifier wins, then any negative one,
    /// and only when those are all neutral does the feed-level score count.
    fn score(&self) -> i8 {
        let max = self.author.max(self.tags).max(self.title);
        let min = self.author.min(self.tags).min(self.title);
        let score = if max > 0 {
            max
        } else if min < 0 {
            min
        } else {
            self.feed
        };
        score.signum() as i8
    }
}

impl From<WireStory> for Story {
    fn from(wire: WireStory) -> Self {
        Story {
            id: StoryId::from(wire.story_hash),
            feed_id: wire.story_feed_id,
            title: Arc::from(wire.story_title),
            content: wire.story_content.map(Arc::from),
            permalink: wire.story_permalink.map(Arc::from),
            image_urls: wire.image_urls.into_iter().map(Arc::from).collect(),
            published: wire.story_timestamp.map(|t| t.seconds()).unwrap_or(0),
            score: wire.intelligence.score(),
            read: wire.read_status != 0,
            saved: wire.starred,
        }
    }
}

fn parse_stories(bytes: &[u8]) -> Result<Vec<Story>, FetchError> {
    let reply: StoriesReply =
        serde_json::from_slice(bytes).map_err(|e| FetchError::Decode(e.to_string()))?;
    Ok(reply.stories.into_iter().map(Story::from).collect())
}

/// `base * 2^retry`, saturating instead of overflowing on large retry counts.
fn backoff_delay(base: Duration, retry: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(retry))
}
