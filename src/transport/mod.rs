//! Story transport: how the loader talks to the reader server.
//!
//! The loader only sees the [`StoryTransport`] trait. [`HttpTransport`] is
//! the production implementation speaking the NewsBlur reader API; tests
//! substitute scripted transports.

mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::story::{FeedContext, Story, StoryId};

pub use http::{HttpTransport, TransportOptions};

/// Errors from a single transport call.
///
/// Every variant is transient from the loader's point of view: a failed page
/// can be retried and a failed reconciliation is rolled back locally.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    #[error("Response too large")]
    ResponseTooLarge,
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Body was not the JSON shape we expect
    #[error("Malformed response: {0}")]
    Decode(String),
    /// Server answered but refused the operation (`"result"` other than `"ok"`)
    #[error("Server rejected request: {0}")]
    Rejected(String),
    #[error("Invalid server URL: {0}")]
    InvalidBaseUrl(String),
    /// The task running the request panicked
    #[error("Request task failed: {0}")]
    TaskFailed(String),
}

impl FetchError {
    /// True when the failure means we could not reach the server at all,
    /// as opposed to the server answering badly.
    pub fn is_connectivity(&self) -> bool {
        match self {
            FetchError::Network(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            FetchError::Timeout => true,
            _ => false,
        }
    }
}

/// Remote side of the loader: page retrieval and flag reconciliation.
///
/// Pages are 1-based, matching the reader API.
#[async_trait]
pub trait StoryTransport: Send + Sync {
    async fn fetch_page(&self, context: &FeedContext, page: u32) -> Result<Vec<Story>, FetchError>;

    async fn mark_read(&self, story_id: &StoryId) -> Result<(), FetchError>;

    async fn mark_unread(&self, story_id: &StoryId) -> Result<(), FetchError>;

    async fn mark_saved(&self, story_id: &StoryId) -> Result<(), FetchError>;

    async fn mark_unsaved(&self, story_id: &StoryId) -> Result<(), FetchError>;

    /// Mark every story in the feed or river as read.
    async fn mark_context_read(&self, context: &FeedContext) -> Result<(), FetchError>;
}
