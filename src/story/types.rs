use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

// ============================================================================
// Story Identity
// ============================================================================

/// Server-assigned story hash (`<feed_id>:<guid_hash>` on NewsBlur).
///
/// Unique across feeds, which is what lets a river collection key stories
/// from many sources by id alone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoryId(Arc<str>);

impl StoryId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoryId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for StoryId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

// ============================================================================
// Story
// ============================================================================

/// A story as fetched from the server or restored from the offline cache.
///
/// Everything except `read` and `saved` is fixed once fetched. Those two flags
/// are flipped optimistically by the loader and reconciled with the server.
///
/// String fields use `Arc<str>` so that handing stories to the presentation
/// layer is a refcount bump.
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub id: StoryId,
    pub feed_id: i64,
    pub title: Arc<str>,
    pub content: Option<Arc<str>>,
    pub permalink: Option<Arc<str>>,
    pub image_urls: Vec<Arc<str>>,
    /// Publish time, unix seconds. Ordering key within a page.
    pub published: i64,
    /// Classifier score: -1 (hidden), 0 (neutral), 1 (focus).
    pub score: i8,
    pub read: bool,
    pub saved: bool,
}

impl Story {
    /// Minimal unread, unsaved, neutral story. Transports build stories
    /// field by field instead.
    pub fn new(id: impl Into<StoryId>, feed_id: i64, title: &str) -> Self {
        Self {
            id: id.into(),
            feed_id,
            title: Arc::from(title),
            content: None,
            permalink: None,
            image_urls: Vec::new(),
            published: 0,
            score: 0,
            read: false,
            saved: false,
        }
    }

    pub fn is_visible_at(&self, level: IntelligenceLevel) -> bool {
        level.admits(self.score)
    }
}

// ============================================================================
// Intelligence
// ============================================================================

#[derive(Debug, Error)]
#[error("Intelligence level must be -1, 0 or 1 (got {0})")]
pub struct InvalidIntelligence(pub i64);

/// Visibility filter applied on top of a story collection.
///
/// `All` shows everything including stories the user trained down,
/// `Neutral` hides negatively scored stories, `Focus` shows only stories
/// the user trained up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(try_from = "i64")]
pub enum IntelligenceLevel {
    All,
    #[default]
    Neutral,
    Focus,
}

impl IntelligenceLevel {
    pub fn as_i8(self) -> i8 {
        match self {
            IntelligenceLevel::All => -1,
            IntelligenceLevel::Neutral => 0,
            IntelligenceLevel::Focus => 1,
        }
    }

    pub fn admits(self, score: i8) -> bool {
        score >= self.as_i8()
    }
}

impl TryFrom<i64> for IntelligenceLevel {
    type Error = InvalidIntelligence;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(IntelligenceLevel::All),
            0 => Ok(IntelligenceLevel::Neutral),
            1 => Ok(IntelligenceLevel::Focus),
            other => Err(InvalidIntelligence(other)),
        }
    }
}

impl fmt::Display for IntelligenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IntelligenceLevel::All => "all",
            IntelligenceLevel::Neutral => "neutral",
            IntelligenceLevel::Focus => "focus",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Feed Context
// ============================================================================

/// Where a story stream comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FeedSource {
    Feed(i64),
    /// Aggregate of several feeds. Ids are kept sorted and unique so two
    /// rivers over the same feeds compare equal.
    River(Vec<i64>),
}

/// A feed or river plus the visibility filter the user has selected for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedContext {
    pub source: FeedSource,
    pub intelligence: IntelligenceLevel,
}

impl FeedContext {
    pub fn feed(feed_id: i64) -> Self {
        Self {
            source: FeedSource::Feed(feed_id),
            intelligence: IntelligenceLevel::default(),
        }
    }

    pub fn river(feed_ids: impl IntoIterator<Item = i64>) -> Self {
        let mut ids: Vec<i64> = feed_ids.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            source: FeedSource::River(ids),
            intelligence: IntelligenceLevel::default(),
        }
    }

    pub fn with_intelligence(mut self, level: IntelligenceLevel) -> Self {
        self.intelligence = level;
        self
    }

    pub fn is_river(&self) -> bool {
        matches!(self.source, FeedSource::River(_))
    }

    /// Stable key used to address this stream in the offline cache.
    ///
    /// Independent of the intelligence level: filtering never changes which
    /// stories belong to a stream.
    pub fn key(&self) -> String {
        match &self.source {
            FeedSource::Feed(id) => format!("feed:{id}"),
            FeedSource::River(ids) => {
                let joined: Vec<String> = ids.iter().map(i64::to_string).collect();
                format!("river:{}", joined.join(","))
            }
        }
    }

    /// True when both contexts address the same stream, ignoring the filter.
    pub fn same_stream(&self, other: &FeedContext) -> bool {
        self.source == other.source
    }
}

impl fmt::Display for FeedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
