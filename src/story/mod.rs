//! Story data model shared by the loader, transports and the offline cache.
//!
//! - [`Story`] / [`StoryId`] - a single fetched story and its server hash
//! - [`FeedContext`] - a feed or river plus its intelligence filter
//! - [`StoriesCollection`] - ordered, id-unique story list for one stream

mod collection;
mod types;

pub use collection::StoriesCollection;
pub use types::{FeedContext, FeedSource, IntelligenceLevel, InvalidIntelligence, Story, StoryId};
