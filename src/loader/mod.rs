//! Paginated story loading for a feed or river.
//!
//! [`PaginatedFeedLoader`] owns the [`FetchState`] and the story collection
//! for one stream at a time. It fetches pages through a
//! [`StoryTransport`](crate::transport::StoryTransport), falls back to an
//! [`OfflineCache`](crate::storage::OfflineCache) when the server cannot be
//! reached, and reports every change to a [`Presenter`].
//!
//! Background results are tagged with the generation they were issued under
//! so a reset makes late answers harmless.

mod events;
mod pager;
mod state;

pub use events::{ChannelPresenter, ErrorKind, FlagAction, LoaderError, LoaderEvent, Presenter};
pub use pager::{
    Applied, PageOutcome, PageTicket, PaginatedFeedLoader, SkipReason,
    DEFAULT_PAGE_SIZE,
};
pub use state::FetchState;
