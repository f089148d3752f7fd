use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

use super::state::FetchState;
use crate::story::{IntelligenceLevel, Story, StoryId};
use crate::transport::FetchError;

// ============================================================================
// Errors
// ============================================================================

/// A user-visible flag change that is reconciled with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagAction {
    MarkRead,
    MarkUnread,
    MarkSaved,
    MarkUnsaved,
    /// Every story in the current feed or river
    MarkAllRead,
}

impl FlagAction {
    /// Flag value the action moves a story to.
    pub(crate) fn target(self) -> bool {
        matches!(
            self,
            FlagAction::MarkRead | FlagAction::MarkSaved | FlagAction::MarkAllRead
        )
    }

    pub(crate) fn get(self, story: &Story) -> bool {
        match self {
            FlagAction::MarkRead | FlagAction::MarkUnread | FlagAction::MarkAllRead => story.read,
            FlagAction::MarkSaved | FlagAction::MarkUnsaved => story.saved,
        }
    }

    pub(crate) fn set(self, story: &mut Story, value: bool) {
        match self {
            FlagAction::MarkRead | FlagAction::MarkUnread | FlagAction::MarkAllRead => {
                story.read = value
            }
            FlagAction::MarkSaved | FlagAction::MarkUnsaved => story.saved = value,
        }
    }
}

impl fmt::Display for FlagAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlagAction::MarkRead => "mark as read",
            FlagAction::MarkUnread => "mark as unread",
            FlagAction::MarkSaved => "save",
            FlagAction::MarkUnsaved => "unsave",
            FlagAction::MarkAllRead => "mark all as read",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by the loader. None of them leave the loader unusable.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// A page request failed. The page was not consumed and can be retried.
    #[error("Failed to load page {page}: {source}")]
    TransientFetch {
        page: u32,
        #[source]
        source: FetchError,
    },

    /// The server did not accept a flag change; the local flag was reverted.
    #[error("Failed to {action} on the server: {source}")]
    Reconciliation {
        /// `None` for [`FlagAction::MarkAllRead`]
        story_id: Option<StoryId>,
        action: FlagAction,
        #[source]
        source: FetchError,
    },

    #[error("Story {0} is not in the current collection")]
    UnknownStory(StoryId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientFetch,
    Reconciliation,
    UnknownStory,
}

impl LoaderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LoaderError::TransientFetch { .. } => ErrorKind::TransientFetch,
            LoaderError::Reconciliation { .. } => ErrorKind::Reconciliation,
            LoaderError::UnknownStory(_) => ErrorKind::UnknownStory,
        }
    }
}

// ============================================================================
// Presentation
// ============================================================================

/// Receiver of loader notifications (the UI layer, a CLI printer, a test
/// recorder). Called synchronously on the loader's controlling task, so
/// implementations should hand work off rather than block.
pub trait Presenter: Send + Sync {
    /// Stories appended to the end of the collection.
    fn on_stories_added(&self, stories: &[Story]);

    /// The collection was rebuilt (first online page after an offline
    /// seed); `stories` is the full new contents.
    fn on_stories_replaced(&self, stories: &[Story]);

    fn on_fetch_state_changed(&self, state: &FetchState);

    fn on_error(&self, error: &LoaderError);

    /// A read/saved flag changed locally (optimistic update or rollback).
    fn on_story_changed(&self, _story: &Story) {}

    fn on_intelligence_changed(&self, _level: IntelligenceLevel) {}
}

/// Owned form of every [`Presenter`] callback.
#[derive(Debug, Clone)]
pub enum LoaderEvent {
    StoriesAdded(Vec<Story>),
    StoriesReplaced(Vec<Story>),
    FetchStateChanged(FetchState),
    StoryChanged(Story),
    IntelligenceChanged(IntelligenceLevel),
    /// Errors travel as strings because the underlying transport errors
    /// are not `Clone`.
    Error { kind: ErrorKind, message: String },
}

/// [`Presenter`] that forwards every callback as a [`LoaderEvent`] over a
/// channel, for consumers running their own event loop.
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    tx: mpsc::UnboundedSender<LoaderEvent>,
}

impl ChannelPresenter {
    pub fn new(tx: mpsc::UnboundedSender<LoaderEvent>) -> Self {
        Self { tx }
    }

    /// Presenter plus the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoaderEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: LoaderEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Channel send failed (receiver dropped)");
        }
    }
}

impl Presenter for ChannelPresenter {
    fn on_stories_added(&self, stories: &[Story]) {
        self.send(LoaderEvent::StoriesAdded(stories.to_vec()));
    }

    fn on_stories_replaced(&self, stories: &[Story]) {
        self.send(LoaderEvent::StoriesReplaced(stories.to_vec()));
    }

    fn on_fetch_state_changed(&self, state: &FetchState) {
        self.send(LoaderEvent::FetchStateChanged(*state));
    }

    fn on_error(&self, error: &LoaderError) {
        self.send(LoaderEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn on_story_changed(&self, story: &Story) {
        self.send(LoaderEvent::StoryChanged(story.clone()));
    }

    fn on_intelligence_changed(&self, level: IntelligenceLevel) {
        self.send(LoaderEvent::IntelligenceChanged(level));
    }
}
