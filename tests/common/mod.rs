//! Test doubles shared by the loader integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use feedpager::loader::{FetchState, LoaderError, PaginatedFeedLoader, Presenter};
use feedpager::storage::Database;
use feedpager::story::{FeedContext, IntelligenceLevel, Story, StoryId};
use feedpager::transport::{FetchError, StoryTransport};

pub fn story(id: &str, feed_id: i64) -> Story {
    let mut story = Story::new(id, feed_id, &format!("Story {}", id));
    story.published = 1704067200;
    story
}

/// `count` stories with ids `{prefix}:0..count` in feed 1.
pub fn page(prefix: &str, count: usize) -> Vec<Story> {
    (0..count)
        .map(|i| story(&format!("{}:{}", prefix, i), 1))
        .collect()
}

pub fn ids(stories: &[Story]) -> Vec<String> {
    stories.iter().map(|s| s.id.as_str().to_string()).collect()
}

// ============================================================================
// Scripted Transport
// ============================================================================

/// Transport answering from queued responses, in call order.
///
/// Page fetches with nothing queued return an empty page; mark calls with
/// nothing queued succeed. A gated transport holds every fetch until
/// [`release`](Self::release) is called; with gated marks, every mark call
/// waits for [`release_mark`](Self::release_mark).
#[derive(Default)]
pub struct ScriptedTransport {
    pages: Mutex<VecDeque<Result<Vec<Story>, FetchError>>>,
    marks: Mutex<VecDeque<Result<(), FetchError>>>,
    fetch_calls: Mutex<Vec<(String, u32)>>,
    mark_calls: Mutex<Vec<(&'static str, String)>>,
    gate: Option<Semaphore>,
    mark_gate: Option<Semaphore>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn gated_marks() -> Self {
        Self {
            mark_gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    pub fn push_page(&self, result: Result<Vec<Story>, FetchError>) -> &Self {
        self.pages.lock().unwrap().push_back(result);
        self
    }

    pub fn push_mark(&self, result: Result<(), FetchError>) -> &Self {
        self.marks.lock().unwrap().push_back(result);
        self
    }

    /// Let one held fetch through.
    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    /// Let one held mark call through.
    pub fn release_mark(&self) {
        if let Some(gate) = &self.mark_gate {
            gate.add_permits(1);
        }
    }

    pub fn fetch_calls(&self) -> Vec<(String, u32)> {
        self.fetch_calls.lock().unwrap().clone()
    }

    pub fn mark_calls(&self) -> Vec<(&'static str, String)> {
        self.mark_calls.lock().unwrap().clone()
    }

    async fn mark(&self, name: &'static str, target: &str) -> Result<(), FetchError> {
        self.mark_calls
            .lock()
            .unwrap()
            .push((name, target.to_string()));
        if let Some(gate) = &self.mark_gate {
            gate.acquire().await.unwrap().forget();
        }
        self.marks.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl StoryTransport for ScriptedTransport {
    async fn fetch_page(&self, context: &FeedContext, page: u32) -> Result<Vec<Story>, FetchError> {
        self.fetch_calls.lock().unwrap().push((context.key(), page));
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        self.pages.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn mark_read(&self, story_id: &StoryId) -> Result<(), FetchError> {
        self.mark("read", story_id.as_str()).await
    }

    async fn mark_unread(&self, story_id: &StoryId) -> Result<(), FetchError> {
        self.mark("unread", story_id.as_str()).await
    }

    async fn mark_saved(&self, story_id: &StoryId) -> Result<(), FetchError> {
        self.mark("saved", story_id.as_str()).await
    }

    async fn mark_unsaved(&self, story_id: &StoryId) -> Result<(), FetchError> {
        self.mark("unsaved", story_id.as_str()).await
    }

    async fn mark_context_read(&self, context: &FeedContext) -> Result<(), FetchError> {
        self.mark("context_read", &context.key()).await
    }
}

// ============================================================================
// Recording Presenter
// ============================================================================

#[derive(Debug, Clone)]
pub enum Recorded {
    Added(Vec<String>),
    Replaced(Vec<String>),
    State(FetchState),
    Error(String),
    Changed(String, bool, bool),
    Intelligence(IntelligenceLevel),
}

#[derive(Default)]
pub struct RecordingPresenter {
    events: Mutex<Vec<Recorded>>,
}

impl RecordingPresenter {
    pub fn events(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Error(msg) => Some(msg),
                _ => None,
            })
            .collect()
    }

    pub fn added(&self) -> Vec<Vec<String>> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Recorded::Added(ids) => Some(ids),
                _ => None,
            })
            .collect()
    }

    pub fn last_state(&self) -> Option<FetchState> {
        self.events().into_iter().rev().find_map(|e| match e {
            Recorded::State(state) => Some(state),
            _ => None,
        })
    }

    fn push(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }
}

impl Presenter for RecordingPresenter {
    fn on_stories_added(&self, stories: &[Story]) {
        self.push(Recorded::Added(ids(stories)));
    }

    fn on_stories_replaced(&self, stories: &[Story]) {
        self.push(Recorded::Replaced(ids(stories)));
    }

    fn on_fetch_state_changed(&self, state: &FetchState) {
        self.push(Recorded::State(*state));
    }

    fn on_error(&self, error: &LoaderError) {
        self.push(Recorded::Error(error.to_string()));
    }

    fn on_story_changed(&self, story: &Story) {
        self.push(Recorded::Changed(
            story.id.as_str().to_string(),
            story.read,
            story.saved,
        ));
    }

    fn on_intelligence_changed(&self, level: IntelligenceLevel) {
        self.push(Recorded::Intelligence(level));
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub loader: PaginatedFeedLoader,
    pub transport: Arc<ScriptedTransport>,
    pub cache: Database,
    pub presenter: Arc<RecordingPresenter>,
}

pub async fn harness(context: FeedContext, transport: ScriptedTransport) -> Harness {
    let cache = Database::open(":memory:").await.unwrap();
    harness_with_cache(context, transport, cache)
}

pub fn harness_with_cache(
    context: FeedContext,
    transport: ScriptedTransport,
    cache: Database,
) -> Harness {
    let transport = Arc::new(transport);
    let presenter = Arc::new(RecordingPresenter::default());
    let loader = PaginatedFeedLoader::new(
        context,
        transport.clone(),
        Arc::new(cache.clone()),
        presenter.clone(),
    );
    Harness {
        loader,
        transport,
        cache,
        presenter,
    }
}
