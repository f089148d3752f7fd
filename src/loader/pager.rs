use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::events::{FlagAction, LoaderError, Presenter};
use super::state::FetchState;
use crate::storage::OfflineCache;
use crate::story::{FeedContext, IntelligenceLevel, StoriesCollection, Story, StoryId};
use crate::transport::{FetchError, StoryTransport};
use crate::util::catch_task_panic;

/// Page size of the NewsBlur reader endpoints.
pub const DEFAULT_PAGE_SIZE: usize = 12;

/// Identity of one issued page request.
///
/// Captured when the request is spawned and carried back with its result,
/// so a completion can be matched against the loader's current stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageTicket {
    /// Loader generation at issue time; bumped by every reset
    pub generation: u64,
    pub context: FeedContext,
    /// 1-based page number sent to the server
    pub page: u32,
}

/// Result of a background request, waiting to be applied by
/// [`PaginatedFeedLoader::handle_completion`].
#[derive(Debug)]
pub(crate) enum Completion {
    Page {
        ticket: PageTicket,
        result: Result<Vec<Story>, FetchError>,
    },
    Reconciled {
        /// Key into the loader's pending flag changes
        request: u64,
        result: Result<(), FetchError>,
    },
}

/// An optimistic flag change the server has not confirmed yet.
#[derive(Debug)]
struct PendingFlag {
    generation: u64,
    action: FlagAction,
    /// Each touched story and its flag value before the optimistic change
    targets: Vec<(StoryId, bool)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A page request for this stream is already outstanding
    Fetching,
    /// The server has no more pages for this stream
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// No request was issued.
    Skipped(SkipReason),
    /// The page was merged. `added` counts stories that were not already in
    /// the collection.
    Loaded { added: usize, finished: bool },
    /// The page belonged to a stream the loader has since been reset away from.
    Discarded,
}

/// What applying a background result did.
#[derive(Debug)]
pub enum Applied {
    /// The result matched no request this loader is waiting on.
    Ignored,
    Page {
        ticket: PageTicket,
        outcome: Result<PageOutcome, LoaderError>,
    },
    Reconciliation {
        action: FlagAction,
        outcome: Result<(), LoaderError>,
    },
}

/// Drives story retrieval for one feed or river, a page at a time.
///
/// All state lives behind `&mut self`. Network work runs on spawned tokio
/// tasks which never touch loader state; their results come back over a
/// channel and are applied by [`process_next`](Self::process_next) (or
/// while awaiting [`fetch_next_page`](Self::fetch_next_page)) on the
/// caller's task. At most one page request of the current stream is
/// outstanding at a time.
///
/// Methods that issue requests spawn onto the current tokio runtime and
/// must be called from within one.
pub struct PaginatedFeedLoader {
    transport: Arc<dyn StoryTransport>,
    cache: Arc<dyn OfflineCache>,
    presenter: Arc<dyn Presenter>,
    page_size: usize,

    context: FeedContext,
    state: FetchState,
    stories: StoriesCollection,
    generation: u64,
    /// Collection currently holds cache contents not yet confirmed by page 1
    offline_seeded: bool,
    /// Page requests spawned and not yet applied, stale ones included
    pending_pages: Vec<PageTicket>,
    /// Flag changes awaiting the server, in issue order
    pending_flags: BTreeMap<u64, PendingFlag>,
    next_request: u64,

    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl PaginatedFeedLoader {
    /// Create a loader for `context` with an empty collection.
    ///
    /// Call [`reset`](Self::reset) (or
    /// [`load_offline_stories`](Self::load_offline_stories)) to seed the
    /// collection from the offline cache.
    pub fn new(
        context: FeedContext,
        transport: Arc<dyn StoryTransport>,
        cache: Arc<dyn OfflineCache>,
        presenter: Arc<dyn Presenter>,
    ) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            cache,
            presenter,
            page_size: DEFAULT_PAGE_SIZE,
            context,
            state: FetchState::default(),
            stories: StoriesCollection::new(),
            generation: 0,
            offline_seeded: false,
            pending_pages: Vec::new(),
            pending_flags: BTreeMap::new(),
            next_request: 0,
            completions_tx,
            completions_rx,
        }
    }

    /// Expected stories per page. A shorter page ends pagination.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn context(&self) -> &FeedContext {
        &self.context
    }

    pub fn stories(&self) -> &StoriesCollection {
        &self.stories
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Requests spawned but not yet applied.
    pub fn in_flight(&self) -> usize {
        self.pending_pages.len() + self.pending_flags.len()
    }

    /// Stories passing the current intelligence filter.
    pub fn visible_stories(&self) -> Vec<&Story> {
        self.stories.visible(self.context.intelligence).collect()
    }

    /// The `row`th visible story, as a list view would index it.
    pub fn story_at_row(&self, row: usize) -> Option<&Story> {
        self.stories.visible(self.context.intelligence).nth(row)
    }

    pub fn unread_count(&self) -> usize {
        self.stories.unread_count(self.context.intelligence)
    }

    /// Why a page request would be refused right now, if it would.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        if self.state.is_fetching() {
            Some(SkipReason::Fetching)
        } else if self.state.is_finished() {
            Some(SkipReason::Finished)
        } else {
            None
        }
    }

    // ========================================================================
    // Stream Lifecycle
    // ========================================================================

    /// Switch to `context` (or restart the current one) at page 0.
    ///
    /// Any request still in flight becomes stale: its completion will be
    /// discarded. The collection is cleared and reseeded from the offline
    /// cache. No network request is made.
    pub async fn reset(&mut self, context: FeedContext) {
        self.generation += 1;
        tracing::debug!(
            from = %self.context,
            to = %context,
            generation = self.generation,
            in_flight = self.in_flight(),
            "Resetting feed loader"
        );

        self.context = context;
        self.state.reset();
        self.stories.clear();
        self.offline_seeded = false;

        self.load_offline_stories().await;
        self.presenter.on_fetch_state_changed(&self.state);
    }

    /// Fill the collection from the offline cache.
    ///
    /// Only acts while offline or before the first page has arrived; once
    /// the server has answered, its stories are authoritative. Awaited
    /// inline: no task is spawned and the fetch state is not touched.
    ///
    /// Returns the number of stories added. Cache errors are logged and
    /// count as an empty cache.
    pub async fn load_offline_stories(&mut self) -> usize {
        if self.state.is_online() && self.state.current_page() > 0 {
            return 0;
        }

        let cached = match self.cache.load_cached(&self.context).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(context = %self.context, error = %e, "Failed to load offline stories");
                return 0;
            }
        };

        let added = self.stories.append(cached);
        if !added.is_empty() {
            self.offline_seeded = true;
            tracing::debug!(context = %self.context, count = added.len(), "Loaded offline stories");
            self.presenter.on_stories_added(&added);
        }
        added.len()
    }

    /// Change the visibility filter. The collection and fetch state are
    /// untouched; the presentation layer re-renders from
    /// [`visible_stories`](Self::visible_stories).
    pub fn change_intelligence(&mut self, level: IntelligenceLevel) {
        tracing::debug!(context = %self.context, level = %level, "Changing intelligence level");
        self.context.intelligence = level;
        self.presenter.on_intelligence_changed(level);
    }

    // ========================================================================
    // Pagination
    // ========================================================================

    /// Issue the request for the next page without waiting for it.
    ///
    /// Returns `None` (and issues nothing) while a page is already being
    /// fetched or after the last page.
    pub fn request_next_page(&mut self) -> Option<PageTicket> {
        if let Some(reason) = self.skip_reason() {
            tracing::trace!(context = %self.context, ?reason, "Page request suppressed");
            return None;
        }

        let page = self.state.current_page() + 1;
        if !self.state.begin_fetch() {
            return None;
        }

        let ticket = PageTicket {
            generation: self.generation,
            context: self.context.clone(),
            page,
        };
        tracing::debug!(context = %self.context, page, generation = self.generation, "Requesting page");

        self.spawn_page_request(ticket.clone());
        self.presenter.on_fetch_state_changed(&self.state);
        Some(ticket)
    }

    /// Fetch the next page and wait until it has been merged.
    ///
    /// Other completions arriving meanwhile (reconciliations, stale pages)
    /// are applied as they come.
    ///
    /// # Errors
    ///
    /// [`LoaderError::TransientFetch`] when the request failed. Pagination is
    /// unchanged and the same page is requested on the next call.
    pub async fn fetch_next_page(&mut self) -> Result<PageOutcome, LoaderError> {
        let Some(ticket) = self.request_next_page() else {
            let reason = self.skip_reason().unwrap_or(SkipReason::Fetching);
            return Ok(PageOutcome::Skipped(reason));
        };

        loop {
            let Some(completion) = self.completions_rx.recv().await else {
                // Unreachable while self holds a sender
                return Ok(PageOutcome::Discarded);
            };

            if let Applied::Page {
                ticket: applied,
                outcome,
            } = self.handle_completion(completion).await
            {
                if applied == ticket {
                    return outcome;
                }
            }
        }
    }

    fn spawn_page_request(&mut self, ticket: PageTicket) {
        let transport = Arc::clone(&self.transport);
        let tx = self.completions_tx.clone();
        self.pending_pages.push(ticket.clone());

        tokio::spawn(async move {
            let result =
                match catch_task_panic(transport.fetch_page(&ticket.context, ticket.page)).await {
                    Ok(result) => result,
                    Err(panic_msg) => {
                        tracing::error!(task = "page_fetch", error = %panic_msg, "Background task panicked");
                        Err(FetchError::TaskFailed(panic_msg))
                    }
                };

            if tx.send(Completion::Page { ticket, result }).is_err() {
                tracing::debug!("Loader dropped before page completion");
            }
        });
    }

    // ========================================================================
    // Completions
    // ========================================================================

    /// Wait for the next background result and apply it.
    ///
    /// Returns `None` immediately when nothing is in flight.
    pub async fn process_next(&mut self) -> Option<Applied> {
        if self.in_flight() == 0 {
            return None;
        }
        let completion = self.completions_rx.recv().await?;
        Some(self.handle_completion(completion).await)
    }

    /// Apply completions until no request is in flight.
    ///
    /// Returns how many were applied.
    pub async fn settle(&mut self) -> usize {
        let mut applied = 0;
        while self.process_next().await.is_some() {
            applied += 1;
        }
        applied
    }

    /// Apply one background result to the loader state.
    ///
    /// This is the only place request results mutate the fetch state or the
    /// collection. Page results from an earlier generation or a different
    /// stream are discarded. Results for requests this loader is not
    /// waiting on are ignored and leave the in-flight count alone.
    pub(crate) async fn handle_completion(&mut self, completion: Completion) -> Applied {
        match completion {
            Completion::Page { ticket, result } => {
                let Some(i) = self.pending_pages.iter().position(|t| *t == ticket) else {
                    tracing::warn!(context = %ticket.context, page = ticket.page, "Ignoring completion for unknown page request");
                    return Applied::Ignored;
                };
                self.pending_pages.swap_remove(i);

                let outcome = self.apply_page(&ticket, result).await;
                Applied::Page { ticket, outcome }
            }
            Completion::Reconciled { request, result } => {
                let Some(pending) = self.pending_flags.remove(&request) else {
                    tracing::warn!(request, "Ignoring completion for unknown flag change");
                    return Applied::Ignored;
                };

                let action = pending.action;
                let outcome = self.apply_reconciliation(pending, result).await;
                Applied::Reconciliation { action, outcome }
            }
        }
    }

    async fn apply_page(
        &mut self,
        ticket: &PageTicket,
        result: Result<Vec<Story>, FetchError>,
    ) -> Result<PageOutcome, LoaderError> {
        let current = ticket.generation == self.generation
            && ticket.context.same_stream(&self.context)
            && self.state.is_fetching();
        if !current {
            tracing::debug!(
                context = %ticket.context,
                page = ticket.page,
                expected = self.generation,
                got = ticket.generation,
                "Ignoring stale page (generation mismatch)"
            );
            return Ok(PageOutcome::Discarded);
        }

        match result {
            Ok(stories) => Ok(self.merge_page(ticket.page, stories).await),
            Err(source) => {
                self.state.fail_fetch();

                if ticket.page == 1 && source.is_connectivity() {
                    tracing::info!(context = %self.context, error = %source, "Server unreachable, going offline");
                    self.state.set_online(false);
                    self.load_offline_stories().await;
                }

                let error = LoaderError::TransientFetch {
                    page: ticket.page,
                    source,
                };
                tracing::warn!(context = %self.context, error = %error, "Page fetch failed");
                self.presenter.on_fetch_state_changed(&self.state);
                self.presenter.on_error(&error);
                Err(error)
            }
        }
    }

    async fn merge_page(&mut self, page: u32, stories: Vec<Story>) -> PageOutcome {
        let received = stories.len();

        if page == 1 {
            if let Err(e) = self.cache.replace(&self.context, &stories).await {
                tracing::warn!(context = %self.context, error = %e, "Failed to cache first page");
            }
        } else if let Err(e) = self.cache.save(&self.context, &stories).await {
            tracing::warn!(context = %self.context, page, error = %e, "Failed to cache page");
        }

        // First online page supersedes whatever the offline cache seeded
        let replacing = page == 1 && self.offline_seeded;
        let added = if replacing {
            self.offline_seeded = false;
            self.stories.replace_all(stories)
        } else {
            self.stories.append(stories)
        };
        self.reapply_pending_flags();

        if replacing {
            self.presenter.on_stories_replaced(self.stories.as_slice());
        } else if !added.is_empty() {
            self.presenter.on_stories_added(&added);
        }
        let added = added.len();

        // A full page of stories we already have means the server is
        // replaying; stop rather than page forever.
        let finished = received < self.page_size || added == 0;
        self.state.complete_page(finished);
        self.state.set_online(true);

        tracing::debug!(
            context = %self.context,
            page,
            received,
            added,
            finished,
            "Page merged"
        );
        self.presenter.on_fetch_state_changed(&self.state);

        PageOutcome::Loaded { added, finished }
    }

    /// A page fetched before a flag change reached the server carries the
    /// old flag; put the optimistic value back on top of it.
    fn reapply_pending_flags(&mut self) {
        for pending in self.pending_flags.values() {
            if pending.generation != self.generation {
                continue;
            }
            for (id, _) in &pending.targets {
                if let Some(story) = self.stories.get_mut(id) {
                    if pending.action.get(story) != pending.action.target() {
                        tracing::debug!(story = %id, action = %pending.action, "Keeping unconfirmed flag change over server copy");
                        pending.action.set(story, pending.action.target());
                    }
                }
            }
        }
    }

    // ========================================================================
    // Read / Saved Flags
    // ========================================================================

    /// Mark a story read locally and on the server.
    ///
    /// Returns `Ok(false)` when the story is already read (nothing sent).
    ///
    /// # Errors
    ///
    /// [`LoaderError::UnknownStory`] if the story is not in the collection.
    /// Server failures arrive later through the presenter, after the flag
    /// has been rolled back.
    pub fn mark_story_read(&mut self, story_id: &StoryId) -> Result<bool, LoaderError> {
        self.mark(story_id, FlagAction::MarkRead)
    }

    pub fn mark_story_unread(&mut self, story_id: &StoryId) -> Result<bool, LoaderError> {
        self.mark(story_id, FlagAction::MarkUnread)
    }

    pub fn mark_as_saved(&mut self, story_id: &StoryId) -> Result<bool, LoaderError> {
        self.mark(story_id, FlagAction::MarkSaved)
    }

    pub fn mark_as_unsaved(&mut self, story_id: &StoryId) -> Result<bool, LoaderError> {
        self.mark(story_id, FlagAction::MarkUnsaved)
    }

    /// Mark every loaded story read and ask the server to mark the whole
    /// feed or river read.
    ///
    /// The request is sent even when everything loaded is already read,
    /// since the server may hold unread stories on pages not fetched yet.
    /// Returns how many loaded stories changed.
    pub fn mark_all_as_read(&mut self) -> usize {
        let action = FlagAction::MarkAllRead;
        let unread: Vec<StoryId> = self
            .stories
            .iter()
            .filter(|s| !s.read)
            .map(|s| s.id.clone())
            .collect();

        let mut targets = Vec::with_capacity(unread.len());
        for id in unread {
            if let Some(story) = self.stories.get_mut(&id) {
                action.set(story, true);
                self.presenter.on_story_changed(story);
                targets.push((id, false));
            }
        }

        let changed = targets.len();
        tracing::debug!(context = %self.context, changed, "Marking all stories read");
        self.spawn_reconciliation(action, targets);
        changed
    }

    fn mark(&mut self, story_id: &StoryId, action: FlagAction) -> Result<bool, LoaderError> {
        let story = self
            .stories
            .get_mut(story_id)
            .ok_or_else(|| LoaderError::UnknownStory(story_id.clone()))?;

        let previous = action.get(story);
        if previous == action.target() {
            return Ok(false);
        }

        action.set(story, action.target());
        self.presenter.on_story_changed(story);
        tracing::debug!(story = %story_id, %action, "Optimistic flag change");

        self.spawn_reconciliation(action, vec![(story_id.clone(), previous)]);
        Ok(true)
    }

    fn spawn_reconciliation(&mut self, action: FlagAction, targets: Vec<(StoryId, bool)>) {
        let transport = Arc::clone(&self.transport);
        let tx = self.completions_tx.clone();
        let context = self.context.clone();
        let ids: Vec<StoryId> = targets.iter().map(|(id, _)| id.clone()).collect();

        let request = self.next_request;
        self.next_request += 1;
        self.pending_flags.insert(
            request,
            PendingFlag {
                generation: self.generation,
                action,
                targets,
            },
        );

        tokio::spawn(async move {
            let call = reconcile(transport.as_ref(), &context, action, &ids);
            let result = match catch_task_panic(call).await {
                Ok(result) => result,
                Err(panic_msg) => {
                    tracing::error!(task = "reconcile", %action, error = %panic_msg, "Background task panicked");
                    Err(FetchError::TaskFailed(panic_msg))
                }
            };

            if tx.send(Completion::Reconciled { request, result }).is_err() {
                tracing::debug!(%action, "Loader dropped before reconciliation completion");
            }
        });
    }

    async fn apply_reconciliation(
        &mut self,
        pending: PendingFlag,
        result: Result<(), FetchError>,
    ) -> Result<(), LoaderError> {
        let PendingFlag {
            generation,
            action,
            targets,
        } = pending;
        let same_stream = generation == self.generation;

        match result {
            Ok(()) => {
                tracing::debug!(%action, count = targets.len(), "Flag change confirmed");
                if same_stream {
                    let confirmed: Vec<Story> = targets
                        .iter()
                        .filter_map(|(id, _)| self.stories.get(id).cloned())
                        .collect();
                    if let Err(e) = self.cache.save(&self.context, &confirmed).await {
                        tracing::warn!(%action, error = %e, "Failed to cache flag change");
                    }
                }
                Ok(())
            }
            Err(source) => {
                if same_stream {
                    for (id, previous) in &targets {
                        if let Some(story) = self.stories.get_mut(id) {
                            action.set(story, *previous);
                            self.presenter.on_story_changed(story);
                        }
                    }
                    tracing::warn!(%action, count = targets.len(), error = %source, "Flag change failed, rolling back");
                } else {
                    tracing::warn!(%action, error = %source, "Flag change failed after stream switch, nothing to roll back");
                }

                let story_id = match action {
                    FlagAction::MarkAllRead => None,
                    _ => targets.into_iter().next().map(|(id, _)| id),
                };
                let error = LoaderError::Reconciliation {
                    story_id,
                    action,
                    source,
                };
                self.presenter.on_error(&error);
                Err(error)
            }
        }
    }
}

async fn reconcile(
    transport: &dyn StoryTransport,
    context: &FeedContext,
    action: FlagAction,
    targets: &[StoryId],
) -> Result<(), FetchError> {
    if action == FlagAction::MarkAllRead {
        return transport.mark_context_read(context).await;
    }

    let Some(story_id) = targets.first() else {
        return Ok(());
    };
    match action {
        FlagAction::MarkRead => transport.mark_read(story_id).await,
        FlagAction::MarkUnread => transport.mark_unread(story_id).await,
        FlagAction::MarkSaved => transport.mark_saved(story_id).await,
        FlagAction::MarkUnsaved => transport.mark_unsaved(story_id).await,
        FlagAction::MarkAllRead => transport.mark_context_read(context).await,
    }
}
