//! Integration tests for page-by-page loading: fetch state transitions,
//! de-duplication, stale completions and the offline fallback.
//!
//! Each test builds its own loader over a scripted transport and an
//! in-memory SQLite cache.

mod common;

use common::*;
use feedpager::loader::{Applied, PageOutcome, SkipReason};
use feedpager::storage::{Database, OfflineCache};
use feedpager::story::{FeedContext, IntelligenceLevel};
use feedpager::transport::FetchError;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

// ============================================================================
// Page Progression
// ============================================================================

#[tokio::test]
async fn test_full_then_partial_page_finishes() {
    let transport = ScriptedTransport::new();
    transport
        .push_page(Ok(page("a", 20)))
        .push_page(Ok(page("b", 5)));
    let mut h = harness(FeedContext::feed(1), transport).await;
    h.loader = h.loader.with_page_size(20);

    h.loader.reset(FeedContext::feed(1)).await;

    let outcome = h.loader.fetch_next_page().await.unwrap();
    assert_eq!(
        outcome,
        PageOutcome::Loaded {
            added: 20,
            finished: false
        }
    );
    assert_eq!(h.loader.state().current_page(), 1);
    assert!(!h.loader.state().is_finished());

    let outcome = h.loader.fetch_next_page().await.unwrap();
    assert_eq!(
        outcome,
        PageOutcome::Loaded {
            added: 5,
            finished: true
        }
    );
    assert_eq!(h.loader.state().current_page(), 2);
    assert!(h.loader.state().is_finished());

    let outcome = h.loader.fetch_next_page().await.unwrap();
    assert_eq!(outcome, PageOutcome::Skipped(SkipReason::Finished));
    assert_eq!(
        h.transport.fetch_calls(),
        vec![("feed:1".to_string(), 1), ("feed:1".to_string(), 2)]
    );
    assert_eq!(h.loader.stories().len(), 25);
}

#[tokio::test]
async fn test_empty_first_page_finishes() {
    let mut h = harness(FeedContext::feed(1), ScriptedTransport::new()).await;

    let outcome = h.loader.fetch_next_page().await.unwrap();

    assert_eq!(
        outcome,
        PageOutcome::Loaded {
            added: 0,
            finished: true
        }
    );
    // No stories, no stories-added notification
    assert!(h.presenter.added().is_empty());
}

#[tokio::test]
async fn test_no_second_request_while_fetching() {
    let transport = ScriptedTransport::gated();
    transport.push_page(Ok(page("a", 12)));
    let mut h = harness(FeedContext::feed(1), transport).await;

    let ticket = h.loader.request_next_page().unwrap();
    assert_eq!(ticket.page, 1);
    assert!(h.loader.state().is_fetching());

    assert!(h.loader.request_next_page().is_none());
    assert_eq!(
        h.loader.fetch_next_page().await.unwrap(),
        PageOutcome::Skipped(SkipReason::Fetching)
    );

    h.transport.release();
    assert_eq!(h.loader.settle().await, 1);

    assert_eq!(h.transport.fetch_calls().len(), 1);
    assert_eq!(h.loader.state().current_page(), 1);
    assert!(!h.loader.state().is_fetching());
}

#[tokio::test]
async fn test_duplicate_stories_across_pages_are_merged() {
    let transport = ScriptedTransport::new();
    let mut second = page("b", 11);
    let mut updated = story("a:0", 1);
    updated.read = true;
    second.insert(0, updated);
    transport.push_page(Ok(page("a", 12))).push_page(Ok(second));
    let mut h = harness(FeedContext::feed(1), transport).await;

    h.loader.fetch_next_page().await.unwrap();
    let outcome = h.loader.fetch_next_page().await.unwrap();

    assert_eq!(
        outcome,
        PageOutcome::Loaded {
            added: 11,
            finished: false
        }
    );
    assert_eq!(h.loader.stories().len(), 23);
    // Server copy wins, position kept
    let first = h.loader.story_at_row(0).unwrap();
    assert_eq!(first.id.as_str(), "a:0");
    assert!(first.read);
}

#[tokio::test]
async fn test_page_of_known_stories_finishes() {
    let transport = ScriptedTransport::new();
    transport
        .push_page(Ok(page("a", 12)))
        .push_page(Ok(page("a", 12)));
    let mut h = harness(FeedContext::feed(1), transport).await;

    h.loader.fetch_next_page().await.unwrap();
    let outcome = h.loader.fetch_next_page().await.unwrap();

    assert_eq!(
        outcome,
        PageOutcome::Loaded {
            added: 0,
            finished: true
        }
    );
}

#[tokio::test]
async fn test_failed_page_is_retried() {
    let transport = ScriptedTransport::new();
    transport
        .push_page(Ok(page("a", 12)))
        .push_page(Err(FetchError::HttpStatus(502)))
        .push_page(Ok(page("b", 3)));
    let mut h = harness(FeedContext::feed(1), transport).await;

    h.loader.fetch_next_page().await.unwrap();
    let err = h.loader.fetch_next_page().await.unwrap_err();
    assert!(err.to_string().contains("page 2"));

    let state = h.loader.state();
    assert_eq!(state.current_page(), 1);
    assert!(!state.is_fetching());
    assert!(!state.is_finished());
    // Server answered, so still online
    assert!(state.is_online());
    assert_eq!(h.presenter.errors().len(), 1);

    h.loader.fetch_next_page().await.unwrap();
    let pages: Vec<u32> = h.transport.fetch_calls().iter().map(|c| c.1).collect();
    assert_eq!(pages, vec![1, 2, 2]);
    assert!(h.loader.state().is_finished());
}

// ============================================================================
// Reset
// ============================================================================

#[tokio::test]
async fn test_reset_returns_to_page_zero() {
    let transport = ScriptedTransport::new();
    transport.push_page(Ok(page("a", 3)));
    let mut h = harness(FeedContext::feed(1), transport).await;

    h.loader.fetch_next_page().await.unwrap();
    assert!(h.loader.state().is_finished());

    h.loader.reset(FeedContext::feed(2)).await;

    let state = h.loader.state();
    assert_eq!(state.current_page(), 0);
    assert!(!state.is_fetching());
    assert!(!state.is_finished());
    assert!(h.loader.stories().is_empty());
    assert_eq!(h.presenter.last_state(), Some(*state));
}

#[tokio::test]
async fn test_reset_while_fetching_clears_fetching() {
    let transport = ScriptedTransport::gated();
    let mut h = harness(FeedContext::feed(1), transport).await;

    h.loader.request_next_page().unwrap();
    h.loader.reset(FeedContext::feed(1)).await;

    assert!(!h.loader.state().is_fetching());
    assert_eq!(h.loader.state().current_page(), 0);
}

#[tokio::test]
async fn test_stale_page_discarded_after_switching_feeds() {
    let transport = ScriptedTransport::gated();
    transport.push_page(Ok(page("a", 12)));
    let mut h = harness(FeedContext::feed(1), transport).await;

    h.loader.reset(FeedContext::feed(1)).await;
    let stale = h.loader.request_next_page().unwrap();
    h.loader.reset(FeedContext::feed(2)).await;

    h.transport.release();
    match h.loader.process_next().await {
        Some(Applied::Page { ticket, outcome }) => {
            assert_eq!(ticket, stale);
            assert_eq!(outcome.unwrap(), PageOutcome::Discarded);
        }
        other => panic!("Expected page completion, got {:?}", other),
    }

    assert!(h.loader.stories().is_empty());
    assert_eq!(h.loader.state().current_page(), 0);
    assert!(h.presenter.added().is_empty());
    assert_eq!(h.loader.in_flight(), 0);
}

#[tokio::test]
async fn test_stale_page_does_not_complete_new_request() {
    let transport = ScriptedTransport::gated();
    transport
        .push_page(Ok(page("a", 12)))
        .push_page(Ok(page("b", 4)));
    let mut h = harness(FeedContext::feed(1), transport).await;

    h.loader.request_next_page().unwrap();
    h.loader.reset(FeedContext::feed(2)).await;

    // Let the stale request finish before the new one starts
    h.transport.release();
    tokio::task::yield_now().await;
    h.transport.release();
    let outcome = h.loader.fetch_next_page().await.unwrap();

    assert_eq!(
        outcome,
        PageOutcome::Loaded {
            added: 4,
            finished: true
        }
    );
    assert_eq!(ids(h.loader.stories().as_slice())[0], "b:0");
    assert_eq!(h.transport.fetch_calls()[1], ("feed:2".to_string(), 1));
}

// ============================================================================
// Offline Cache
// ============================================================================

#[tokio::test]
async fn test_pages_are_cached_for_offline_use() {
    let transport = ScriptedTransport::new();
    transport
        .push_page(Ok(page("a", 12)))
        .push_page(Ok(page("b", 2)));
    let mut h = harness(FeedContext::feed(1), transport).await;

    h.loader.fetch_next_page().await.unwrap();
    h.loader.fetch_next_page().await.unwrap();

    let cached = h.cache.load_cached(&FeedContext::feed(1)).await.unwrap();
    assert_eq!(cached.len(), 14);
    assert_eq!(cached[12].id.as_str(), "b:0");
}

#[tokio::test]
async fn test_reset_seeds_from_cache_without_network() {
    let cache = Database::open(":memory:").await.unwrap();
    cache
        .save(&FeedContext::feed(1), &page("c", 3))
        .await
        .unwrap();
    let mut h = harness_with_cache(FeedContext::feed(1), ScriptedTransport::new(), cache);

    h.loader.reset(FeedContext::feed(1)).await;

    assert_eq!(h.loader.stories().len(), 3);
    assert_eq!(h.presenter.added(), vec![ids(&page("c", 3))]);
    assert!(h.transport.fetch_calls().is_empty());
    assert!(h.loader.state().is_idle());
}

#[tokio::test]
async fn test_first_online_page_replaces_cached_stories() {
    let cache = Database::open(":memory:").await.unwrap();
    cache
        .save(&FeedContext::feed(1), &page("old", 2))
        .await
        .unwrap();
    let transport = ScriptedTransport::new();
    transport.push_page(Ok(page("new", 12)));
    let mut h = harness_with_cache(FeedContext::feed(1), transport, cache);

    h.loader.reset(FeedContext::feed(1)).await;
    let outcome = h.loader.fetch_next_page().await.unwrap();

    assert_eq!(
        outcome,
        PageOutcome::Loaded {
            added: 12,
            finished: false
        }
    );
    assert_eq!(h.loader.stories().len(), 12);
    assert!(h
        .presenter
        .events()
        .iter()
        .any(|e| matches!(e, Recorded::Replaced(ids) if ids.len() == 12)));

    let cached = h.cache.load_cached(&FeedContext::feed(1)).await.unwrap();
    assert_eq!(ids(&cached), ids(&page("new", 12)));
}

#[tokio::test]
async fn test_cached_stories_refetched_online_do_not_finish() {
    let cache = Database::open(":memory:").await.unwrap();
    cache
        .save(&FeedContext::feed(1), &page("a", 2))
        .await
        .unwrap();
    let transport = ScriptedTransport::new();
    transport.push_page(Ok(page("a", 2)));
    let mut h = harness_with_cache(FeedContext::feed(1), transport, cache);
    h.loader = h.loader.with_page_size(2);

    h.loader.reset(FeedContext::feed(1)).await;
    let outcome = h.loader.fetch_next_page().await.unwrap();

    assert_eq!(
        outcome,
        PageOutcome::Loaded {
            added: 2,
            finished: false
        }
    );
}

#[tokio::test]
async fn test_unreachable_server_goes_offline() {
    let cache = Database::open(":memory:").await.unwrap();
    cache
        .save(&FeedContext::feed(1), &page("c", 2))
        .await
        .unwrap();
    let transport = ScriptedTransport::new();
    transport
        .push_page(Err(FetchError::Timeout))
        .push_page(Ok(page("n", 1)));
    let mut h = harness_with_cache(FeedContext::feed(1), transport, cache);

    let err = h.loader.fetch_next_page().await.unwrap_err();
    assert!(matches!(
        err,
        feedpager::loader::LoaderError::TransientFetch { page: 1, .. }
    ));

    let state = h.loader.state();
    assert!(!state.is_online());
    assert_eq!(state.current_page(), 0);
    assert_eq!(h.loader.stories().len(), 2);
    assert_eq!(h.presenter.errors().len(), 1);

    h.loader.fetch_next_page().await.unwrap();
    assert!(h.loader.state().is_online());
    assert_eq!(ids(h.loader.stories().as_slice()), vec!["n:0"]);
}

// ============================================================================
// Intelligence Filter
// ============================================================================

#[tokio::test]
async fn test_change_intelligence_keeps_state_and_filters_rows() {
    let mut stories = page("a", 3);
    stories[0].score = -1;
    stories[2].score = 1;
    let transport = ScriptedTransport::new();
    transport.push_page(Ok(stories));
    let mut h = harness(FeedContext::feed(1), transport).await;

    h.loader.fetch_next_page().await.unwrap();
    let before = *h.loader.state();
    assert_eq!(h.loader.visible_stories().len(), 2);

    h.loader.change_intelligence(IntelligenceLevel::Focus);

    assert_eq!(*h.loader.state(), before);
    assert_eq!(h.loader.visible_stories().len(), 1);
    assert_eq!(h.loader.story_at_row(0).unwrap().id.as_str(), "a:2");
    assert_eq!(h.transport.fetch_calls().len(), 1);

    h.loader.change_intelligence(IntelligenceLevel::All);
    assert_eq!(h.loader.visible_stories().len(), 3);
    assert_eq!(h.loader.unread_count(), 3);
    assert!(matches!(
        h.presenter.events().last(),
        Some(Recorded::Intelligence(IntelligenceLevel::All))
    ));
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_pages_advance_by_one_until_finished(sizes in prop::collection::vec(0usize..=4, 1..8)) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let transport = ScriptedTransport::new();
            for (n, size) in sizes.iter().enumerate() {
                transport.push_page(Ok(page(&format!("p{}", n), *size)));
            }
            let mut h = harness(FeedContext::feed(1), transport).await;
            h.loader = h.loader.with_page_size(4);

            let mut last_page = 0;
            for _ in 0..sizes.len() + 2 {
                let was_finished = h.loader.state().is_finished();
                let calls_before = h.transport.fetch_calls().len();
                let outcome = h.loader.fetch_next_page().await.unwrap();
                let state = *h.loader.state();

                assert!(!(state.is_fetching() && state.is_finished()));
                if was_finished {
                    assert_eq!(outcome, PageOutcome::Skipped(SkipReason::Finished));
                    assert_eq!(h.transport.fetch_calls().len(), calls_before);
                    assert_eq!(state.current_page(), last_page);
                } else {
                    assert_eq!(state.current_page(), last_page + 1);
                    last_page = state.current_page();
                }
            }

            let loaded = ids(h.loader.stories().as_slice());
            let mut unique = loaded.clone();
            unique.sort();
            unique.dedup();
            assert_eq!(unique.len(), loaded.len());
        });
    }
}
