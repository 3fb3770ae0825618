mod common;

use std::time::Duration;

use async_trait::async_trait;
use common::{message, FakeStore, Scripted, DAY_D_MS};
use mailstats::config::FetchConfig;
use mailstats::error::StoreError;
use mailstats::gmail_client::classify_error;
use mailstats::stats::fetcher::{BatchFetcher, RetryPolicy};
use mailstats::stats::request_tracker::RequestTracker;
use mailstats::stats::store::{DetailLevel, ListPage, MessageId, MessageMetadata, MessageStore};
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn no_pacing() -> FetchConfig {
    FetchConfig {
        batch_delay: Duration::ZERO,
        sleep_every_n_batches: 0,
        ..FetchConfig::default()
    }
}

#[tokio::test]
async fn test_25_ids_make_three_groups() {
    let store = FakeStore::with_pages(1, 25);
    let ids = store.all_ids();
    let mut tracker = RequestTracker::new();

    let outcome = BatchFetcher::new(&store, no_pacing())
        .fetch_metadata(&ids, false, &mut tracker)
        .await
        .unwrap();

    assert_eq!(store.batch_sizes(), vec![10, 10, 5]);
    assert_eq!(outcome.groups, 3);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.messages.len(), 25);
    assert_eq!(tracker.count("users.messages.get"), 25);
}

#[tokio::test]
async fn test_empty_input_makes_no_requests() {
    let store = FakeStore::new();
    let mut tracker = RequestTracker::new();

    let outcome = BatchFetcher::new(&store, no_pacing())
        .fetch_metadata(&[], true, &mut tracker)
        .await
        .unwrap();

    assert!(outcome.messages.is_empty());
    assert!(store.batch_sizes().is_empty());
    assert_eq!(tracker.total(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_always_throttled_group_gives_up_after_max_attempts() {
    let store = FakeStore::with_pages(1, 10).script(&[Scripted::RateLimited; 10]);
    let ids = store.all_ids();
    let mut tracker = RequestTracker::new();
    let config = FetchConfig {
        retry: RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        },
        ..no_pacing()
    };

    let started = Instant::now();
    let result = BatchFetcher::new(&store, config)
        .fetch_metadata(&ids, false, &mut tracker)
        .await;

    let err = assert_err!(result);
    assert!(err.is_rate_limited());
    assert_eq!(store.batch_sizes().len(), 5);
    // Backoff 1 + 2 + 4 + 8 seconds between the five attempts
    assert_eq!(started.elapsed().as_secs(), 15);
    assert_eq!(tracker.count("users.messages.get"), 50);
}

#[tokio::test(start_paused = true)]
async fn test_group_succeeding_on_third_attempt() {
    let store = FakeStore::with_pages(1, 10).script(&[Scripted::RateLimited, Scripted::RateLimited]);
    let ids = store.all_ids();
    let mut tracker = RequestTracker::new();

    let started = Instant::now();
    let outcome = assert_ok!(
        BatchFetcher::new(&store, no_pacing())
            .fetch_metadata(&ids, false, &mut tracker)
            .await
    );

    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.messages.len(), 10);
    assert_eq!(store.batch_sizes(), vec![10, 10, 10]);
    assert_eq!(started.elapsed().as_secs(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_is_not_retried() {
    let store = FakeStore::with_pages(1, 20).script(&[Scripted::Ok, Scripted::Transport]);
    let ids = store.all_ids();
    let mut tracker = RequestTracker::new();

    let result = BatchFetcher::new(&store, no_pacing())
        .fetch_metadata(&ids, false, &mut tracker)
        .await;

    assert!(matches!(result, Err(StoreError::TransportFailed(_))));
    assert_eq!(store.batch_sizes(), vec![10, 10]);
}

#[tokio::test]
async fn test_partial_item_failures_are_dropped() {
    let store = FakeStore::with_pages(1, 10).failing_items(&["p0_3", "p0_7"]);
    let ids = store.all_ids();
    let mut tracker = RequestTracker::new();

    let outcome = BatchFetcher::new(&store, no_pacing())
        .fetch_metadata(&ids, false, &mut tracker)
        .await
        .unwrap();

    assert_eq!(outcome.messages.len(), 8);
    assert_eq!(outcome.failed_items, 2);
    assert!(outcome.messages.iter().all(|m| m.id != "p0_3" && m.id != "p0_7"));
}

#[tokio::test(start_paused = true)]
async fn test_pacing_delays() {
    let store = FakeStore::with_pages(1, 50);
    let ids = store.all_ids();
    let mut tracker = RequestTracker::new();
    let config = FetchConfig {
        batch_size: 10,
        batch_delay: Duration::from_millis(250),
        sleep_every_n_batches: 2,
        sleep_long_duration: Duration::from_secs(2),
        ..FetchConfig::default()
    };

    let started = Instant::now();
    BatchFetcher::new(&store, config)
        .fetch_metadata(&ids, false, &mut tracker)
        .await
        .unwrap();

    // 5 groups: 5 short delays plus long pauses after groups 2 and 4
    let expected = Duration::from_millis(5 * 250 + 2 * 2000);
    let elapsed = started.elapsed();
    assert!(elapsed >= expected && elapsed < expected + Duration::from_millis(50), "elapsed={:?}", elapsed);
}

/// Store relying on the default per-item `batch_get`.
struct ItemStore;

#[async_trait]
impl MessageStore for ItemStore {
    async fn list_ids(
        &self,
        _query: &str,
        _labels: Option<&[String]>,
        _page_size: u32,
        _page_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        Ok(ListPage::default())
    }

    async fn get_metadata(&self, id: &str, _detail: DetailLevel) -> Result<MessageMetadata, StoreError> {
        match id {
            "gone" => Err(StoreError::from_http_status(404, &[], "Not Found")),
            "revoked" => Err(StoreError::from_http_status(401, &[], "Invalid Credentials")),
            _ => Ok(message(id, Some("a@x.com"), 10, DAY_D_MS)),
        }
    }
}

#[tokio::test]
async fn test_default_batch_get_item_failures() {
    let ids: Vec<MessageId> = vec!["a".into(), "gone".into(), "b".into()];
    let mut tracker = RequestTracker::new();
    let items = ItemStore.batch_get(&ids, DetailLevel::Minimal, &mut tracker).await.unwrap();

    assert_eq!(items.len(), 3);
    assert_eq!(tracker.count("users.messages.get"), 3);
    assert!(items[0].is_ok());
    assert_eq!(items[1].as_ref().unwrap_err().id, "gone");
    assert!(items[2].is_ok());
}

#[tokio::test]
async fn test_default_batch_get_auth_failure_fails_group() {
    let ids: Vec<MessageId> = vec!["a".into(), "revoked".into()];
    let mut tracker = RequestTracker::new();

    let result = BatchFetcher::new(&ItemStore, no_pacing())
        .fetch_metadata(&ids, false, &mut tracker)
        .await;

    // 401 is fatal and never retried
    assert!(matches!(result, Err(StoreError::RequestFailed { status: Some(401), .. })));
    assert_eq!(tracker.count("users.messages.get"), 2);
}

#[tokio::test]
async fn test_auth_failure_stops_counting_requests() {
    let ids: Vec<MessageId> = vec!["revoked".into(), "a".into(), "b".into()];
    let mut tracker = RequestTracker::new();

    let result = BatchFetcher::new(&ItemStore, no_pacing())
        .fetch_metadata(&ids, false, &mut tracker)
        .await;

    assert!(result.is_err());
    // The remaining two messages are never requested
    assert_eq!(tracker.count("users.messages.get"), 1);
}

/// Store whose OAuth2 refresh token has been revoked.
struct RevokedTokenStore;

#[async_trait]
impl MessageStore for RevokedTokenStore {
    async fn list_ids(
        &self,
        _query: &str,
        _labels: Option<&[String]>,
        _page_size: u32,
        _page_token: Option<&str>,
    ) -> Result<ListPage, StoreError> {
        Ok(ListPage::default())
    }

    async fn get_metadata(&self, _id: &str, _detail: DetailLevel) -> Result<MessageMetadata, StoreError> {
        Err(classify_error(google_gmail1::Error::MissingToken(
            "invalid_grant: Token has been expired or revoked.".into(),
        )))
    }
}

#[tokio::test]
async fn test_revoked_token_aborts_fetch() {
    let store = FakeStore::with_pages(1, 25);
    let ids = store.all_ids();
    let mut tracker = RequestTracker::new();

    let result = BatchFetcher::new(&RevokedTokenStore, no_pacing())
        .fetch_metadata(&ids, false, &mut tracker)
        .await;

    let err = assert_err!(result);
    assert!(matches!(err, StoreError::RequestFailed { status: Some(401), .. }));
    assert_eq!(tracker.count("users.messages.get"), 1);
}
