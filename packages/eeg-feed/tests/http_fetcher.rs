mod common;

use common::{rec, test_config, Backend};
use eeg_feed::{FeedConfig, FeedError, FetchQuery, HttpRecordFetcher, RecordFetcher, RecordKey};
use std::time::Duration;

#[tokio::test]
async fn test_fetch_latest_returns_newest() {
    let backend = Backend::new(vec![rec(1, 100, "a"), rec(3, 300, "a"), rec(2, 200, "b")]);
    let url = backend.spawn().await;
    let fetcher = HttpRecordFetcher::new(&test_config(&url)).unwrap();

    let latest = fetcher.fetch_latest().await.unwrap();
    assert_eq!(latest.id.0, 3);
    assert_eq!(latest.channels, vec![3.0, -3.0]);
}

#[tokio::test]
async fn test_fetch_latest_on_empty_backend() {
    let url = Backend::new(vec![]).spawn().await;
    let fetcher = HttpRecordFetcher::new(&test_config(&url)).unwrap();

    assert!(matches!(fetcher.fetch_latest().await, Err(FeedError::EmptyResult)));
    // An empty history is just an empty batch
    assert_eq!(fetcher.fetch_all(&FetchQuery::default()).await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_fetch_all_is_ordered_and_filtered() {
    let backend = Backend::new(vec![
        rec(4, 300, "a"),
        rec(1, 100, "a"),
        rec(2, 200, "b"),
        rec(3, 300, "a"),
    ]);
    let url = backend.spawn().await;
    let fetcher = HttpRecordFetcher::new(&test_config(&url)).unwrap();

    let all: Vec<u64> = fetcher
        .fetch_all(&FetchQuery::default())
        .await
        .unwrap()
        .map(|r| r.id.0)
        .collect();
    assert_eq!(all, vec![1, 2, 3, 4]);

    let session_a: Vec<u64> = fetcher
        .fetch_all(&FetchQuery::session("a"))
        .await
        .unwrap()
        .map(|r| r.id.0)
        .collect();
    assert_eq!(session_a, vec![1, 3, 4]);

    let newer: Vec<u64> = fetcher
        .fetch_all(&FetchQuery::default().after(RecordKey::new(200, 2u64)))
        .await
        .unwrap()
        .map(|r| r.id.0)
        .collect();
    assert_eq!(newer, vec![3, 4]);
}

#[tokio::test]
async fn test_fetch_times_out() {
    let backend = Backend::new(vec![rec(1, 100, "a")]);
    backend.set_latency(Duration::from_millis(500));
    let url = backend.spawn().await;

    let config = FeedConfig {
        fetch_timeout: Duration::from_millis(100),
        ..test_config(&url)
    };
    let fetcher = HttpRecordFetcher::new(&config).unwrap();

    let err = fetcher.fetch_latest().await.unwrap_err();
    assert!(matches!(err, FeedError::Timeout(_)), "got {:?}", err);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    let fetcher = HttpRecordFetcher::new(&test_config("http://127.0.0.1:1")).unwrap();

    let err = fetcher.fetch_latest().await.unwrap_err();
    assert!(matches!(err, FeedError::Transport(_)), "got {:?}", err);
    assert!(matches!(
        fetcher.fetch_all(&FetchQuery::default()).await,
        Err(FeedError::Transport(_))
    ));
}
