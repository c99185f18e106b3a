//! Live Feed Integration Tests
//!
//! Loads listings through the in-memory event source and checks the
//! rotating window, statistics and the rotation timer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;

use marketplace_sync::{
    FeedConfig, InMemoryEventSource, ListingStatus, LiveFeedRotator, Record, Topic,
    TransportError,
};

fn listing_row(id: usize, owner: &str, price: u32, status: &str) -> Record {
    json!({
        "id": id,
        "owner_id": owner,
        "owner_name": format!("Owner {owner}"),
        "location": "Lisbon",
        "price": price,
        "status": status,
        "category": "apartment",
    })
}

fn displayed_ids<S>(rotator: &LiveFeedRotator<S>) -> Vec<String> {
    rotator
        .displayed_items()
        .into_iter()
        .map(|item| item.id)
        .collect()
}

fn seeded_source(count: usize) -> Arc<InMemoryEventSource> {
    let source = Arc::new(InMemoryEventSource::new());
    source.seed(
        Topic::Listings,
        (0..count).map(|i| {
            let owner = format!("o{}", i % 2);
            listing_row(i, &owner, 1_000, if i == 0 { "sold" } else { "active" })
        }),
    );
    source
}

#[tokio::test]
async fn load_shows_newest_listings_first() {
    let source = seeded_source(5);
    let rotator = LiveFeedRotator::new(source, FeedConfig::default());

    assert_eq!(rotator.load().await.unwrap(), 5);

    assert_eq!(displayed_ids(&rotator), vec!["4", "3", "2"]);
    let stats = rotator.stats();
    assert_eq!(stats.count, 5);
    assert_eq!(stats.active_count, 4);
    assert_eq!(stats.distinct_owner_count, 2);
    assert_eq!(stats.total_value, Decimal::from(5_000));
}

#[tokio::test]
async fn load_respects_limit() {
    let source = seeded_source(30);
    let config = FeedConfig {
        limit: 10,
        ..FeedConfig::default()
    };
    let rotator = LiveFeedRotator::new(source, config);

    assert_eq!(rotator.load().await.unwrap(), 10);
    assert_eq!(rotator.snapshot_len(), 10);
    assert_eq!(displayed_ids(&rotator), vec!["29", "28", "27"]);
}

#[tokio::test]
async fn unavailable_source_loads_demo_catalog() {
    let source = Arc::new(InMemoryEventSource::unavailable());
    let rotator = LiveFeedRotator::new(Arc::clone(&source), FeedConfig::default());

    assert_eq!(rotator.load().await.unwrap(), 6);
    assert_eq!(rotator.displayed_items().len(), 3);
    assert_eq!(source.fetch_calls(), 0);
    assert!(
        rotator
            .displayed_items()
            .iter()
            .all(|item| !item.owner_avatar_url.is_empty())
    );
}

#[tokio::test]
async fn failed_reload_keeps_previous_feed() {
    let source = seeded_source(4);
    let rotator = LiveFeedRotator::new(Arc::clone(&source), FeedConfig::default());
    rotator.load().await.unwrap();
    rotator.advance();
    let before = displayed_ids(&rotator);

    source.fail_fetches(
        Topic::Listings,
        TransportError::Request {
            message: "connection reset".to_string(),
        },
    );
    assert!(rotator.load().await.is_err());

    assert_eq!(rotator.snapshot_len(), 4);
    assert_eq!(displayed_ids(&rotator), before);

    source.clear_failures();
    rotator.load().await.unwrap();
    assert_eq!(rotator.offset(), 0);
}

#[tokio::test]
async fn rotation_wraps_around_the_snapshot() {
    let source = seeded_source(4);
    let rotator = LiveFeedRotator::new(source, FeedConfig::default());
    rotator.load().await.unwrap();

    assert!(rotator.advance());
    assert_eq!(displayed_ids(&rotator), vec!["0", "3", "2"]);
    assert_eq!(rotator.displayed_items()[0].status, ListingStatus::Sold);
}

#[tokio::test]
async fn timer_rotates_until_shutdown() {
    let source = seeded_source(7);
    let config = FeedConfig {
        rotate_interval: Duration::from_millis(20),
        ..FeedConfig::default()
    };
    let rotator = Arc::new(LiveFeedRotator::new(source, config));
    rotator.load().await.unwrap();

    let handle = rotator.start().expect("timer already running");

    tokio::time::timeout(Duration::from_secs(2), async {
        while rotator.offset() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("window never rotated");

    rotator.pause();
    let paused_at = rotator.offset();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(rotator.offset(), paused_at);

    rotator.shutdown();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("rotation task did not stop")
        .unwrap();
}
