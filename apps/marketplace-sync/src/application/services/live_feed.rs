//! Live Feed Rotator
//!
//! Holds the public listings snapshot, its aggregate statistics and a
//! rotating display window advanced on a fixed timer.
//!
//! The snapshot, stats and window are replaced together on `load()` and only
//! the window offset moves on `advance()`. Both happen under one write lock,
//! so readers never observe a half-updated feed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{EventSourcePort, SnapshotQuery, Topic, TransportError};
use crate::domain::listing::{
    DEFAULT_WINDOW_SIZE, DisplayWindow, FeedStats, ListingSnapshotItem, ListingStatus,
    placeholder_avatar,
};
use crate::infrastructure::metrics::{self, TransportOperation};

/// Configuration for the live feed rotator.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Maximum listings per snapshot.
    pub limit: usize,
    /// Listings shown at once.
    pub window_size: usize,
    /// Time between rotations.
    pub rotate_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            limit: 20,
            window_size: DEFAULT_WINDOW_SIZE,
            rotate_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct FeedState {
    snapshot: Vec<ListingSnapshotItem>,
    stats: FeedStats,
    window: DisplayWindow,
    live: bool,
}

/// Rotating view over the latest listings snapshot.
#[derive(Debug)]
pub struct LiveFeedRotator<S> {
    source: Arc<S>,
    config: FeedConfig,
    state: RwLock<FeedState>,
    started: AtomicBool,
    shutdown: CancellationToken,
}

impl<S: EventSourcePort + 'static> LiveFeedRotator<S> {
    /// Create an empty, live rotator.
    #[must_use]
    pub fn new(source: Arc<S>, config: FeedConfig) -> Self {
        let window = DisplayWindow::new(config.window_size);
        Self {
            source,
            config,
            state: RwLock::new(FeedState {
                snapshot: Vec::new(),
                stats: FeedStats::default(),
                window,
                live: true,
            }),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// Fetch a fresh snapshot and reset the window to the first items.
    ///
    /// Without a configured backend the demo catalog is used instead.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the fetch fails. The previous snapshot
    /// and stats are kept in that case.
    pub async fn load(&self) -> Result<usize, TransportError> {
        let items = if self.source.is_available() {
            let query = SnapshotQuery::new(Topic::Listings, self.config.limit);
            match self.source.fetch_snapshot(query).await {
                Ok(records) => records
                    .into_iter()
                    .filter_map(|record| match ListingSnapshotItem::from_record(record) {
                        Ok(item) => Some(item),
                        Err(e) => {
                            tracing::warn!(error = %e, "Skipping malformed listing row");
                            None
                        }
                    })
                    .take(self.config.limit)
                    .collect::<Vec<_>>(),
                Err(e) => {
                    tracing::warn!(error = %e, "Listings snapshot failed, keeping current feed");
                    metrics::record_transport_error(TransportOperation::Fetch);
                    metrics::record_feed_load(false);
                    return Err(e);
                }
            }
        } else {
            tracing::debug!("Event source not configured, loading demo listings");
            demo_catalog()
                .into_iter()
                .take(self.config.limit)
                .collect()
        };

        let stats = FeedStats::from_snapshot(&items);
        let count = items.len();

        {
            let mut state = self.state.write();
            state.snapshot = items;
            state.stats = stats;
            state.window.reset();
        }

        metrics::record_feed_load(true);
        tracing::info!(count, "Live feed loaded");
        Ok(count)
    }

    /// Start the rotation timer.
    ///
    /// The first rotation happens one interval after start. Returns `None` if
    /// the timer is already running. The task holds only a weak reference and
    /// stops on [`Self::shutdown`] or once the rotator is dropped.
    #[must_use]
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::debug!("Live feed rotation already running");
            return None;
        }

        let rotator = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        let period = self.config.rotate_interval;

        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(rotator) = rotator.upgrade() else {
                            break;
                        };
                        rotator.advance();
                    }
                }
            }
            tracing::debug!("Live feed rotation stopped");
        }))
    }
}

impl<S> LiveFeedRotator<S> {
    /// Move the window forward one step.
    ///
    /// No-op while paused or when the whole snapshot already fits.
    pub fn advance(&self) -> bool {
        let mut state = self.state.write();
        if !state.live {
            return false;
        }

        let len = state.snapshot.len();
        let moved = state.window.advance(len);
        if moved {
            metrics::record_feed_rotation();
        }
        moved
    }

    /// Stop rotating. The offset stays where it is.
    pub fn pause(&self) {
        self.state.write().live = false;
    }

    /// Resume rotating from the current offset.
    pub fn resume(&self) {
        self.state.write().live = true;
    }

    /// Flip between live and paused. Returns the new live flag.
    pub fn toggle_live(&self) -> bool {
        let mut state = self.state.write();
        state.live = !state.live;
        state.live
    }

    /// Whether the window is rotating.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.state.read().live
    }

    /// Listings currently on screen.
    #[must_use]
    pub fn displayed_items(&self) -> Vec<ListingSnapshotItem> {
        let state = self.state.read();
        state.window.select(&state.snapshot)
    }

    /// Statistics of the current snapshot.
    #[must_use]
    pub fn stats(&self) -> FeedStats {
        self.state.read().stats.clone()
    }

    /// Current window offset.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.state.read().window.offset()
    }

    /// Number of listings in the snapshot.
    #[must_use]
    pub fn snapshot_len(&self) -> usize {
        self.state.read().snapshot.len()
    }

    /// Stop the rotation timer.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl<S> Drop for LiveFeedRotator<S> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

// =============================================================================
// Demo Catalog
// =============================================================================

#[allow(clippy::too_many_arguments)]
fn demo_listing(
    id: &str,
    owner: (&str, &str),
    location: &str,
    budget: (i64, i64),
    bedrooms: Option<u32>,
    category: &str,
    status: ListingStatus,
    created_at: i64,
) -> ListingSnapshotItem {
    let (owner_id, owner_name) = owner;
    ListingSnapshotItem {
        id: id.to_string(),
        owner_id: owner_id.to_string(),
        owner_display_name: owner_name.to_string(),
        owner_avatar_url: placeholder_avatar(owner_name),
        location: location.to_string(),
        min_budget: Some(Decimal::from(budget.0)),
        max_budget: Some(Decimal::from(budget.1)),
        bedrooms,
        category: category.to_string(),
        status,
        created_at: DateTime::<Utc>::from_timestamp(created_at, 0).unwrap_or_default(),
    }
}

/// Fixed listings shown when no backend is configured, most-recent-first.
#[must_use]
pub fn demo_catalog() -> Vec<ListingSnapshotItem> {
    vec![
        demo_listing(
            "demo-1",
            ("demo-owner-1", "Marina Costa"),
            "Pinheiros, São Paulo",
            (850_000, 920_000),
            Some(2),
            "apartment",
            ListingStatus::Active,
            1_735_700_000,
        ),
        demo_listing(
            "demo-2",
            ("demo-owner-2", "Rafael Lima"),
            "Botafogo, Rio de Janeiro",
            (3_200, 3_800),
            Some(1),
            "rental",
            ListingStatus::Active,
            1_735_690_000,
        ),
        demo_listing(
            "demo-3",
            ("demo-owner-1", "Marina Costa"),
            "Savassi, Belo Horizonte",
            (1_400_000, 1_650_000),
            Some(4),
            "house",
            ListingStatus::Pending,
            1_735_680_000,
        ),
        demo_listing(
            "demo-4",
            ("demo-owner-3", "Juliana Rocha"),
            "Centro, Curitiba",
            (420_000, 420_000),
            None,
            "commercial",
            ListingStatus::Active,
            1_735_670_000,
        ),
        demo_listing(
            "demo-5",
            ("demo-owner-4", "Thiago Alves"),
            "Moinhos de Vento, Porto Alegre",
            (2_100_000, 2_400_000),
            Some(3),
            "house",
            ListingStatus::Sold,
            1_735_660_000,
        ),
        demo_listing(
            "demo-6",
            ("demo-owner-3", "Juliana Rocha"),
            "Jurerê, Florianópolis",
            (180_000, 240_000),
            None,
            "land",
            ListingStatus::Active,
            1_735_650_000,
        ),
    ]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use test_case::test_case;

    use super::*;
    use crate::application::ports::MockEventSourcePort;

    fn listing(id: usize) -> serde_json::Value {
        json!({
            "id": id,
            "owner_id": format!("owner-{}", id % 3),
            "price": 100_000 * (id + 1),
            "status": if id % 2 == 0 { "active" } else { "pending" },
        })
    }

    fn source_with(count: usize) -> MockEventSourcePort {
        let mut source = MockEventSourcePort::new();
        source.expect_is_available().return_const(true);
        source
            .expect_fetch_snapshot()
            .withf(|query| query.topic == Topic::Listings && query.limit == 20)
            .returning(move |_| Ok((0..count).map(listing).collect()));
        source
    }

    #[tokio::test]
    async fn load_replaces_snapshot_and_stats() {
        let rotator = LiveFeedRotator::new(Arc::new(source_with(7)), FeedConfig::default());

        assert_eq!(rotator.load().await.unwrap(), 7);
        assert_eq!(rotator.snapshot_len(), 7);

        let stats = rotator.stats();
        assert_eq!(stats.count, 7);
        assert_eq!(stats.active_count, 4);
        assert_eq!(stats.distinct_owner_count, 3);
        assert_eq!(stats.total_value, Decimal::from(2_800_000));

        let shown: Vec<_> = rotator.displayed_items().into_iter().map(|i| i.id).collect();
        assert_eq!(shown, vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn failed_load_keeps_previous_feed() {
        let mut source = MockEventSourcePort::new();
        source.expect_is_available().return_const(true);
        let mut calls = 0;
        source.expect_fetch_snapshot().returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok((0..4).map(listing).collect())
            } else {
                Err(TransportError::Status {
                    status: 503,
                    message: "unavailable".to_string(),
                })
            }
        });

        let rotator = LiveFeedRotator::new(Arc::new(source), FeedConfig::default());
        rotator.load().await.unwrap();
        rotator.advance();
        let stats = rotator.stats();

        assert!(rotator.load().await.is_err());
        assert_eq!(rotator.snapshot_len(), 4);
        assert_eq!(rotator.stats(), stats);
        assert_eq!(rotator.offset(), 3);
    }

    #[tokio::test]
    async fn unavailable_source_loads_demo_catalog() {
        let mut source = MockEventSourcePort::new();
        source.expect_is_available().return_const(false);
        source.expect_fetch_snapshot().never();

        let rotator = LiveFeedRotator::new(Arc::new(source), FeedConfig::default());
        assert_eq!(rotator.load().await.unwrap(), demo_catalog().len());
        assert_eq!(rotator.displayed_items().len(), 3);
        assert_eq!(rotator.stats().distinct_owner_count, 4);
    }

    #[tokio::test]
    async fn advance_cycles_through_offsets() {
        let rotator = LiveFeedRotator::new(Arc::new(source_with(7)), FeedConfig::default());
        rotator.load().await.unwrap();

        let mut offsets = vec![rotator.offset()];
        for _ in 0..7 {
            rotator.advance();
            offsets.push(rotator.offset());
        }
        assert_eq!(offsets, vec![0, 3, 6, 2, 5, 1, 4, 0]);

        rotator.advance();
        rotator.advance();
        let shown: Vec<_> = rotator.displayed_items().into_iter().map(|i| i.id).collect();
        assert_eq!(shown, vec!["6", "0", "1"]);
    }

    #[test_case(0 ; "empty snapshot")]
    #[test_case(2 ; "smaller than window")]
    #[test_case(3 ; "exactly one window")]
    #[tokio::test]
    async fn small_snapshots_never_rotate(count: usize) {
        let rotator = LiveFeedRotator::new(Arc::new(source_with(count)), FeedConfig::default());
        rotator.load().await.unwrap();

        assert!(!rotator.advance());
        assert_eq!(rotator.offset(), 0);
        assert_eq!(rotator.displayed_items().len(), count.min(3));
    }

    #[tokio::test]
    async fn pause_blocks_advance() {
        let rotator = LiveFeedRotator::new(Arc::new(source_with(7)), FeedConfig::default());
        rotator.load().await.unwrap();

        rotator.pause();
        assert!(!rotator.advance());
        assert_eq!(rotator.offset(), 0);

        assert!(rotator.toggle_live());
        assert!(rotator.advance());
        assert_eq!(rotator.offset(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_respects_pause_and_does_not_catch_up() {
        let rotator = Arc::new(LiveFeedRotator::new(
            Arc::new(source_with(7)),
            FeedConfig::default(),
        ));
        rotator.load().await.unwrap();
        let handle = rotator.start().unwrap();

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(rotator.offset(), 3);

        rotator.pause();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(rotator.offset(), 3);

        rotator.resume();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(rotator.offset(), 6);

        rotator.shutdown();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(rotator.offset(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_does_not_double_the_rate() {
        let rotator = Arc::new(LiveFeedRotator::new(
            Arc::new(source_with(7)),
            FeedConfig::default(),
        ));
        rotator.load().await.unwrap();

        let handle = rotator.start().unwrap();
        assert!(rotator.start().is_none());

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(rotator.offset(), 3);

        rotator.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_rotator_stops_the_timer() {
        let rotator = Arc::new(LiveFeedRotator::new(
            Arc::new(source_with(7)),
            FeedConfig::default(),
        ));
        rotator.load().await.unwrap();
        let handle = rotator.start().unwrap();

        drop(rotator);

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn demo_catalog_is_deterministic() {
        assert_eq!(demo_catalog(), demo_catalog());
        assert!(demo_catalog().iter().all(|item| item.owner_avatar_url.contains("name=")));
    }
}
