//! Notification Channel Manager
//!
//! Owns the per-user notification list and keeps it in sync with the
//! backend for whichever identity is currently bound.
//!
//! # States
//!
//! - `Unbound`: no subscriptions, no simulator. Local history may persist.
//! - `Bound(U)`: seeded from a snapshot, then fed by two subscriptions
//!   (direct notifications for `U`, all chat messages).
//! - `Fallback(U)`: the event source is not configured; the simulated event
//!   generator feeds the list instead.
//!
//! # Generation Guard
//!
//! Every `rebind` bumps a generation counter. Each asynchronous completion
//! (snapshot, subscribe, membership check, simulator tick, pushed row)
//! carries the generation it was started under and is discarded if the
//! counter moved on in the meantime.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::simulator::{SimulatedEventGenerator, SimulatorConfig};
use crate::application::ports::{
    EventSourcePort, Filter, Record, SnapshotQuery, Subscription, SubscriptionHandle, Topic,
};
use crate::domain::notification::{
    ChatMessage, DEFAULT_CAPACITY, Notification, NotificationFeed, NotificationInput,
    participant_id,
};
use crate::domain::session::{Session, UserId};
use crate::infrastructure::metrics::{self, NotificationSource, TransportOperation};

/// Upper bound on participants read for one membership check.
const PARTICIPANT_QUERY_LIMIT: usize = 100;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the notification channel manager.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Number of existing notifications fetched on bind.
    pub snapshot_limit: usize,
    /// Maximum number of notifications kept in memory.
    pub capacity: usize,
    /// Simulator settings used in fallback mode.
    pub simulator: SimulatorConfig,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            snapshot_limit: 50,
            capacity: DEFAULT_CAPACITY,
            simulator: SimulatorConfig::default(),
        }
    }
}

// =============================================================================
// State
// =============================================================================

/// Binding state of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMode {
    /// No identity bound.
    Unbound,
    /// Live subscriptions open for the user.
    Bound(UserId),
    /// Simulated events for the user; the backend is not configured.
    Fallback(UserId),
}

impl ChannelMode {
    /// Short name for logs and health output.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::Bound(_) => "bound",
            Self::Fallback(_) => "fallback",
        }
    }

    /// The bound user, if any.
    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        match self {
            Self::Unbound => None,
            Self::Bound(user) | Self::Fallback(user) => Some(user),
        }
    }
}

#[derive(Debug)]
struct ChannelState {
    feed: NotificationFeed,
    mode: ChannelMode,
    generation: u64,
    handles: Vec<SubscriptionHandle>,
    binding: Option<CancellationToken>,
}

#[derive(Debug)]
struct ChannelShared {
    state: Mutex<ChannelState>,
    discarded: AtomicU64,
}

impl ChannelShared {
    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn discard(&self, stage: &'static str, generation: u64) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        metrics::record_discard(stage);
        tracing::debug!(stage, generation, "Discarded stale completion");
    }

    /// Prepend a notification if `generation` is still current.
    fn ingest(
        &self,
        generation: u64,
        notification: Notification,
        source: NotificationSource,
        stage: &'static str,
    ) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            drop(state);
            self.discard(stage, generation);
            return false;
        }

        let id = notification.id.clone();
        if !state.feed.push(notification) {
            tracing::debug!(id = %id, "Notification not added (duplicate or evicted on arrival)");
            return false;
        }

        metrics::record_notifications_added(source, 1);
        metrics::set_unread(state.feed.unread_count());
        true
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Keeps one user's notification list in sync with the event source.
#[derive(Debug)]
pub struct NotificationChannelManager<S> {
    source: Arc<S>,
    config: ChannelConfig,
    shared: Arc<ChannelShared>,
    shutdown: CancellationToken,
}

impl<S: EventSourcePort + 'static> NotificationChannelManager<S> {
    /// Create an unbound manager.
    #[must_use]
    pub fn new(source: Arc<S>, config: ChannelConfig) -> Self {
        let state = ChannelState {
            feed: NotificationFeed::with_capacity(config.capacity),
            mode: ChannelMode::Unbound,
            generation: 0,
            handles: Vec::new(),
            binding: None,
        };

        Self {
            source,
            config,
            shared: Arc::new(ChannelShared {
                state: Mutex::new(state),
                discarded: AtomicU64::new(0),
            }),
            shutdown: CancellationToken::new(),
        }
    }

    // =========================================================================
    // Binding
    // =========================================================================

    /// Switch to a new identity, or unbind with `None`.
    ///
    /// All handles and timers of the previous binding are released before
    /// anything is opened for the new one. Transport failures are logged and
    /// leave the manager running with whatever did succeed.
    pub async fn rebind(&self, session: Option<Session>) {
        let generation = self.release();

        let Some(session) = session else {
            tracing::info!(generation, "Notification channel unbound");
            return;
        };

        if self.shutdown.is_cancelled() {
            tracing::debug!("Ignoring rebind after shutdown");
            return;
        }

        let user = session.user_id;

        if !self.source.is_available() {
            self.enter_fallback(generation, user);
            return;
        }

        let Some(binding) = self.claim(generation, ChannelMode::Bound(user.clone())) else {
            self.shared.discard("bind", generation);
            return;
        };
        tracing::info!(user_id = %user, generation, "Notification channel bound");

        self.seed(generation, &user).await;

        let notifications_filter = Filter::eq("user_id", user.as_str());
        if let Some(events) = self
            .open(generation, Topic::Notifications, Some(notifications_filter))
            .await
        {
            self.spawn_notification_consumer(generation, binding.clone(), events);
        }

        if let Some(events) = self.open(generation, Topic::Messages, None).await {
            self.spawn_message_consumer(generation, binding, user, events);
        }
    }

    /// Install `mode` for `generation`, returning the binding's cancel token.
    fn claim(&self, generation: u64, mode: ChannelMode) -> Option<CancellationToken> {
        let mut state = self.shared.state.lock();
        if state.generation != generation {
            return None;
        }

        let binding = self.shutdown.child_token();
        state.mode = mode;
        state.binding = Some(binding.clone());
        Some(binding)
    }

    fn enter_fallback(&self, generation: u64, user: UserId) {
        let Some(binding) = self.claim(generation, ChannelMode::Fallback(user.clone())) else {
            self.shared.discard("bind", generation);
            return;
        };
        tracing::info!(
            user_id = %user,
            generation,
            "Event source not configured, running simulated notifications"
        );

        let shared = Arc::clone(&self.shared);
        let generator = SimulatedEventGenerator::new(self.config.simulator.clone());
        tokio::spawn(generator.run(binding, move |input| {
            shared.ingest(
                generation,
                Notification::from_input(input),
                NotificationSource::Simulated,
                "simulated",
            );
        }));
    }

    async fn seed(&self, generation: u64, user: &UserId) {
        let query = SnapshotQuery::new(Topic::Notifications, self.config.snapshot_limit)
            .with_filter(Filter::eq("user_id", user.as_str()));

        let records = match self.source.fetch_snapshot(query).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(user_id = %user, error = %e, "Notification snapshot failed, keeping current list");
                metrics::record_transport_error(TransportOperation::Fetch);
                return;
            }
        };

        let notifications: Vec<Notification> = records
            .into_iter()
            .filter_map(|record| match Notification::from_record(record) {
                Ok(notification) => Some(notification),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed notification row");
                    None
                }
            })
            .collect();

        let mut state = self.shared.state.lock();
        if state.generation != generation {
            drop(state);
            self.shared.discard("seed", generation);
            return;
        }

        let kept = state.feed.replace(notifications);
        metrics::record_notifications_added(NotificationSource::Seed, kept as u64);
        metrics::set_unread(state.feed.unread_count());
        tracing::info!(user_id = %user, kept, "Seeded notifications");
    }

    async fn open(
        &self,
        generation: u64,
        topic: Topic,
        filter: Option<Filter>,
    ) -> Option<mpsc::Receiver<Record>> {
        if !self.shared.is_current(generation) {
            return None;
        }

        match self.source.subscribe(topic, filter).await {
            Ok(Subscription { events, handle }) => {
                let mut state = self.shared.state.lock();
                if state.generation != generation {
                    handle.close();
                    drop(state);
                    self.shared.discard("subscribe", generation);
                    return None;
                }
                state.handles.push(handle);
                tracing::debug!(topic = topic.table(), generation, "Subscription open");
                Some(events)
            }
            Err(e) => {
                tracing::warn!(topic = topic.table(), error = %e, "Subscription failed");
                metrics::record_transport_error(TransportOperation::Subscribe);
                None
            }
        }
    }

    // =========================================================================
    // Consumers
    // =========================================================================

    fn spawn_notification_consumer(
        &self,
        generation: u64,
        binding: CancellationToken,
        mut events: mpsc::Receiver<Record>,
    ) {
        let shared = Arc::clone(&self.shared);

        tokio::spawn(async move {
            loop {
                let record = tokio::select! {
                    biased;
                    () = binding.cancelled() => break,
                    record = events.recv() => match record {
                        Some(record) => record,
                        None => break,
                    },
                };

                match Notification::from_record(record) {
                    Ok(notification) => {
                        shared.ingest(generation, notification, NotificationSource::Push, "push");
                    }
                    Err(e) => tracing::warn!(error = %e, "Skipping malformed notification row"),
                }
            }
            tracing::debug!(generation, "Notification consumer stopped");
        });
    }

    /// Chat messages need a membership check per event. The check runs to
    /// completion even if the binding changes meanwhile; the generation guard
    /// discards its result.
    fn spawn_message_consumer(
        &self,
        generation: u64,
        binding: CancellationToken,
        user: UserId,
        mut events: mpsc::Receiver<Record>,
    ) {
        let shared = Arc::clone(&self.shared);
        let source = Arc::clone(&self.source);

        tokio::spawn(async move {
            loop {
                let record = tokio::select! {
                    biased;
                    () = binding.cancelled() => break,
                    record = events.recv() => match record {
                        Some(record) => record,
                        None => break,
                    },
                };

                let message = match ChatMessage::from_record(record) {
                    Ok(message) => message,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed chat message");
                        continue;
                    }
                };
                if message.sender_id == user.as_str() {
                    continue;
                }

                let query = SnapshotQuery::new(Topic::ChatParticipants, PARTICIPANT_QUERY_LIMIT)
                    .with_filter(Filter::eq("session_id", message.session_id.as_str()));
                let participants = match source.fetch_snapshot(query).await {
                    Ok(participants) => participants,
                    Err(e) => {
                        tracing::warn!(session_id = %message.session_id, error = %e, "Membership check failed");
                        metrics::record_transport_error(TransportOperation::Fetch);
                        continue;
                    }
                };

                if !shared.is_current(generation) {
                    shared.discard("membership", generation);
                    continue;
                }

                let is_participant = participants
                    .iter()
                    .filter_map(participant_id)
                    .any(|id| id == user.as_str());
                if !is_participant {
                    tracing::debug!(session_id = %message.session_id, "Message for a session the user is not in");
                    continue;
                }

                shared.ingest(
                    generation,
                    Notification::from_chat_message(&message),
                    NotificationSource::Message,
                    "membership",
                );
            }
            tracing::debug!(generation, "Message consumer stopped");
        });
    }
}

impl<S> NotificationChannelManager<S> {
    /// Unbind and refuse further bindings.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let generation = self.release();
        tracing::info!(generation, "Notification channel shut down");
    }

    /// Invalidate the current binding: bump the generation, close every
    /// handle and cancel every task it owns.
    fn release(&self) -> u64 {
        let mut state = self.shared.state.lock();
        state.generation += 1;
        state.mode = ChannelMode::Unbound;

        for handle in state.handles.drain(..) {
            handle.close();
        }
        if let Some(binding) = state.binding.take() {
            binding.cancel();
        }

        state.generation
    }

    // =========================================================================
    // Consumer API
    // =========================================================================

    /// Append a locally created notification.
    pub fn add_notification(&self, input: NotificationInput) -> Notification {
        let notification = Notification::from_input(input);

        let mut state = self.shared.state.lock();
        state.feed.push(notification.clone());
        metrics::record_notifications_added(NotificationSource::Manual, 1);
        metrics::set_unread(state.feed.unread_count());

        notification
    }

    /// Mark one notification as read. Returns `true` if it was unread.
    pub fn mark_as_read(&self, id: &str) -> bool {
        let mut state = self.shared.state.lock();
        let flipped = state.feed.mark_read(id);
        if flipped {
            metrics::set_unread(state.feed.unread_count());
        }
        flipped
    }

    /// Mark every notification as read. Returns how many were flipped.
    pub fn mark_all_as_read(&self) -> usize {
        let mut state = self.shared.state.lock();
        let flipped = state.feed.mark_all_read();
        metrics::set_unread(0);
        flipped
    }

    /// Current notifications, most-recent-first.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.shared.state.lock().feed.to_vec()
    }

    /// Number of unread notifications.
    #[must_use]
    pub fn unread_count(&self) -> usize {
        self.shared.state.lock().feed.unread_count()
    }

    /// Current binding state.
    #[must_use]
    pub fn mode(&self) -> ChannelMode {
        self.shared.state.lock().mode.clone()
    }

    /// Current binding generation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }

    /// Number of stale completions discarded so far.
    #[must_use]
    pub fn discarded_events(&self) -> u64 {
        self.shared.discarded.load(Ordering::Relaxed)
    }

    /// Number of open subscription handles.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        self.shared
            .state
            .lock()
            .handles
            .iter()
            .filter(|handle| !handle.is_closed())
            .count()
    }
}

impl<S> Drop for NotificationChannelManager<S> {
    fn drop(&mut self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockall::predicate::{always, eq};
    use serde_json::json;

    use super::*;
    use crate::application::ports::{MockEventSourcePort, TransportError};
    use crate::domain::notification::NotificationCategory;

    fn config() -> ChannelConfig {
        ChannelConfig {
            snapshot_limit: 50,
            capacity: DEFAULT_CAPACITY,
            simulator: SimulatorConfig {
                interval: Duration::from_secs(30),
                probability: 1.0,
                seed: Some(1),
            },
        }
    }

    fn subscription(topic: Topic) -> (mpsc::Sender<Record>, Subscription) {
        let (tx, events) = mpsc::channel(16);
        let handle = SubscriptionHandle::new(topic, CancellationToken::new());
        (tx, Subscription { events, handle })
    }

    fn input(title: &str) -> NotificationInput {
        NotificationInput::new(title, "body", NotificationCategory::Info)
    }

    #[test]
    fn starts_unbound_and_empty() {
        let manager = NotificationChannelManager::new(Arc::new(MockEventSourcePort::new()), config());
        assert_eq!(manager.mode(), ChannelMode::Unbound);
        assert_eq!(manager.unread_count(), 0);
        assert_eq!(manager.generation(), 0);
    }

    #[test]
    fn add_and_mark_read() {
        let manager = NotificationChannelManager::new(Arc::new(MockEventSourcePort::new()), config());

        let first = manager.add_notification(input("one"));
        manager.add_notification(input("two"));
        assert_eq!(manager.unread_count(), 2);
        assert_eq!(manager.notifications()[0].title, "two");

        assert!(manager.mark_as_read(&first.id));
        assert!(!manager.mark_as_read(&first.id));
        assert_eq!(manager.unread_count(), 1);

        assert_eq!(manager.mark_all_as_read(), 1);
        assert_eq!(manager.unread_count(), 0);
        assert!(manager.notifications().iter().all(|n| n.read));
    }

    #[tokio::test(start_paused = true)]
    async fn unavailable_source_runs_simulator_without_transport_calls() {
        let mut source = MockEventSourcePort::new();
        source.expect_is_available().return_const(false);
        source.expect_fetch_snapshot().never();
        source.expect_subscribe().never();

        let manager = NotificationChannelManager::new(Arc::new(source), config());
        manager.rebind(Some(Session::new("u1"))).await;
        assert_eq!(manager.mode(), ChannelMode::Fallback(UserId::from("u1")));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(manager.notifications().len(), 2);

        manager.rebind(None).await;
        assert_eq!(manager.mode(), ChannelMode::Unbound);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(manager.notifications().len(), 2);
    }

    #[tokio::test]
    async fn bind_seeds_and_subscribes_both_topics() {
        let (notify_tx, notify_sub) = subscription(Topic::Notifications);
        let (_message_tx, message_sub) = subscription(Topic::Messages);

        let mut source = MockEventSourcePort::new();
        source.expect_is_available().return_const(true);
        source
            .expect_fetch_snapshot()
            .withf(|query| {
                query.topic == Topic::Notifications
                    && query.limit == 50
                    && query.filter == Some(Filter::eq("user_id", "u1"))
            })
            .times(1)
            .returning(|_| {
                Ok(vec![
                    json!({"id": "n2", "title": "Newer", "read": false}),
                    json!({"id": "n1", "title": "Older", "read": true}),
                ])
            });
        source
            .expect_subscribe()
            .with(eq(Topic::Notifications), eq(Some(Filter::eq("user_id", "u1"))))
            .times(1)
            .return_once(move |_, _| Ok(notify_sub));
        source
            .expect_subscribe()
            .with(eq(Topic::Messages), eq(None))
            .times(1)
            .return_once(move |_, _| Ok(message_sub));

        let manager = NotificationChannelManager::new(Arc::new(source), config());
        manager.rebind(Some(Session::new("u1"))).await;

        assert_eq!(manager.mode(), ChannelMode::Bound(UserId::from("u1")));
        assert_eq!(manager.active_subscriptions(), 2);
        assert_eq!(manager.unread_count(), 1);

        notify_tx
            .send(json!({"id": "n3", "title": "Pushed"}))
            .await
            .unwrap();
        for _ in 0..50 {
            if manager.notifications().len() == 3 {
                break;
            }
            tokio::task::yield_now().await;
        }
        let notifications = manager.notifications();
        assert_eq!(notifications[0].id, "n3");
        assert_eq!(manager.unread_count(), 2);
    }

    #[tokio::test]
    async fn snapshot_failure_keeps_previous_list() {
        let mut source = MockEventSourcePort::new();
        source.expect_is_available().return_const(true);
        source.expect_fetch_snapshot().returning(|_| {
            Err(TransportError::Request {
                message: "connection refused".to_string(),
            })
        });
        source.expect_subscribe().with(always(), always()).returning(|_, _| {
            Err(TransportError::Subscribe {
                message: "socket closed".to_string(),
            })
        });

        let manager = NotificationChannelManager::new(Arc::new(source), config());
        let kept = manager.add_notification(input("local"));

        manager.rebind(Some(Session::new("u1"))).await;

        assert_eq!(manager.mode(), ChannelMode::Bound(UserId::from("u1")));
        assert_eq!(manager.notifications(), vec![kept]);
        assert_eq!(manager.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn unbind_closes_handles() {
        let (_notify_tx, notify_sub) = subscription(Topic::Notifications);
        let (_message_tx, message_sub) = subscription(Topic::Messages);

        let mut source = MockEventSourcePort::new();
        source.expect_is_available().return_const(true);
        source.expect_fetch_snapshot().returning(|_| Ok(vec![]));
        source
            .expect_subscribe()
            .with(eq(Topic::Notifications), always())
            .return_once(move |_, _| Ok(notify_sub));
        source
            .expect_subscribe()
            .with(eq(Topic::Messages), always())
            .return_once(move |_, _| Ok(message_sub));

        let manager = NotificationChannelManager::new(Arc::new(source), config());
        manager.rebind(Some(Session::new("u1"))).await;
        assert_eq!(manager.active_subscriptions(), 2);

        manager.rebind(None).await;
        assert_eq!(manager.active_subscriptions(), 0);
        assert_eq!(manager.mode(), ChannelMode::Unbound);
        assert_eq!(manager.generation(), 2);
    }

    #[tokio::test]
    async fn drop_stops_consumers() {
        let (notify_tx, notify_sub) = subscription(Topic::Notifications);
        let (message_tx, message_sub) = subscription(Topic::Messages);

        let mut source = MockEventSourcePort::new();
        source.expect_is_available().return_const(true);
        source.expect_fetch_snapshot().returning(|_| Ok(vec![]));
        source
            .expect_subscribe()
            .with(eq(Topic::Notifications), always())
            .return_once(move |_, _| Ok(notify_sub));
        source
            .expect_subscribe()
            .with(eq(Topic::Messages), always())
            .return_once(move |_, _| Ok(message_sub));

        let manager = NotificationChannelManager::new(Arc::new(source), config());
        manager.rebind(Some(Session::new("u1"))).await;
        drop(manager);

        tokio::time::timeout(Duration::from_secs(1), async {
            notify_tx.closed().await;
            message_tx.closed().await;
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn shutdown_refuses_new_bindings() {
        let mut source = MockEventSourcePort::new();
        source.expect_is_available().never();
        source.expect_fetch_snapshot().never();

        let manager = NotificationChannelManager::new(Arc::new(source), config());
        manager.shutdown();
        manager.rebind(Some(Session::new("u1"))).await;

        assert_eq!(manager.mode(), ChannelMode::Unbound);
    }

    #[test]
    fn mode_names() {
        assert_eq!(ChannelMode::Unbound.as_str(), "unbound");
        assert_eq!(ChannelMode::Bound(UserId::from("u")).as_str(), "bound");
        assert_eq!(ChannelMode::Fallback(UserId::from("u")).as_str(), "fallback");
        assert_eq!(ChannelMode::Unbound.user_id(), None);
    }
}
