//! In-Memory Event Source
//!
//! An in-process backend: one append-only table per topic and filtered
//! fan-out of inserted rows to open subscriptions. Useful for local runs
//! without a hosted backend and for exercising the services end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    EventSourcePort, Filter, Record, SnapshotQuery, Subscription, SubscriptionHandle, Topic,
    TransportError,
};

/// Default buffered records per subscription.
const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

#[derive(Debug)]
struct Subscriber {
    topic: Topic,
    filter: Option<Filter>,
    tx: mpsc::Sender<Record>,
    token: CancellationToken,
}

impl Subscriber {
    fn is_open(&self) -> bool {
        !self.token.is_cancelled() && !self.tx.is_closed()
    }

    fn wants(&self, topic: Topic, record: &Record) -> bool {
        self.topic == topic && self.filter.as_ref().is_none_or(|f| f.matches(record))
    }
}

/// In-process event source.
#[derive(Debug)]
pub struct InMemoryEventSource {
    available: bool,
    channel_capacity: usize,
    tables: RwLock<HashMap<Topic, Vec<Record>>>,
    subscribers: Mutex<Vec<Subscriber>>,
    failures: Mutex<HashMap<Topic, TransportError>>,
    fetch_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
}

impl Default for InMemoryEventSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventSource {
    /// Create an available, empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::with_availability(true)
    }

    /// Create a source that reports itself as not configured.
    #[must_use]
    pub fn unavailable() -> Self {
        Self::with_availability(false)
    }

    fn with_availability(available: bool) -> Self {
        Self {
            available,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            tables: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            fetch_calls: AtomicUsize::new(0),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    /// Append rows without notifying subscribers, oldest first.
    pub fn seed(&self, topic: Topic, records: impl IntoIterator<Item = Record>) {
        self.tables
            .write()
            .entry(topic)
            .or_default()
            .extend(records);
    }

    /// Append a row and deliver it to every matching subscription.
    ///
    /// Returns the number of subscriptions it was delivered to.
    pub async fn insert(&self, topic: Topic, record: Record) -> usize {
        self.tables
            .write()
            .entry(topic)
            .or_default()
            .push(record.clone());

        let targets: Vec<mpsc::Sender<Record>> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(Subscriber::is_open);
            subscribers
                .iter()
                .filter(|s| s.wants(topic, &record))
                .map(|s| s.tx.clone())
                .collect()
        };

        let mut delivered = 0;
        for tx in targets {
            if tx.send(record.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Make every fetch of `topic` fail with `error` until cleared.
    pub fn fail_fetches(&self, topic: Topic, error: TransportError) {
        self.failures.lock().insert(topic, error);
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Number of `fetch_snapshot` calls so far.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::Relaxed)
    }

    /// Number of `subscribe` calls so far.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::Relaxed)
    }

    /// Number of subscriptions whose handle is still open.
    #[must_use]
    pub fn open_subscriptions(&self) -> usize {
        self.subscribers
            .lock()
            .iter()
            .filter(|s| !s.token.is_cancelled())
            .count()
    }
}

#[async_trait]
impl EventSourcePort for InMemoryEventSource {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn fetch_snapshot(&self, query: SnapshotQuery) -> Result<Vec<Record>, TransportError> {
        self.fetch_calls.fetch_add(1, Ordering::Relaxed);

        if !self.available {
            return Err(TransportError::NotConfigured);
        }
        if let Some(error) = self.failures.lock().get(&query.topic) {
            return Err(error.clone());
        }

        let tables = self.tables.read();
        let rows = tables.get(&query.topic).map_or(&[][..], Vec::as_slice);

        Ok(rows
            .iter()
            .rev()
            .filter(|record| query.filter.as_ref().is_none_or(|f| f.matches(record)))
            .take(query.limit)
            .cloned()
            .collect())
    }

    async fn subscribe(
        &self,
        topic: Topic,
        filter: Option<Filter>,
    ) -> Result<Subscription, TransportError> {
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);

        if !self.available {
            return Err(TransportError::NotConfigured);
        }

        let (tx, events) = mpsc::channel(self.channel_capacity);
        let token = CancellationToken::new();

        self.subscribers.lock().push(Subscriber {
            topic,
            filter,
            tx,
            token: token.clone(),
        });

        Ok(Subscription {
            events,
            handle: SubscriptionHandle::new(topic, token),
        })
    }
}
