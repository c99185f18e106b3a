//! Remote Event Source
//!
//! Adapter for the hosted marketplace backend.
//!
//! - Snapshots: REST query
//!   `GET {endpoint}/rest/v1/{table}?select=*&order=created_at.desc&limit=N`
//!   with `apikey` and bearer headers.
//! - Subscriptions: one realtime websocket per subscription at
//!   `{ws-endpoint}/realtime/v1/websocket`, joined to a single
//!   `postgres_changes` channel. Rows are forwarded in arrival order.
//!
//! A dropped socket ends the subscription; nothing resubscribes.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::realtime::{RealtimeFrame, channel_topic};
use crate::application::ports::{
    EventSourcePort, Filter, Record, SnapshotQuery, Subscription, SubscriptionHandle, Topic,
    TransportError,
};
use crate::infrastructure::config::BackendSettings;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketWrite = SplitSink<Socket, Message>;
type SocketRead = SplitStream<Socket>;

/// Reference used for the join request on every socket.
const JOIN_REF: u64 = 1;

// =============================================================================
// Configuration
// =============================================================================

/// Tuning for the remote adapter.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// HTTP request timeout.
    pub request_timeout: Duration,
    /// Time allowed for the channel join handshake.
    pub join_timeout: Duration,
    /// Socket heartbeat interval.
    pub heartbeat_interval: Duration,
    /// Buffered records per subscription.
    pub channel_capacity: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            channel_capacity: 1_024,
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Event source backed by the hosted REST and realtime APIs.
#[derive(Debug, Clone)]
pub struct RemoteEventSource {
    http: reqwest::Client,
    backend: BackendSettings,
    config: RemoteConfig,
}

impl RemoteEventSource {
    /// Create an adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(backend: BackendSettings, config: RemoteConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| TransportError::Request {
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            backend,
            config,
        })
    }

    fn target(&self) -> Result<(&str, &str), TransportError> {
        match (&self.backend.endpoint, &self.backend.credentials) {
            (Some(endpoint), Some(credentials)) => Ok((endpoint.as_str(), credentials.api_key())),
            _ => Err(TransportError::NotConfigured),
        }
    }

    /// Build the REST URL for a snapshot query.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter is not configured or the endpoint is
    /// not a valid URL.
    pub fn snapshot_url(&self, query: &SnapshotQuery) -> Result<Url, TransportError> {
        let (endpoint, _) = self.target()?;

        let mut params = vec![
            ("select".to_string(), "*".to_string()),
            ("limit".to_string(), query.limit.to_string()),
        ];
        if is_timestamped(query.topic) {
            params.push(("order".to_string(), "created_at.desc".to_string()));
        }
        if let Some(filter) = &query.filter {
            params.push((filter.column.clone(), format!("eq.{}", filter.value)));
        }

        Url::parse_with_params(&format!("{endpoint}/rest/v1/{}", query.topic.table()), &params)
            .map_err(|e| TransportError::Request {
                message: format!("invalid endpoint: {e}"),
            })
    }

    /// Build the realtime websocket URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter is not configured or the endpoint is
    /// not an http(s) URL.
    pub fn realtime_url(&self) -> Result<Url, TransportError> {
        let (endpoint, key) = self.target()?;

        let ws_base = if let Some(rest) = endpoint.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = endpoint.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(TransportError::Subscribe {
                message: format!("unsupported endpoint scheme: {endpoint}"),
            });
        };

        Url::parse_with_params(
            &format!("{ws_base}/realtime/v1/websocket"),
            &[("apikey", key), ("vsn", "1.0.0")],
        )
        .map_err(|e| TransportError::Subscribe {
            message: format!("invalid endpoint: {e}"),
        })
    }

    async fn join(
        &self,
        topic: Topic,
        filter: Option<&Filter>,
    ) -> Result<(SocketWrite, SocketRead), TransportError> {
        let (_, key) = self.target()?;
        let url = self.realtime_url()?;

        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(subscribe_error)?;
        let (mut write, mut read) = socket.split();

        let join = RealtimeFrame::join(topic, filter, key, JOIN_REF)
            .encode()
            .map_err(subscribe_error)?;
        write
            .send(Message::Text(join.into()))
            .await
            .map_err(subscribe_error)?;

        let ack = tokio::time::timeout(self.config.join_timeout, async {
            while let Some(message) = read.next().await {
                let Message::Text(text) = message.map_err(subscribe_error)? else {
                    continue;
                };
                let Ok(frame) = RealtimeFrame::decode(text.as_str()) else {
                    continue;
                };
                if frame.is_reply_to(JOIN_REF) {
                    return frame.error_reason().map_or(Ok(()), |reason| {
                        Err(TransportError::Subscribe { message: reason })
                    });
                }
            }
            Err(TransportError::Subscribe {
                message: "socket closed before join reply".to_string(),
            })
        })
        .await
        .map_err(|_| TransportError::Subscribe {
            message: "join timed out".to_string(),
        })?;
        ack?;

        Ok((write, read))
    }
}

#[async_trait]
impl EventSourcePort for RemoteEventSource {
    fn is_available(&self) -> bool {
        self.backend.is_configured()
    }

    async fn fetch_snapshot(&self, query: SnapshotQuery) -> Result<Vec<Record>, TransportError> {
        let (_, key) = self.target()?;
        let url = self.snapshot_url(&query)?;

        tracing::debug!(table = query.topic.table(), limit = query.limit, "Fetching snapshot");

        let response = self
            .http
            .get(url)
            .header("apikey", key)
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| TransportError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<Vec<Record>>()
            .await
            .map_err(|e| TransportError::Decode {
                message: e.to_string(),
            })
    }

    async fn subscribe(
        &self,
        topic: Topic,
        filter: Option<Filter>,
    ) -> Result<Subscription, TransportError> {
        let (write, read) = self.join(topic, filter.as_ref()).await?;

        let (tx, events) = mpsc::channel(self.config.channel_capacity);
        let token = CancellationToken::new();
        let channel = channel_topic(topic, filter.as_ref());

        tracing::info!(channel = %channel, "Realtime channel joined");

        tokio::spawn(pump(
            channel,
            write,
            read,
            tx,
            token.clone(),
            self.config.heartbeat_interval,
        ));

        Ok(Subscription {
            events,
            handle: SubscriptionHandle::new(topic, token),
        })
    }
}

/// Forward inserted rows until the handle closes, the consumer goes away or
/// the socket drops. The handle reads as closed once this returns.
async fn pump(
    channel: String,
    mut write: SocketWrite,
    mut read: SocketRead,
    tx: mpsc::Sender<Record>,
    cancel: CancellationToken,
    heartbeat_interval: Duration,
) {
    let _closed = cancel.clone().drop_guard();
    let mut heartbeat =
        tokio::time::interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut reference = JOIN_REF;

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                reference += 1;
                if let Ok(leave) = RealtimeFrame::leave(&channel, reference).encode() {
                    let _ = write.send(Message::Text(leave.into())).await;
                }
                let _ = write.close().await;
                tracing::debug!(channel = %channel, "Realtime channel left");
                return;
            }
            () = tx.closed() => {
                tracing::debug!(channel = %channel, "Realtime consumer dropped");
                let _ = write.close().await;
                return;
            }
            _ = heartbeat.tick() => {
                reference += 1;
                let Ok(frame) = RealtimeFrame::heartbeat(reference).encode() else {
                    continue;
                };
                if let Err(e) = write.send(Message::Text(frame.into())).await {
                    tracing::warn!(channel = %channel, error = %e, "Heartbeat failed, subscription ended");
                    return;
                }
            }
            message = read.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match RealtimeFrame::decode(text.as_str()) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(channel = %channel, error = %e, "Undecodable realtime frame");
                                continue;
                            }
                        };
                        if let Some(reason) = frame.error_reason() {
                            tracing::warn!(channel = %channel, reason = %reason, "Realtime channel error");
                            continue;
                        }
                        if let Some(record) = frame.inserted_record()
                            && tx.send(record).await.is_err()
                        {
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        tracing::warn!(channel = %channel, "Realtime socket closed, subscription ended");
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(channel = %channel, error = %e, "Realtime socket error, subscription ended");
                        return;
                    }
                }
            }
        }
    }
}

/// Tables ordered by creation time in snapshot queries.
const fn is_timestamped(topic: Topic) -> bool {
    !matches!(topic, Topic::ChatParticipants)
}

fn subscribe_error(error: impl std::fmt::Display) -> TransportError {
    TransportError::Subscribe {
        message: error.to_string(),
    }
}
