//! # WebSocket Sale Store Client
//!
//! [`WsSaleStore`] implements [`RemoteSaleStore`] against a sale hub over
//! a WebSocket that reconnects with exponential backoff.
//!
//! ## Connection Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    WebSocket Connection States                          │
//! │                                                                         │
//! │       ┌──────────────┐                                                 │
//! │       │  Connecting  │ ◄──────────────────────────────┐                │
//! │       └──────┬───────┘                                │                │
//! │              │ connect + Hello                        │ backoff        │
//! │              ▼                                        │ (500ms → 60s)  │
//! │       ┌──────────────┐      socket error / close     │                │
//! │       │    Online    │ ──────────────────────────────►┤                │
//! │       │              │      pending requests fail     │                │
//! │       └──────┬───────┘      with a connection error   │                │
//! │              │                                                          │
//! │              │ shutdown()                                               │
//! │              ▼                                                          │
//! │       ┌──────────────┐                                                 │
//! │       │   Offline    │                                                 │
//! │       └──────────────┘                                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Requests are correlated by `request_id`: each caller parks a oneshot
//! sender in the pending map and the connection task completes it when
//! the matching response arrives. Requests made while not `Online` fail
//! immediately so the manager can fall back to a local record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use rifa_core::{ConnectionStatus, NewSale, SalePatch, SaleRecord};

use crate::config::RifaConfig;
use crate::error::{StoreError, StoreErrorKind, SyncError, SyncResult};
use crate::protocol::{new_request_id, StoreMessage};
use crate::remote::{RemoteSaleStore, SaleSnapshot, StoreResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<StoreMessage>>>>;

// =============================================================================
// Transport Configuration
// =============================================================================

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: String,
    pub client_id: String,
    pub project_id: String,
    pub api_key: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Ping interval for keepalive.
    pub ping_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            url: String::new(),
            client_id: String::new(),
            project_id: String::new(),
            api_key: String::new(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Builds the transport settings, or `None` when no remote is configured.
    pub fn from_config(config: &RifaConfig) -> Option<Self> {
        let remote = config.remote.as_ref()?;
        Some(TransportConfig {
            url: remote.url.clone(),
            client_id: config.device_id().to_string(),
            project_id: remote.project_id.clone(),
            api_key: remote.api_key.clone(),
            connect_timeout: Duration::from_secs(config.transport.connect_timeout_secs),
            request_timeout: Duration::from_secs(config.transport.request_timeout_secs),
            initial_backoff: Duration::from_millis(config.transport.initial_backoff_ms),
            max_backoff: Duration::from_secs(config.transport.max_backoff_secs),
            ..Default::default()
        })
    }
}

// =============================================================================
// Client
// =============================================================================

/// Remote sale store reached over a WebSocket.
pub struct WsSaleStore {
    outgoing_tx: mpsc::Sender<StoreMessage>,
    pending: PendingMap,
    snapshot_rx: watch::Receiver<SaleSnapshot>,
    connection_rx: watch::Receiver<ConnectionStatus>,
    request_timeout: Duration,
    shutdown_tx: mpsc::Sender<()>,
}

impl WsSaleStore {
    /// Spawns the connection task and returns the client.
    ///
    /// The client starts in `Connecting`; callers that need the link up
    /// front can wait on [`RemoteSaleStore::watch_connection`].
    pub fn spawn(config: TransportConfig) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<StoreMessage>(100);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let (snapshot_tx, snapshot_rx) = watch::channel(SaleSnapshot::default());
        let (connection_tx, connection_rx) = watch::channel(ConnectionStatus::Connecting);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let request_timeout = config.request_timeout;

        let transport = Transport {
            config,
            outgoing_rx,
            shutdown_rx,
            snapshot_tx,
            connection_tx,
            pending: pending.clone(),
        };
        tokio::spawn(transport.run());

        WsSaleStore {
            outgoing_tx,
            pending,
            snapshot_rx,
            connection_rx,
            request_timeout,
            shutdown_tx,
        }
    }

    /// Closes the socket and stops reconnecting.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Transport already stopped".into()))
    }

    /// Sends one request and waits for its response.
    async fn request(&self, build: impl FnOnce(String) -> StoreMessage) -> StoreResult<StoreMessage> {
        if !self.connection_rx.borrow().is_online() {
            return Err(StoreError::connection("not connected to sale hub"));
        }

        let request_id = new_request_id();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        let message = build(request_id.clone());
        debug!(msg_type = %message.type_name(), request_id = %request_id, "Sending request");

        if self.outgoing_tx.send(message).await.is_err() {
            self.pending.lock().await.remove(&request_id);
            return Err(StoreError::connection("transport stopped"));
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(StoreMessage::Failed { error, .. })) => Err(error),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(StoreError::connection("connection lost before response")),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(StoreError::new(
                    StoreErrorKind::Transient,
                    format!("no response after {}s", self.request_timeout.as_secs()),
                ))
            }
        }
    }
}

fn unexpected(response: StoreMessage) -> StoreError {
    StoreError::new(
        StoreErrorKind::Transient,
        format!("unexpected response {}", response.type_name()),
    )
}

#[async_trait]
impl RemoteSaleStore for WsSaleStore {
    fn subscribe(&self) -> watch::Receiver<SaleSnapshot> {
        self.snapshot_rx.clone()
    }

    fn watch_connection(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection_rx.clone()
    }

    async fn insert(&self, sale: NewSale) -> StoreResult<SaleRecord> {
        match self.request(|request_id| StoreMessage::Insert { request_id, sale }).await? {
            StoreMessage::Inserted { record, .. } => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    async fn update_by_id(&self, id: &str, patch: SalePatch) -> StoreResult<SaleRecord> {
        let id = id.to_string();
        match self
            .request(|request_id| StoreMessage::Update { request_id, id, patch })
            .await?
        {
            StoreMessage::Updated { record, .. } => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    async fn remove_by_id(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        match self.request(|request_id| StoreMessage::Remove { request_id, id }).await? {
            StoreMessage::Removed { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn query_all(&self) -> StoreResult<Vec<SaleRecord>> {
        match self.request(|request_id| StoreMessage::QueryAll { request_id }).await? {
            StoreMessage::Records { records, .. } => Ok(records),
            other => Err(unexpected(other)),
        }
    }
}

// =============================================================================
// Connection Task
// =============================================================================

struct Transport {
    config: TransportConfig,
    outgoing_rx: mpsc::Receiver<StoreMessage>,
    shutdown_rx: mpsc::Receiver<()>,
    snapshot_tx: watch::Sender<SaleSnapshot>,
    connection_tx: watch::Sender<ConnectionStatus>,
    pending: PendingMap,
}

impl Transport {
    async fn run(mut self) {
        info!(url = %self.config.url, "Transport starting");

        let mut backoff = self.create_backoff();

        loop {
            if self.shutdown_rx.try_recv().is_ok() {
                info!("Transport received shutdown signal");
                break;
            }

            self.set_status(ConnectionStatus::Connecting);

            match self.connect_and_greet().await {
                Ok(ws_stream) => {
                    info!("Connected to sale hub");
                    self.set_status(ConnectionStatus::Online);
                    backoff.reset();

                    match self.connection_loop(ws_stream).await {
                        Ok(true) => {
                            self.fail_pending().await;
                            break;
                        }
                        Ok(false) => info!("Sale hub closed the connection"),
                        Err(e) => warn!(?e, "Connection loop ended"),
                    }
                }
                Err(e) => {
                    error!(?e, "Failed to connect to sale hub");
                }
            }

            self.set_status(ConnectionStatus::Connecting);
            self.fail_pending().await;

            let duration = backoff.next_backoff().unwrap_or(self.config.max_backoff);
            debug!(?duration, "Waiting before reconnect");

            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown during backoff");
                    break;
                }
            }
        }

        self.set_status(ConnectionStatus::Offline);
        info!("Transport stopped");
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.connection_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }

    /// Fails every waiting request and drops requests that were queued
    /// for the lost connection.
    async fn fail_pending(&mut self) {
        let dropped = {
            let mut pending = self.pending.lock().await;
            let n = pending.len();
            pending.clear();
            n
        };
        while self.outgoing_rx.try_recv().is_ok() {}

        if dropped > 0 {
            warn!(dropped, "Pending requests failed by disconnect");
        }
    }

    /// Connects, sends Hello and waits for Welcome.
    async fn connect_and_greet(&self) -> SyncResult<WsStream> {
        let connect_future = connect_async(&self.config.url);

        let mut ws_stream = match timeout(self.config.connect_timeout, connect_future).await {
            Ok(Ok((ws_stream, response))) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                ws_stream
            }
            Ok(Err(e)) => return Err(SyncError::from(e)),
            Err(_) => return Err(SyncError::Timeout(self.config.connect_timeout.as_secs())),
        };

        let hello = StoreMessage::hello(
            &self.config.client_id,
            &self.config.project_id,
            &self.config.api_key,
        );
        ws_stream.send(WsMessage::Text(hello.to_json()?.into())).await?;

        loop {
            let next = timeout(self.config.connect_timeout, ws_stream.next())
                .await
                .map_err(|_| SyncError::Timeout(self.config.connect_timeout.as_secs()))?;

            match next {
                Some(Ok(WsMessage::Text(text))) => match StoreMessage::from_json(&text)? {
                    StoreMessage::Welcome(welcome) => {
                        info!(hub_id = %welcome.hub_id, "Handshake complete");
                        return Ok(ws_stream);
                    }
                    StoreMessage::Error { code, message } => {
                        return Err(SyncError::Unauthorized(format!("{}: {}", code, message)));
                    }
                    other => {
                        return Err(SyncError::InvalidMessage(format!(
                            "expected Welcome, got {}",
                            other.type_name()
                        )))
                    }
                },
                Some(Ok(WsMessage::Ping(data))) => {
                    ws_stream.send(WsMessage::Pong(data)).await?;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(SyncError::from(e)),
                None => return Err(SyncError::Disconnected),
            }
        }
    }

    /// Pumps messages until the socket closes.
    ///
    /// Returns `Ok(true)` when stopped by shutdown.
    async fn connection_loop(&mut self, ws_stream: WsStream) -> SyncResult<bool> {
        let (mut write, mut read) = ws_stream.split();

        let mut ping_interval = tokio::time::interval(self.config.ping_interval);
        ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(msg) = self.outgoing_rx.recv() => {
                    let json = msg.to_json()?;
                    write.send(WsMessage::Text(json.into())).await?;
                }

                incoming = read.next() => {
                    match incoming {
                        Some(Ok(WsMessage::Text(text))) => match StoreMessage::from_json(&text) {
                            Ok(msg) => self.route(msg).await?,
                            Err(e) => warn!(?e, "Failed to parse message"),
                        },
                        Some(Ok(WsMessage::Ping(data))) => {
                            write.send(WsMessage::Pong(data)).await?;
                        }
                        Some(Ok(WsMessage::Close(frame))) => {
                            info!(?frame, "Received close frame");
                            return Ok(false);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(SyncError::from(e)),
                        None => return Ok(false),
                    }
                }

                _ = ping_interval.tick() => {
                    write.send(WsMessage::Ping(vec![].into())).await?;
                }

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, closing connection");
                    let _ = write.send(WsMessage::Close(None)).await;
                    return Ok(true);
                }
            }
        }
    }

    async fn route(&self, msg: StoreMessage) -> SyncResult<()> {
        match msg {
            StoreMessage::Snapshot(snapshot) => {
                debug!(version = snapshot.version, count = snapshot.records.len(), "Snapshot received");
                self.snapshot_tx.send_replace(snapshot);
            }
            StoreMessage::Error { code, message } => {
                warn!(code = %code, message = %message, "Sale hub reported an error");
                return Err(SyncError::ConnectionFailed(format!("{}: {}", code, message)));
            }
            msg if msg.is_response() => {
                let waiter = match msg.request_id() {
                    Some(id) => self.pending.lock().await.remove(id),
                    None => None,
                };
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(msg);
                    }
                    None => debug!(msg_type = %msg.type_name(), "Response without a waiter"),
                }
            }
            other => debug!(msg_type = %other.type_name(), "Unhandled message type"),
        }
        Ok(())
    }

    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.config.initial_backoff,
            max_interval: self.config.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}
