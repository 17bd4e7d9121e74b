//! # Sale Hub Server
//!
//! The WebSocket service hosting the shared sale collection. Every
//! storefront session connects here through [`WsSaleStore`].
//!
//! [`WsSaleStore`]: crate::transport::WsSaleStore
//!
//! ## Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sale Hub Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                      HubServer (Axum)                           │   │
//! │  │                                                                 │   │
//! │  │  /ws endpoint ──▶ WebSocket upgrade                            │   │
//! │  │  /health      ──▶ "OK"                                         │   │
//! │  │                        │                                        │   │
//! │  │                        ▼                                        │   │
//! │  │              ┌─────────────────┐                                │   │
//! │  │              │  per-session    │ ── Hello checked against       │   │
//! │  │              │  socket task    │    project id + api key        │   │
//! │  │              └────────┬────────┘                                │   │
//! │  │                       │ requests          ▲ snapshots           │   │
//! │  │                       ▼                   │ (watch)             │   │
//! │  │              ┌─────────────────────────────────────┐            │   │
//! │  │              │          MemorySaleStore            │            │   │
//! │  │              │  unique active (turma, numero)      │            │   │
//! │  │              │  write-through to hub_sales         │            │   │
//! │  │              └─────────────────────────────────────┘            │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};
use uuid::Uuid;

use rifa_db::HubSalesRepository;

use crate::config::HubSettings;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{HelloPayload, StoreMessage, WelcomePayload, PROTOCOL_VERSION};
use crate::remote::{MemorySaleStore, RemoteSaleStore};

// =============================================================================
// Constants
// =============================================================================

/// Ping interval to keep connections alive.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum message size (1MB).
const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// How long a new socket has to send Hello.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Hub State
// =============================================================================

/// A connected storefront session.
#[derive(Debug, Clone)]
pub struct ConnectedClient {
    pub client_id: String,
    pub addr: SocketAddr,
    pub connected_at: std::time::Instant,
}

struct HubState {
    hub_id: String,
    project_id: String,
    api_key: String,
    store: Arc<MemorySaleStore>,
    clients: RwLock<HashMap<String, ConnectedClient>>,
}

impl HubState {
    fn check_hello(&self, hello: &HelloPayload) -> Result<(), StoreMessage> {
        if hello.protocol_version != PROTOCOL_VERSION {
            return Err(StoreMessage::error(
                "UNSUPPORTED_VERSION",
                &format!("protocol version {} not supported", hello.protocol_version),
            ));
        }
        if hello.project_id != self.project_id {
            return Err(StoreMessage::error("PROJECT_MISMATCH", "Project ID does not match"));
        }
        if !self.api_key.is_empty() && hello.api_key != self.api_key {
            return Err(StoreMessage::error("PERMISSION_DENIED", "Invalid API key"));
        }
        Ok(())
    }
}

// =============================================================================
// Hub Server
// =============================================================================

/// WebSocket server hosting the sale collection.
pub struct HubServer {
    settings: HubSettings,
    state: Arc<HubState>,
}

/// Handle for controlling a running hub.
#[derive(Clone)]
pub struct HubHandle {
    state: Arc<HubState>,
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl HubHandle {
    /// Address the listener is bound to (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL clients should connect to.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.local_addr)
    }

    pub fn store(&self) -> Arc<MemorySaleStore> {
        self.state.store.clone()
    }

    pub async fn client_count(&self) -> usize {
        self.state.clients.read().await.len()
    }

    pub async fn client_ids(&self) -> Vec<String> {
        self.state.clients.read().await.keys().cloned().collect()
    }

    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Hub shutdown channel closed".into()))
    }
}

impl HubServer {
    pub fn new(settings: HubSettings, store: Arc<MemorySaleStore>) -> Self {
        let state = Arc::new(HubState {
            hub_id: Uuid::new_v4().to_string(),
            project_id: settings.project_id.clone(),
            api_key: settings.api_key.clone(),
            store,
            clients: RwLock::new(HashMap::new()),
        });
        HubServer { settings, state }
    }

    /// Builds the backing store from `settings`. With persistence on, the
    /// collection resumes from `hub_sales` and every change is written back.
    pub async fn open(settings: HubSettings, repo: HubSalesRepository) -> SyncResult<Self> {
        let mut store = MemorySaleStore::new().with_unique_active(settings.enforce_unique_active);

        if settings.persist {
            let existing = repo.load_all().await?;
            store = store.with_persistence(repo);
            store.seed(existing).await;
        }

        Ok(Self::new(settings, Arc::new(store)))
    }

    /// Binds the listener, starts serving and returns a handle.
    pub async fn start(self) -> SyncResult<HubHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let app = Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .with_state(self.state.clone());

        let bind_addr = self.settings.bind_address();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            SyncError::ConnectionFailed(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::ConnectionFailed(e.to_string()))?;

        info!(addr = %local_addr, "Sale hub started");

        tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                info!("Sale hub shutting down");
            })
            .await;

            if let Err(e) = result {
                warn!(?e, "Sale hub server error");
            }
        });

        Ok(HubHandle {
            state: self.state,
            local_addr,
            shutdown_tx,
        })
    }
}

// =============================================================================
// WebSocket Handler
// =============================================================================

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<HubState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    debug!(addr = %addr, "New WebSocket connection");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state, addr))
}

async fn handle_socket(socket: WebSocket, state: Arc<HubState>, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    let hello = match receive_hello(&mut receiver).await {
        Ok(hello) => hello,
        Err(e) => {
            warn!(addr = %addr, ?e, "Failed to receive Hello - closing connection");
            return;
        }
    };

    if let Err(reject) = state.check_hello(&hello) {
        warn!(client_id = %hello.client_id, addr = %addr, ?reject, "Rejecting session");
        let _ = send_message(&mut sender, &reject).await;
        return;
    }

    let client_id = hello.client_id.clone();
    info!(client_id = %client_id, addr = %addr, "Session authenticated");

    state.clients.write().await.insert(
        client_id.clone(),
        ConnectedClient {
            client_id: client_id.clone(),
            addr,
            connected_at: std::time::Instant::now(),
        },
    );

    let welcome = StoreMessage::Welcome(WelcomePayload {
        hub_id: state.hub_id.clone(),
        protocol_version: PROTOCOL_VERSION,
    });
    if let Err(e) = send_message(&mut sender, &welcome).await {
        warn!(client_id = %client_id, ?e, "Failed to send Welcome");
        remove_client(&state, &client_id).await;
        return;
    }

    // Single writer task; everything else queues here.
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(64);
    let outgoing_handle = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Snapshot feed: current state first, then every change.
    let mut snapshot_rx = state.store.subscribe();
    let snapshot_tx = outgoing_tx.clone();
    let snapshot_handle = tokio::spawn(async move {
        loop {
            let snapshot = snapshot_rx.borrow_and_update().clone();
            match encode(&StoreMessage::Snapshot(snapshot)) {
                Some(msg) => {
                    if snapshot_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                None => break,
            }
            if snapshot_rx.changed().await.is_err() {
                break;
            }
        }
    });

    let ping_tx = outgoing_tx.clone();
    let ping_handle = tokio::spawn(async move {
        let mut ping_interval = interval(PING_INTERVAL);
        loop {
            ping_interval.tick().await;
            if ping_tx.send(Message::Ping(axum::body::Bytes::new())).await.is_err() {
                break;
            }
        }
    });

    loop {
        match receiver.next().await {
            Some(Ok(Message::Text(text))) => match StoreMessage::from_json(&text) {
                Ok(request) => {
                    if let Some(response) = handle_request(&state, &client_id, request).await {
                        if let Some(msg) = encode(&response) {
                            if outgoing_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => debug!(client_id = %client_id, ?e, "Invalid message format"),
            },
            Some(Ok(Message::Ping(data))) => {
                let _ = outgoing_tx.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) => {
                info!(client_id = %client_id, "Client requested close");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(client_id = %client_id, ?e, "WebSocket error");
                break;
            }
            None => {
                info!(client_id = %client_id, "Client disconnected");
                break;
            }
        }
    }

    ping_handle.abort();
    snapshot_handle.abort();
    outgoing_handle.abort();
    remove_client(&state, &client_id).await;
}

/// Executes one request against the store.
async fn handle_request(state: &HubState, client_id: &str, msg: StoreMessage) -> Option<StoreMessage> {
    debug!(client_id = %client_id, msg_type = %msg.type_name(), "Request");

    let response = match msg {
        StoreMessage::Insert { request_id, sale } => match state.store.insert(sale).await {
            Ok(record) => StoreMessage::Inserted { request_id, record },
            Err(error) => StoreMessage::Failed { request_id, error },
        },
        StoreMessage::Update {
            request_id,
            id,
            patch,
        } => match state.store.update_by_id(&id, patch).await {
            Ok(record) => StoreMessage::Updated { request_id, record },
            Err(error) => StoreMessage::Failed { request_id, error },
        },
        StoreMessage::Remove { request_id, id } => match state.store.remove_by_id(&id).await {
            Ok(()) => StoreMessage::Removed { request_id, id },
            Err(error) => StoreMessage::Failed { request_id, error },
        },
        StoreMessage::QueryAll { request_id } => match state.store.query_all().await {
            Ok(records) => StoreMessage::Records { request_id, records },
            Err(error) => StoreMessage::Failed { request_id, error },
        },
        other => {
            debug!(client_id = %client_id, msg_type = %other.type_name(), "Ignoring non-request");
            return None;
        }
    };

    Some(response)
}

async fn receive_hello(receiver: &mut SplitStream<WebSocket>) -> SyncResult<HelloPayload> {
    let next = tokio::time::timeout(HELLO_TIMEOUT, receiver.next())
        .await
        .map_err(|_| SyncError::Timeout(HELLO_TIMEOUT.as_secs()))?;

    match next {
        Some(Ok(Message::Text(text))) => match StoreMessage::from_json(&text)? {
            StoreMessage::Hello(payload) => Ok(payload),
            other => Err(SyncError::InvalidMessage(format!(
                "expected Hello, got {}",
                other.type_name()
            ))),
        },
        Some(Ok(_)) => Err(SyncError::InvalidMessage("Expected text message".into())),
        Some(Err(e)) => Err(SyncError::WebSocketError(e.to_string())),
        None => Err(SyncError::Disconnected),
    }
}

fn encode(msg: &StoreMessage) -> Option<Message> {
    match msg.to_json() {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!(?e, msg_type = %msg.type_name(), "Failed to encode message");
            None
        }
    }
}

async fn send_message(sender: &mut SplitSink<WebSocket, Message>, msg: &StoreMessage) -> SyncResult<()> {
    let json = msg.to_json()?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| SyncError::WebSocketError(e.to_string()))
}

async fn remove_client(state: &HubState, client_id: &str) {
    if state.clients.write().await.remove(client_id).is_some() {
        info!(client_id = %client_id, "Session removed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(api_key: &str) -> HubState {
        HubState {
            hub_id: "hub".into(),
            project_id: "rifa".into(),
            api_key: api_key.into(),
            store: Arc::new(MemorySaleStore::new()),
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn hello(project_id: &str, api_key: &str, version: u32) -> HelloPayload {
        HelloPayload {
            client_id: "totem-1".into(),
            project_id: project_id.into(),
            api_key: api_key.into(),
            protocol_version: version,
        }
    }

    #[test]
    fn test_hello_checks() {
        let open = state("");
        assert!(open.check_hello(&hello("rifa", "anything", PROTOCOL_VERSION)).is_ok());
        assert!(open.check_hello(&hello("other", "", PROTOCOL_VERSION)).is_err());
        assert!(open.check_hello(&hello("rifa", "", PROTOCOL_VERSION + 1)).is_err());

        let locked = state("secret");
        assert!(locked.check_hello(&hello("rifa", "secret", PROTOCOL_VERSION)).is_ok());
        match locked.check_hello(&hello("rifa", "wrong", PROTOCOL_VERSION)) {
            Err(StoreMessage::Error { code, .. }) => assert_eq!(code, "PERMISSION_DENIED"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_request_maps_store_results() {
        let state = state("");
        let sale = rifa_core::NewSale::new("3A", 42, 500);

        let inserted = handle_request(
            &state,
            "totem-1",
            StoreMessage::Insert {
                request_id: "r1".into(),
                sale: sale.clone(),
            },
        )
        .await;
        assert!(matches!(inserted, Some(StoreMessage::Inserted { .. })));

        let refused = handle_request(
            &state,
            "totem-1",
            StoreMessage::Insert {
                request_id: "r2".into(),
                sale,
            },
        )
        .await;
        match refused {
            Some(StoreMessage::Failed { request_id, error }) => {
                assert_eq!(request_id, "r2");
                assert_eq!(error.kind, crate::error::StoreErrorKind::Precondition);
            }
            other => panic!("unexpected {other:?}"),
        }

        let ignored = handle_request(&state, "totem-1", StoreMessage::error("x", "y")).await;
        assert!(ignored.is_none());
    }
}
