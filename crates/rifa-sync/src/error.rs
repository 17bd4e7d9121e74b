//! # Sync Error Types
//!
//! Error types for reconciliation, checkout and the sale store link.
//!
//! ```text
//!   sale rules      NumberTaken, LocalOnlyRecord, SaleNotFound, NothingToSubmit,
//!                   SubmissionInProgress
//!   store contract  Store(StoreError { kind, held_status })
//!   link            ConnectionFailed, Disconnected, Timeout, Unauthorized, Offline
//!   wire            InvalidMessage, MalformedPayload
//!   setup           InvalidConfig, MissingDeviceId, InvalidUrl, ConfigRead/ConfigWrite
//!   local           Core (cart/order/validation), DatabaseError
//! ```
//!
//! `is_conflict()` errors are final for that number. `is_retryable()` errors
//! leave a local record behind for the resync sweep.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rifa_core::{CoreError, SaleStatus};

/// Result type alias for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

// =============================================================================
// Sale Store Errors
// =============================================================================

/// Failure classes of the remote sale store contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreErrorKind {
    /// The store cannot be reached.
    Connection,
    /// Credentials rejected.
    Permission,
    /// A write was refused because its precondition does not hold,
    /// e.g. the number is already held by an active sale.
    Precondition,
    NotFound,
    /// Worth retrying later.
    Transient,
}

impl std::fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StoreErrorKind::Connection => "connection",
            StoreErrorKind::Permission => "permission",
            StoreErrorKind::Precondition => "precondition",
            StoreErrorKind::NotFound => "not found",
            StoreErrorKind::Transient => "transient",
        };
        write!(f, "{}", s)
    }
}

/// An error reported by a [`RemoteSaleStore`](crate::remote::RemoteSaleStore).
///
/// Travels over the wire inside `Failed` messages.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("sale store {kind} error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
    /// Status of the sale holding the number, for uniqueness rejections.
    #[serde(default)]
    pub held_status: Option<SaleStatus>,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        StoreError {
            kind,
            message: message.into(),
            held_status: None,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::Connection, message)
    }

    pub fn not_found(id: &str) -> Self {
        Self::new(StoreErrorKind::NotFound, format!("sale {id} not found"))
    }

    /// Uniqueness rejection: `(turma, numero)` is held by an active sale.
    pub fn number_held(turma: &str, numero: u32, status: SaleStatus) -> Self {
        StoreError {
            kind: StoreErrorKind::Precondition,
            message: format!("{turma}-{numero} is already {status}"),
            held_status: Some(status),
        }
    }
}

// =============================================================================
// Sync Error
// =============================================================================

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("This storefront has no device id")]
    MissingDeviceId,

    #[error("Invalid sale store URL: {0}")]
    InvalidUrl(String),

    #[error("Cannot read config: {0}")]
    ConfigRead(String),

    #[error("Cannot write config: {0}")]
    ConfigWrite(String),

    #[error("Cannot reach sale hub: {0}")]
    ConnectionFailed(String),

    #[error("Disconnected from sale store")]
    Disconnected,

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("WebSocket: {0}")]
    WebSocketError(String),

    /// A well-formed message arriving out of turn.
    #[error("Unexpected message: {0}")]
    InvalidMessage(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// Hello rejected by the hub.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The number is already held by an acknowledged active sale.
    #[error("{turma}-{numero} is already {status}")]
    NumberTaken {
        turma: String,
        numero: u32,
        status: SaleStatus,
    },

    /// The operation needs the sale store and there is no link.
    #[error("Sale store is offline")]
    Offline,

    /// Status changes and removals need an acknowledged record.
    #[error("Sale {id} exists only on this device and cannot be changed yet")]
    LocalOnlyRecord { id: String },

    #[error("Sale not found: {0}")]
    SaleNotFound(String),

    #[error("Invalid admin password")]
    InvalidPassword,

    #[error("Order {0} has no raffle numbers left to submit")]
    NothingToSubmit(String),

    /// Another call is still writing this order's numbers.
    #[error("Order {0} is already being submitted")]
    SubmissionInProgress(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Local database: {0}")]
    DatabaseError(String),

    /// A background task is gone.
    #[error("Channel closed: {0}")]
    ChannelError(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<rifa_db::DbError> for SyncError {
    fn from(err: rifa_db::DbError) -> Self {
        SyncError::DatabaseError(err.to_string())
    }
}

impl From<rifa_core::ValidationError> for SyncError {
    fn from(err: rifa_core::ValidationError) -> Self {
        SyncError::Core(CoreError::Validation(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::MalformedPayload(err.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        SyncError::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed => SyncError::Disconnected,
            WsError::AlreadyClosed => SyncError::Disconnected,
            WsError::Protocol(p) => SyncError::WebSocketError(p.to_string()),
            WsError::Io(io) => SyncError::ConnectionFailed(io.to_string()),
            WsError::Tls(tls) => SyncError::ConnectionFailed(format!("tls: {tls}")),
            other => SyncError::WebSocketError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigRead(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigRead(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigWrite(err.to_string())
    }
}

impl SyncError {
    /// The link or the store is down for now.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::ConnectionFailed(_)
            | SyncError::Disconnected
            | SyncError::Timeout(_)
            | SyncError::WebSocketError(_)
            | SyncError::Offline => true,
            SyncError::Store(e) => matches!(
                e.kind,
                StoreErrorKind::Connection | StoreErrorKind::Transient
            ),
            _ => false,
        }
    }

    /// Someone else holds the number.
    pub fn is_conflict(&self) -> bool {
        match self {
            SyncError::NumberTaken { .. } => true,
            SyncError::Store(e) => e.kind == StoreErrorKind::Precondition,
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::InvalidUrl(_)
                | SyncError::ConfigRead(_)
                | SyncError::ConfigWrite(_)
        )
    }
}
