//! # Sale Store Protocol
//!
//! Messages exchanged between a storefront session ([`WsSaleStore`]) and
//! the sale hub ([`HubServer`]).
//!
//! [`WsSaleStore`]: crate::transport::WsSaleStore
//! [`HubServer`]: crate::hub::HubServer
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Sale Store Messages                                │
//! │                                                                         │
//! │  HANDSHAKE                                                             │
//! │  ─────────                                                             │
//! │  session ───► Hello { client_id, project_id, api_key, version }        │
//! │  hub     ◄─── Welcome { hub_id, protocol_version }                     │
//! │  hub     ◄─── Snapshot { version, records }     (immediately after)    │
//! │                                                                         │
//! │  LIVE FEED                                                             │
//! │  ─────────                                                             │
//! │  hub     ───► Snapshot { version, records }     (on every change)      │
//! │                                                                         │
//! │  REQUESTS (correlated by request_id)                                   │
//! │  ───────────────────────────────────                                   │
//! │  Insert   { sale }          ──► Inserted { record }                    │
//! │  Update   { id, patch }     ──► Updated  { record }                    │
//! │  Remove   { id }            ──► Removed  { id }                        │
//! │  QueryAll                   ──► Records  { records }                   │
//! │  any of the above           ──► Failed   { error }                     │
//! │                                                                         │
//! │  ERROR                                                                 │
//! │  ─────                                                                 │
//! │  hub     ───► Error { code, message }   (connection-level, then close) │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire Format
//! Adjacently tagged JSON:
//! ```json
//! { "type": "Insert", "payload": { "request_id": "...", "sale": { ... } } }
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rifa_core::{NewSale, SalePatch, SaleRecord};

use crate::error::StoreError;
use crate::remote::SaleSnapshot;

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

// =============================================================================
// Main Message Enum
// =============================================================================

/// All sale store protocol messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum StoreMessage {
    // =========================================================================
    // Handshake
    // =========================================================================
    Hello(HelloPayload),

    Welcome(WelcomePayload),

    // =========================================================================
    // Live Feed
    // =========================================================================
    /// Full collection, pushed on every change.
    Snapshot(SaleSnapshot),

    // =========================================================================
    // Requests
    // =========================================================================
    Insert { request_id: String, sale: NewSale },

    Update {
        request_id: String,
        id: String,
        patch: SalePatch,
    },

    Remove { request_id: String, id: String },

    QueryAll { request_id: String },

    // =========================================================================
    // Responses
    // =========================================================================
    Inserted { request_id: String, record: SaleRecord },

    Updated { request_id: String, record: SaleRecord },

    Removed { request_id: String, id: String },

    Records {
        request_id: String,
        records: Vec<SaleRecord>,
    },

    Failed {
        request_id: String,
        error: StoreError,
    },

    // =========================================================================
    // Errors
    // =========================================================================
    /// Connection-level failure; the hub closes the socket after sending it.
    Error { code: String, message: String },
}

// =============================================================================
// Handshake Payloads
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    pub client_id: String,
    pub project_id: String,
    #[serde(default)]
    pub api_key: String,
    pub protocol_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WelcomePayload {
    pub hub_id: String,
    pub protocol_version: u32,
}

// =============================================================================
// Helper Methods
// =============================================================================

/// A fresh request correlation id.
pub fn new_request_id() -> String {
    Uuid::new_v4().to_string()
}

impl StoreMessage {
    /// Returns the message type name (for logging).
    pub fn type_name(&self) -> &'static str {
        match self {
            StoreMessage::Hello(_) => "Hello",
            StoreMessage::Welcome(_) => "Welcome",
            StoreMessage::Snapshot(_) => "Snapshot",
            StoreMessage::Insert { .. } => "Insert",
            StoreMessage::Update { .. } => "Update",
            StoreMessage::Remove { .. } => "Remove",
            StoreMessage::QueryAll { .. } => "QueryAll",
            StoreMessage::Inserted { .. } => "Inserted",
            StoreMessage::Updated { .. } => "Updated",
            StoreMessage::Removed { .. } => "Removed",
            StoreMessage::Records { .. } => "Records",
            StoreMessage::Failed { .. } => "Failed",
            StoreMessage::Error { .. } => "Error",
        }
    }

    pub fn hello(client_id: &str, project_id: &str, api_key: &str) -> Self {
        StoreMessage::Hello(HelloPayload {
            client_id: client_id.to_string(),
            project_id: project_id.to_string(),
            api_key: api_key.to_string(),
            protocol_version: PROTOCOL_VERSION,
        })
    }

    pub fn error(code: &str, message: &str) -> Self {
        StoreMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Correlation id of a request or response. `None` for handshake,
    /// snapshots and connection errors.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            StoreMessage::Insert { request_id, .. }
            | StoreMessage::Update { request_id, .. }
            | StoreMessage::Remove { request_id, .. }
            | StoreMessage::QueryAll { request_id }
            | StoreMessage::Inserted { request_id, .. }
            | StoreMessage::Updated { request_id, .. }
            | StoreMessage::Removed { request_id, .. }
            | StoreMessage::Records { request_id, .. }
            | StoreMessage::Failed { request_id, .. } => Some(request_id),
            _ => None,
        }
    }

    /// Whether this is a response the client should route to a waiter.
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            StoreMessage::Inserted { .. }
                | StoreMessage::Updated { .. }
                | StoreMessage::Removed { .. }
                | StoreMessage::Records { .. }
                | StoreMessage::Failed { .. }
        )
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreErrorKind;
    use rifa_core::SaleStatus;

    #[test]
    fn test_hello_wire_format() {
        let msg = StoreMessage::hello("totem-1", "rifa-formatura", "k");
        let json = msg.to_json().unwrap();
        assert!(json.contains(r#""type":"Hello""#));
        assert!(json.contains(r#""client_id":"totem-1""#));
        assert!(json.contains(&format!(r#""protocol_version":{}"#, PROTOCOL_VERSION)));
    }

    #[test]
    fn test_insert_parses_from_json() {
        let json = r#"{
            "type": "Insert",
            "payload": {
                "request_id": "r-1",
                "sale": {
                    "turma": "3A", "numero": 42, "nome": "Ana", "telefone": null,
                    "status": "pendente", "payment_method": "dinheiro", "source": "online",
                    "order_id": null, "price_cents": 500, "expires_at": null, "local_id": null
                }
            }
        }"#;

        let msg = StoreMessage::from_json(json).unwrap();
        assert_eq!(msg.type_name(), "Insert");
        assert_eq!(msg.request_id(), Some("r-1"));
        assert!(!msg.is_response());
        match msg {
            StoreMessage::Insert { sale, .. } => {
                assert_eq!(sale.numero, 42);
                assert_eq!(sale.status, SaleStatus::Pendente);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failed_carries_error_kind() {
        let msg = StoreMessage::Failed {
            request_id: "r-2".into(),
            error: StoreError::number_held("3B", 17, SaleStatus::Pago),
        };
        let parsed = StoreMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert!(parsed.is_response());
        match parsed {
            StoreMessage::Failed { error, .. } => {
                assert_eq!(error.kind, StoreErrorKind::Precondition);
                assert_eq!(error.held_status, Some(SaleStatus::Pago));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_and_error_have_no_request_id() {
        assert_eq!(StoreMessage::Snapshot(SaleSnapshot::default()).request_id(), None);
        assert_eq!(StoreMessage::error("auth", "bad key").request_id(), None);
    }
}
