//! # Raffle Events
//!
//! Typed notifications for the presentation layer. Dashboards and the
//! storefront grid re-render from these instead of polling the manager.
//!
//! ```text
//!   RaffleManager ──emit──► EventBus (tokio broadcast) ──► subscriber 1
//!                                                     └──► subscriber 2
//! ```
//!
//! Emitting never fails: with no subscriber the event is dropped, and a
//! subscriber that falls behind sees `Lagged` and should re-read state.

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{trace, warn};

use rifa_core::{ConnectionStatus, SaleRecord, SaleStatus};

/// Capacity of the event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Everything the manager tells the outside world.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RaffleEvent {
    /// A sale entered the cache through this session's write path.
    SaleAdded { sale: SaleRecord },

    /// The cache was reloaded (startup or full refresh).
    DataRefreshed { total: usize, pending: usize },

    /// A pushed snapshot was merged into the cache.
    RemoteSnapshotApplied { version: u64, total: usize },

    SaleStatusUpdated {
        id: String,
        turma: String,
        numero: u32,
        from: SaleStatus,
        to: SaleStatus,
    },

    SaleRemoved { id: String, turma: String, numero: u32 },

    /// A number became held by an acknowledged sale.
    NumberSold {
        turma: String,
        numero: u32,
        status: SaleStatus,
    },

    /// A local-only sale lost its number and was dropped.
    SaleRejected { sale: SaleRecord, reason: String },

    ConnectionChanged { status: ConnectionStatus },
}

/// Broadcast bus for [`RaffleEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RaffleEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RaffleEvent> {
        self.tx.subscribe()
    }

    /// Subscription as a `Stream`. Lagged gaps are logged and skipped.
    pub fn stream(&self) -> impl Stream<Item = RaffleEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|item| match item {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(?e, "Event subscriber fell behind");
                None
            }
        })
    }

    pub fn emit(&self, event: RaffleEvent) {
        trace!(?event, "Raffle event");
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(RaffleEvent::ConnectionChanged {
            status: ConnectionStatus::Offline,
        });

        for rx in [&mut a, &mut b] {
            assert_eq!(
                rx.recv().await.unwrap(),
                RaffleEvent::ConnectionChanged {
                    status: ConnectionStatus::Offline
                }
            );
        }
    }

    #[tokio::test]
    async fn test_stream_yields_events() {
        let bus = EventBus::new();
        let mut stream = Box::pin(bus.stream());

        bus.emit(RaffleEvent::DataRefreshed { total: 3, pending: 1 });
        assert_eq!(
            stream.next().await,
            Some(RaffleEvent::DataRefreshed { total: 3, pending: 1 })
        );
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.emit(RaffleEvent::DataRefreshed { total: 0, pending: 0 });
    }

    #[test]
    fn test_event_json_shape() {
        let event = RaffleEvent::NumberSold {
            turma: "3A".into(),
            numero: 42,
            status: SaleStatus::Pago,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "number_sold");
        assert_eq!(json["payload"]["numero"], 42);
        assert_eq!(json["payload"]["status"], "pago");
    }
}
