//! Storefront sessions talking to a real sale hub over WebSocket.

use std::sync::Arc;
use std::time::Duration;

use rifa_core::{ConnectionStatus, NewSale, SaleStatus};
use rifa_db::{Database, DbConfig};
use rifa_sync::{
    HubHandle, HubServer, HubSettings, MemorySaleStore, RaffleManager, RemoteSaleStore,
    RifaConfig, SyncError, TransportConfig, WsSaleStore,
};

async fn start_hub(api_key: &str) -> HubHandle {
    let settings = HubSettings {
        port: 0,
        bind_addr: "127.0.0.1".to_string(),
        api_key: api_key.to_string(),
        persist: false,
        ..Default::default()
    };
    HubServer::new(settings, Arc::new(MemorySaleStore::new()))
        .start()
        .await
        .unwrap()
}

fn client(hub: &HubHandle, name: &str, api_key: &str) -> Arc<WsSaleStore> {
    Arc::new(WsSaleStore::spawn(TransportConfig {
        url: hub.ws_url(),
        client_id: name.to_string(),
        project_id: "rifa".to_string(),
        api_key: api_key.to_string(),
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
        ..Default::default()
    }))
}

async fn wait_online(store: &WsSaleStore) {
    let mut rx = store.watch_connection();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.is_online()))
        .await
        .expect("client did not connect")
        .unwrap();
}

async fn session(remote: Arc<WsSaleStore>) -> Arc<RaffleManager> {
    let mut config = RifaConfig::default();
    config.timing.checkout_item_delay_ms = 0;
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let remote: Arc<dyn RemoteSaleStore> = remote;
    Arc::new(RaffleManager::new(Arc::new(config), db, Some(remote)))
}

#[tokio::test]
async fn sale_written_through_hub_reaches_other_session() {
    let hub = start_hub("").await;
    let kiosk = client(&hub, "kiosk", "");
    let phone = client(&hub, "phone", "");
    wait_online(&kiosk).await;
    wait_online(&phone).await;

    let kiosk_manager = session(kiosk.clone()).await;
    let phone_manager = session(phone.clone()).await;
    let kiosk_handle = kiosk_manager.start().await.unwrap();
    let phone_handle = phone_manager.start().await.unwrap();

    let outcome = kiosk_manager
        .confirm_payment_and_send(NewSale::new("3A", 42, 500))
        .await
        .unwrap();
    assert!(outcome.is_synced());
    assert_eq!(hub.store().records().await.len(), 1);

    // The pushed snapshot reaches the other session.
    let seen = tokio::time::timeout(Duration::from_secs(5), async {
        while !phone_manager.is_number_sold("3A", 42).await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(seen.is_ok(), "phone session never saw the sale");

    // And the hub refuses the same number from the second session.
    let err = phone
        .insert(NewSale::new("3A", 42, 500))
        .await
        .unwrap_err();
    assert_eq!(err.held_status, Some(SaleStatus::Pago));

    let err = phone_manager
        .create_cash_reservation(NewSale::new("3A", 42, 500))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NumberTaken { .. }));

    assert_eq!(hub.client_count().await, 2);

    kiosk_handle.shutdown().await;
    phone_handle.shutdown().await;
    kiosk.shutdown().await.unwrap();
    phone.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn admin_update_and_remove_over_the_wire() {
    let hub = start_hub("").await;
    let remote = client(&hub, "admin", "");
    wait_online(&remote).await;
    let manager = session(remote.clone()).await;

    let record = manager
        .create_cash_reservation(NewSale::new("3B", 3, 500))
        .await
        .unwrap()
        .into_record();

    let paid = manager
        .update_sale_status(&record.id, SaleStatus::Pago, false)
        .await
        .unwrap();
    assert_eq!(paid.status, SaleStatus::Pago);

    let total = manager.refresh().await.unwrap();
    assert_eq!(total, 1);

    manager.remove_sale(&record.id).await.unwrap();
    assert!(hub.store().records().await.is_empty());
    assert!(manager.get_available_numbers("3B").await.unwrap().contains(&3));

    remote.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}

#[tokio::test]
async fn wrong_api_key_never_goes_online() {
    let hub = start_hub("segredo").await;
    let remote = client(&hub, "intruso", "errado");

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_ne!(*remote.watch_connection().borrow(), ConnectionStatus::Online);

    let err = remote.query_all().await.unwrap_err();
    assert_eq!(err.kind, rifa_sync::StoreErrorKind::Connection);

    remote.shutdown().await.unwrap();
    hub.shutdown().await.unwrap();
}
