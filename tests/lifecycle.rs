//! Connection lifecycle: service gating, teardown variants, link loss,
//! reconnects and the device registry's view of it all.

mod common;

use std::sync::Arc;

use garagelink::core::bluetooth::mock::MockRadio;
use garagelink::{BleError, ConnectionState, JsonFileStore, OpenerService, PeripheralIdentity};

use common::{opener, service_with, settle, OPENER_ADDRESS};

#[tokio::test]
async fn connect_reaches_connected_and_records_the_device() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);

    service.connect(&opener()).await.unwrap();

    assert_eq!(service.connection_state(), ConnectionState::Connected);
    assert!(!link.is_disconnected());
    assert_eq!(
        service.connected_peripheral().await.map(|p| p.address),
        Some(OPENER_ADDRESS.to_string())
    );
    assert_eq!(service.last_connected().await.as_deref(), Some(OPENER_ADDRESS));
    assert!(service
        .saved_devices()
        .await
        .iter()
        .any(|d| d.address == OPENER_ADDRESS));
}

#[tokio::test]
async fn connect_fails_when_the_opener_service_is_absent() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    link.set_services(Vec::new());
    let service = service_with(&radio);

    let result = service.connect(&opener()).await;
    assert!(matches!(result, Err(BleError::LinkFailure(_))));
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
    // The half-open transport is released, not leaked.
    assert!(link.is_closed());
}

#[tokio::test]
async fn connect_with_the_radio_off_fails_without_a_state_transition() {
    let radio = Arc::new(MockRadio::new());
    radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    radio.set_enabled(false);

    let connection = service.events().connection();
    let result = service.connect(&opener()).await;

    assert!(matches!(result, Err(BleError::LinkFailure(_))));
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
    assert!(!connection.has_changed().unwrap());
}

#[tokio::test]
async fn platform_rejection_is_reported_as_link_failure() {
    let radio = Arc::new(MockRadio::new());
    radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    radio.fail_next_connect("bonding rejected");

    let result = service.connect(&opener()).await;
    assert!(matches!(result, Err(BleError::LinkFailure(_))));
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);

    // The failure is transient; the same peripheral connects afterwards.
    service.connect(&opener()).await.unwrap();
    assert_eq!(service.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn failed_connect_with_radio_off_leaves_the_existing_connection_alone() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    radio.add_peripheral("22:22:22:22:22:22");
    let service = service_with(&radio);

    service.connect(&opener()).await.unwrap();
    radio.set_enabled(false);

    let other = PeripheralIdentity::new("22:22:22:22:22:22", Some("Garage Side".into()), false);
    let result = service.connect(&other).await;
    assert!(matches!(result, Err(BleError::LinkFailure(_))));

    // The attempt never started, so it must not have torn anything down.
    assert_eq!(service.connection_state(), ConnectionState::Connected);
    assert!(!link.is_disconnected());
    assert_eq!(
        service.connected_peripheral().await.map(|p| p.address),
        Some(OPENER_ADDRESS.to_string())
    );
}

#[tokio::test]
async fn a_new_connect_supersedes_the_previous_connection() {
    let radio = Arc::new(MockRadio::new());
    let first_link = radio.add_peripheral("11:11:11:11:11:11");
    let second_link = radio.add_peripheral("22:22:22:22:22:22");
    let service = service_with(&radio);

    let first = PeripheralIdentity::new("11:11:11:11:11:11", Some("Garage Door".into()), false);
    let second = PeripheralIdentity::new("22:22:22:22:22:22", Some("Garage Side".into()), false);

    service.connect(&first).await.unwrap();
    service.connect(&second).await.unwrap();

    assert!(first_link.is_closed());
    assert!(!second_link.is_disconnected());
    assert_eq!(
        service.connected_peripheral().await.map(|p| p.address),
        Some("22:22:22:22:22:22".to_string())
    );
}

#[tokio::test]
async fn disconnect_parks_the_handle_and_close_releases_it() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);

    service.connect(&opener()).await.unwrap();
    service.disconnect().await;

    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
    assert!(service.connected_peripheral().await.is_none());
    assert!(link.is_disconnected());
    assert!(!link.is_closed());

    service.close().await;
    assert!(link.is_closed());
}

#[tokio::test]
async fn close_twice_produces_no_second_transition() {
    let radio = Arc::new(MockRadio::new());
    radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);

    service.connect(&opener()).await.unwrap();
    service.close().await;

    let mut connection = service.events().connection();
    let mut operation = service.events().operation();
    connection.borrow_and_update();
    operation.borrow_and_update();

    service.close().await;
    assert!(!connection.has_changed().unwrap());
    assert!(!operation.has_changed().unwrap());
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn link_loss_publishes_disconnected_and_releases_the_handle() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);

    service.connect(&opener()).await.unwrap();
    let mut connection = service.events().connection();
    assert_eq!(*connection.borrow_and_update(), ConnectionState::Connected);

    link.drop_link();
    connection.changed().await.unwrap();
    settle().await;

    assert_eq!(*connection.borrow_and_update(), ConnectionState::Disconnected);
    assert!(link.is_closed());
    assert!(service.connected_peripheral().await.is_none());
}

#[tokio::test]
async fn reconnect_targets_the_last_connected_device() {
    let radio = Arc::new(MockRadio::new());
    radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);

    service.connect(&opener()).await.unwrap();
    service.disconnect().await;

    service.reconnect().await.unwrap();
    assert_eq!(service.connection_state(), ConnectionState::Connected);
    assert_eq!(
        service.connected_peripheral().await.map(|p| p.address),
        Some(OPENER_ADDRESS.to_string())
    );

    // Forgetting only drops the reconnect target, not the connection.
    service.forget_device().await;
    assert!(service.last_connected().await.is_none());
    assert!(matches!(
        service.reconnect().await,
        Err(BleError::LinkFailure(_))
    ));
    assert_eq!(service.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn reconnect_without_history_fails() {
    let radio = Arc::new(MockRadio::new());
    let service = service_with(&radio);

    assert!(matches!(
        service.reconnect().await,
        Err(BleError::LinkFailure(_))
    ));
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn known_list_merges_platform_devices_and_saved_extras() {
    let radio = Arc::new(MockRadio::new());
    let service = service_with(&radio);
    radio.set_known(vec![
        ("AA:BB:CC:00:00:01", Some("Garage Door")),
        ("AA:BB:CC:00:00:02", Some("Kitchen Speaker")),
    ]);

    // A failed connect still saves the address.
    let _ = service.connect(&opener()).await;

    let known = service.refresh_known().await;
    let addresses: Vec<&str> = known.iter().map(|p| p.address.as_str()).collect();
    assert_eq!(addresses, vec!["AA:BB:CC:00:00:01", OPENER_ADDRESS]);
    assert!(!known[0].saved);
    assert!(known[1].saved);
    assert_eq!(service.events().known_devices().len(), 2);
}

#[tokio::test]
async fn saved_devices_persist_across_service_instances() {
    let path = std::env::temp_dir().join(format!(
        "garagelink-persist-{}.json",
        std::process::id()
    ));
    let _ = tokio::fs::remove_file(&path).await;

    let radio = Arc::new(MockRadio::new());
    radio.add_peripheral(OPENER_ADDRESS);

    {
        let service = Arc::new(OpenerService::new(
            radio.clone(),
            Arc::new(JsonFileStore::new(path.clone())),
        ));
        service.connect(&opener()).await.unwrap();
        service.close().await;
    }

    let service = Arc::new(OpenerService::new(
        radio.clone(),
        Arc::new(JsonFileStore::new(path.clone())),
    ));
    assert!(service
        .saved_devices()
        .await
        .iter()
        .any(|d| d.address == OPENER_ADDRESS));
    assert_eq!(service.last_connected().await.as_deref(), Some(OPENER_ADDRESS));

    let _ = tokio::fs::remove_file(&path).await;
}
