//! Command channel behavior under paused time: the single-flight rule,
//! the timeout window, latched results and teardown interactions.

mod common;

use std::sync::Arc;
use std::time::Duration;

use garagelink::core::bluetooth::mock::{MockRadio, WriteScript};
use garagelink::{
    BleError, ConnectionState, DoorCommand, MemoryStore, OpenerService, OperationState,
    ServiceConfig,
};
use tokio::time::advance;

use common::{opener, service_with, settle, OPENER_ADDRESS};

#[tokio::test(start_paused = true)]
async fn trigger_success_latches_until_the_next_send() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    service.connect(&opener()).await.unwrap();

    link.script_write(WriteScript::AckAfter(Duration::from_millis(40)));
    let worker = service.clone();
    let first = tokio::spawn(async move { worker.trigger().await });
    settle().await;
    assert_eq!(service.operation_state(), OperationState::Sending);

    advance(Duration::from_millis(40)).await;
    settle().await;
    first.await.unwrap().unwrap();
    assert_eq!(service.operation_state(), OperationState::Success);
    assert_eq!(link.written(), vec![b"TRIGGER".to_vec()]);

    // The latched result holds until the next admission collapses it.
    let mut operation = service.events().operation();
    operation.borrow_and_update();
    service.send(&DoorCommand::custom("STATUS")).await.unwrap();
    assert!(operation.has_changed().unwrap());
    assert_eq!(service.operation_state(), OperationState::Success);
    assert_eq!(
        link.written(),
        vec![b"TRIGGER".to_vec(), b"STATUS".to_vec()]
    );
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_write_times_out_after_the_full_window() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    service.connect(&opener()).await.unwrap();

    link.script_write(WriteScript::Never);
    let worker = service.clone();
    let first = tokio::spawn(async move { worker.trigger().await });
    settle().await;
    assert_eq!(service.operation_state(), OperationState::Sending);

    advance(Duration::from_millis(4_999)).await;
    settle().await;
    assert!(!first.is_finished());

    advance(Duration::from_millis(2)).await;
    settle().await;
    assert!(first.is_finished());
    match first.await.unwrap() {
        Err(BleError::OperationTimeout(window)) => {
            assert_eq!(window, Duration::from_millis(5_000));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    // The failure was surfaced, then the channel returned to rest.
    assert_eq!(service.operation_state(), OperationState::Idle);
    assert_eq!(link.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn ack_arriving_after_the_timeout_is_ignored() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    service.connect(&opener()).await.unwrap();

    // The peripheral answers, but only 2 s after the window has closed.
    link.script_write(WriteScript::AckAfter(Duration::from_millis(7_000)));
    let worker = service.clone();
    let first = tokio::spawn(async move { worker.trigger().await });
    settle().await;
    assert_eq!(service.operation_state(), OperationState::Sending);

    advance(Duration::from_millis(5_001)).await;
    settle().await;
    assert!(matches!(
        first.await.unwrap(),
        Err(BleError::OperationTimeout(_))
    ));
    assert_eq!(service.operation_state(), OperationState::Idle);

    // The late acknowledgement lands on an already-resolved channel and
    // must not surface as a success or any other transition.
    let mut operation = service.events().operation();
    operation.borrow_and_update();
    advance(Duration::from_millis(4_000)).await;
    settle().await;
    assert!(!operation.has_changed().unwrap());
    assert_eq!(service.operation_state(), OperationState::Idle);
    assert_eq!(link.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn second_send_is_rejected_while_one_is_in_flight() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    service.connect(&opener()).await.unwrap();

    link.script_write(WriteScript::Never);
    let worker = service.clone();
    let first = tokio::spawn(async move { worker.trigger().await });
    settle().await;

    advance(Duration::from_millis(2_000)).await;
    settle().await;
    let second = service.send(&DoorCommand::custom("PING")).await;
    assert!(matches!(second, Err(BleError::AlreadyInFlight)));
    assert_eq!(service.operation_state(), OperationState::Sending);

    // The rejected attempt must not have disturbed the first one's clock.
    advance(Duration::from_millis(2_999)).await;
    settle().await;
    assert!(!first.is_finished());
    advance(Duration::from_millis(2)).await;
    settle().await;
    assert!(first.is_finished());
    assert!(matches!(
        first.await.unwrap(),
        Err(BleError::OperationTimeout(_))
    ));
    assert_eq!(link.write_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn rejected_write_latches_failed() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    service.connect(&opener()).await.unwrap();

    link.script_write(WriteScript::Reject("gatt error 133".into()));
    let result = service.trigger().await;
    assert!(matches!(result, Err(BleError::WriteRejected(_))));
    assert_eq!(service.operation_state(), OperationState::Failed);

    // A fresh send collapses the latch and succeeds.
    service.trigger().await.unwrap();
    assert_eq!(service.operation_state(), OperationState::Success);
}

#[tokio::test(start_paused = true)]
async fn send_without_a_connection_is_refused() {
    let radio = Arc::new(MockRadio::new());
    radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);

    let mut operation = service.events().operation();
    operation.borrow_and_update();

    let result = service.trigger().await;
    assert!(matches!(result, Err(BleError::NotConnected)));
    assert!(!operation.has_changed().unwrap());
    assert_eq!(service.operation_state(), OperationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn missing_characteristic_is_refused_before_sending() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    service.connect(&opener()).await.unwrap();
    link.clear_characteristics();

    let mut operation = service.events().operation();
    operation.borrow_and_update();

    let result = service.trigger().await;
    assert!(matches!(result, Err(BleError::CharacteristicUnavailable)));
    assert!(!operation.has_changed().unwrap());
    assert_eq!(link.write_count(), 0);
    assert_eq!(service.operation_state(), OperationState::Idle);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_sending_fails_the_command() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    service.connect(&opener()).await.unwrap();

    link.script_write(WriteScript::Never);
    let worker = service.clone();
    let first = tokio::spawn(async move { worker.trigger().await });
    settle().await;
    assert_eq!(service.operation_state(), OperationState::Sending);

    service.disconnect().await;
    settle().await;
    // The sender resolves with the teardown, not with its own timer.
    assert!(first.is_finished());
    let result = first.await.unwrap();
    assert!(matches!(result, Err(BleError::LinkFailure(_))));
    assert_eq!(service.operation_state(), OperationState::Idle);
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
    assert!(link.is_disconnected());
    assert!(!link.is_closed());
}

#[tokio::test(start_paused = true)]
async fn link_loss_while_sending_fails_the_command() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    service.connect(&opener()).await.unwrap();

    link.script_write(WriteScript::Never);
    let worker = service.clone();
    let first = tokio::spawn(async move { worker.trigger().await });
    settle().await;
    assert_eq!(service.operation_state(), OperationState::Sending);

    link.drop_link();
    settle().await;
    assert!(first.is_finished());
    let result = first.await.unwrap();
    assert!(matches!(result, Err(BleError::LinkFailure(_))));
    assert_eq!(service.connection_state(), ConnectionState::Disconnected);
    assert_eq!(service.operation_state(), OperationState::Idle);
    assert!(link.is_closed());
}

#[tokio::test(start_paused = true)]
async fn notifications_do_not_affect_command_state() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = service_with(&radio);
    service.connect(&opener()).await.unwrap();
    settle().await;

    link.push_notification(b"door:open");
    settle().await;

    assert_eq!(service.operation_state(), OperationState::Idle);
    assert_eq!(service.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn configured_timeout_is_respected() {
    let radio = Arc::new(MockRadio::new());
    let link = radio.add_peripheral(OPENER_ADDRESS);
    let service = Arc::new(OpenerService::with_config(
        radio.clone(),
        Arc::new(MemoryStore::new()),
        ServiceConfig {
            scan_window_ms: 10_000,
            command_timeout_ms: 1_000,
        },
    ));
    service.connect(&opener()).await.unwrap();

    link.script_write(WriteScript::Never);
    let worker = service.clone();
    let first = tokio::spawn(async move { worker.trigger().await });
    settle().await;

    advance(Duration::from_millis(999)).await;
    settle().await;
    assert!(!first.is_finished());
    advance(Duration::from_millis(2)).await;
    settle().await;
    assert!(first.is_finished());
    assert!(matches!(
        first.await.unwrap(),
        Err(BleError::OperationTimeout(window)) if window == Duration::from_millis(1_000)
    ));
}
