//! End-to-end flows over the in-process backends: admission through worker
//! processing to a terminal delivery state.

use std::time::Duration;

use anyhow::Result;
use tokio::time::sleep;

use dispatch_service::models::request::Channel;
use dispatch_service::models::status::DeliveryState;
use dispatch_service::store::StatusStore;
use dispatch_service::worker::ProcessOutcome;

use crate::support::{
    ScriptedTransport, SendScript, admit_request, default_worker, gateway, memory_stack,
};

#[tokio::test]
async fn test_admitted_notification_is_delivered() -> Result<()> {
    let stack = memory_stack();
    let gateway = gateway(&stack, 100, Duration::from_secs(60));
    let transport = ScriptedTransport::always_ok();
    let worker = default_worker(&stack, transport.clone());

    let admitted = gateway
        .admit(admit_request("r1", "u1", Channel::Email))
        .await?;

    let envelope = stack.broker.try_pop(Channel::Email).unwrap();
    assert_eq!(envelope.notification_id, admitted.notification_id);

    let outcome = worker.process(envelope).await?;
    assert_eq!(outcome, ProcessOutcome::Delivered);

    let status = stack
        .statuses
        .get(admitted.notification_id)
        .await?
        .unwrap();

    assert_eq!(status.state, DeliveryState::Sent);
    assert_eq!(status.attempt_count, 1);
    assert_eq!(transport.calls(), 1);

    Ok(())
}

/// A transient outage resolves through the delayed-redelivery loop without
/// any re-admission.
#[tokio::test]
async fn test_transient_outage_recovers_through_redelivery() -> Result<()> {
    let stack = memory_stack();
    let gateway = gateway(&stack, 100, Duration::from_secs(60));
    let transport = ScriptedTransport::scripted(vec![SendScript::Transient, SendScript::Succeed]);
    let worker = default_worker(&stack, transport.clone());

    let admitted = gateway
        .admit(admit_request("r1", "u1", Channel::Email))
        .await?;

    let envelope = stack.broker.try_pop(Channel::Email).unwrap();

    let outcome = worker.process(envelope).await?;
    assert!(matches!(outcome, ProcessOutcome::Scheduled { .. }));

    // Wait out the redelivery timer.
    sleep(Duration::from_millis(100)).await;

    let redelivered = stack.broker.try_pop(Channel::Email).unwrap();
    assert_eq!(redelivered.notification_id, admitted.notification_id);
    assert_eq!(redelivered.attempt_count, 1);

    let outcome = worker.process(redelivered).await?;
    assert_eq!(outcome, ProcessOutcome::Delivered);

    let status = stack
        .statuses
        .get(admitted.notification_id)
        .await?
        .unwrap();

    assert_eq!(status.state, DeliveryState::Sent);
    assert_eq!(status.attempt_count, 2);

    Ok(())
}

/// A duplicate admission after delivery replays the terminal state instead
/// of enqueueing again.
#[tokio::test]
async fn test_duplicate_admission_reports_terminal_state() -> Result<()> {
    let stack = memory_stack();
    let gateway = gateway(&stack, 100, Duration::from_secs(60));
    let worker = default_worker(&stack, ScriptedTransport::always_ok());

    let admitted = gateway
        .admit(admit_request("r1", "u1", Channel::Email))
        .await?;

    let envelope = stack.broker.try_pop(Channel::Email).unwrap();
    worker.process(envelope).await?;

    let replay = gateway
        .admit(admit_request("r1", "u1", Channel::Email))
        .await?;

    assert!(replay.duplicate);
    assert_eq!(replay.notification_id, admitted.notification_id);
    assert_eq!(replay.state, DeliveryState::Sent);
    assert_eq!(stack.broker.queue_depth(Channel::Email), 0);

    Ok(())
}

#[tokio::test]
async fn test_unsendable_notification_lands_in_dead_letter_queue() -> Result<()> {
    let stack = memory_stack();
    let gateway = gateway(&stack, 100, Duration::from_secs(60));
    let worker = default_worker(&stack, ScriptedTransport::always_permanent());

    let admitted = gateway
        .admit(admit_request("r1", "u1", Channel::Email))
        .await?;

    let envelope = stack.broker.try_pop(Channel::Email).unwrap();

    let outcome = worker.process(envelope).await?;
    assert!(matches!(outcome, ProcessOutcome::DeadLettered { .. }));

    let dead = stack.broker.dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].envelope.notification_id, admitted.notification_id);
    assert_eq!(dead[0].failure_reason, "invalid recipient");

    let replay = gateway
        .admit(admit_request("r1", "u1", Channel::Email))
        .await?;

    assert!(replay.duplicate);
    assert_eq!(replay.state, DeliveryState::DeadLettered);

    Ok(())
}
