// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::error::ErrorCode;
use crate::event::DriverEvent;
use crate::test_support::TestDriver;

const CLIENT: i64 = 7;
const CHANNEL: &str = "aeron:udp?endpoint=localhost:4000";

fn ctx() -> DriverContext {
    DriverContext { timer_interval_ns: 1, session_id_seed: Some(42), ..DriverContext::default() }
}

#[test]
fn add_publication_registers_with_sender_and_replies_ready() {
    let mut driver = TestDriver::new();
    let correlation = driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();

    let cmds = driver.sender_cmds();
    assert!(matches!(cmds[0], SenderCmd::RegisterEndpoint { .. }));
    let SenderCmd::NewPublication { registration_id, stream_id, .. } = &cmds[1] else {
        unreachable!("expected NewPublication, got {:?}", cmds[1]);
    };
    assert_eq!(*registration_id, correlation);
    assert_eq!(*stream_id, 10);

    let events = driver.drain_events();
    assert_eq!(events.len(), 1);
    let DriverEvent::PublicationReady { correlation_id, registration_id, is_exclusive, .. } =
        &events[0]
    else {
        unreachable!("expected PublicationReady, got {:?}", events[0]);
    };
    assert_eq!(*correlation_id, correlation);
    assert_eq!(*registration_id, correlation);
    assert!(!*is_exclusive);
}

#[test]
fn shared_add_reuses_active_publication() {
    let mut driver = TestDriver::new();
    let first = driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();
    driver.drain_events();
    driver.sender_cmds();

    let second = driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();

    // No new endpoint or publication reaches the sender.
    assert!(driver.sender_cmds().is_empty());

    let events = driver.drain_events();
    let DriverEvent::PublicationReady { correlation_id, registration_id, .. } = &events[0] else {
        unreachable!("expected PublicationReady, got {:?}", events[0]);
    };
    assert_eq!(*correlation_id, second);
    assert_eq!(*registration_id, first);

    let snapshot = driver.conductor.snapshot();
    assert_eq!(snapshot.network_publications.len(), 1);
    assert_eq!(snapshot.network_publications[0].refs, 2);
}

#[test]
fn exclusive_adds_never_share() {
    let mut driver = TestDriver::new();
    driver.offer_add_exclusive_publication(CLIENT, 10, CHANNEL);
    driver.offer_add_exclusive_publication(CLIENT, 10, CHANNEL);
    driver.work();

    let snapshot = driver.conductor.snapshot();
    assert_eq!(snapshot.network_publications.len(), 2);
    assert_ne!(
        snapshot.network_publications[0].session_id,
        snapshot.network_publications[1].session_id
    );
    // One endpoint backs both.
    assert_eq!(snapshot.send_endpoints, 1);
}

#[test]
fn exclusive_replay_params_seed_positions() {
    let mut driver = TestDriver::new();
    driver.offer_add_exclusive_publication(
        CLIENT,
        10,
        "aeron:udp?endpoint=localhost:4000|mtu=8192|term-length=131072|init-term-id=7|term-id=11|term-offset=64",
    );
    driver.work();

    let cmds = driver.sender_cmds();
    let SenderCmd::NewPublication { log, .. } = &cmds[1] else {
        unreachable!("expected NewPublication, got {:?}", cmds[1]);
    };
    assert_eq!(log.mtu(), 8192);
    assert_eq!(log.term_length(), 131072);
    assert_eq!(log.producer_position(), 524352);
    assert_eq!(log.consumer_position(), 524352);

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::PublicationReady { is_exclusive: true, .. }));
}

#[test]
fn replay_params_on_shared_publication_are_rejected() {
    let mut driver = TestDriver::new();
    driver.offer_add_publication(
        CLIENT,
        10,
        "aeron:udp?endpoint=localhost:4000|init-term-id=1|term-id=2|term-offset=0",
    );
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::GenericError, .. }));
    assert_eq!(driver.conductor.error_count(), 1);
    assert!(driver.conductor.snapshot().network_publications.is_empty());
}

#[test]
fn session_id_on_shared_publication_is_rejected() {
    let mut driver = TestDriver::new();
    driver.offer_add_publication(CLIENT, 10, "aeron:udp?endpoint=localhost:4000|session-id=77");
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::GenericError, .. }));
}

#[test]
fn duplicate_fixed_session_id_is_rejected() {
    let mut driver = TestDriver::new();
    driver.offer_add_exclusive_publication(
        CLIENT,
        10,
        "aeron:udp?endpoint=localhost:4000|session-id=77",
    );
    driver.work();
    driver.drain_events();

    driver.offer_add_exclusive_publication(
        CLIENT,
        10,
        "aeron:udp?endpoint=localhost:4000|session-id=77",
    );
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::GenericError, .. }));
    assert_eq!(driver.conductor.snapshot().network_publications.len(), 1);
}

#[test]
fn session_ids_are_unique_across_network_and_ipc_on_a_stream() {
    let mut driver = TestDriver::new();
    driver.offer_add_exclusive_publication(CLIENT, 10, "aeron:ipc?session-id=77");
    driver.work();
    driver.drain_events();

    // The same session id on the same stream is taken, even across media.
    driver.offer_add_exclusive_publication(
        CLIENT,
        10,
        "aeron:udp?endpoint=localhost:4000|session-id=77",
    );
    driver.work();
    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::GenericError, .. }));

    // A different stream is free to use it.
    driver.offer_add_exclusive_publication(
        CLIENT,
        11,
        "aeron:udp?endpoint=localhost:4000|session-id=77",
    );
    driver.work();
    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::PublicationReady { session_id: 77, .. }));
}

#[test]
fn remove_unknown_publication_is_an_error() {
    let mut driver = TestDriver::new();
    let registration = driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();
    driver.drain_events();

    driver.offer_remove_publication(CLIENT, registration + 1);
    driver.work();

    let events = driver.drain_events();
    let DriverEvent::Error { code, correlation_id, .. } = &events[0] else {
        unreachable!("expected Error, got {:?}", events[0]);
    };
    assert_eq!(*code, ErrorCode::UnknownPublication);
    assert_ne!(*correlation_id, registration);
    assert_eq!(driver.conductor.error_count(), 1);
    // The publication is untouched.
    assert_eq!(driver.conductor.snapshot().network_publications[0].refs, 1);
}

#[test]
fn removing_a_subscription_id_as_publication_fails() {
    let mut driver = TestDriver::new();
    let sub = driver.offer_add_subscription(CLIENT, 10, CHANNEL);
    driver.work();
    driver.drain_events();

    driver.offer_remove_publication(CLIENT, sub);
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::UnknownPublication, .. }));
    assert_eq!(driver.conductor.snapshot().subscriptions, 1);
}

#[test]
fn log_allocation_failure_rolls_back_endpoint() {
    let mut driver = TestDriver::new();
    driver.log_factory.fail_next();
    driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::ResourceExhausted, .. }));

    // The endpoint created for this command was released again.
    let channel = ChannelUri::parse(CHANNEL).unwrap();
    assert!(!driver.conductor.has_send_endpoint(&channel));
    let cmds = driver.sender_cmds();
    assert!(matches!(cmds[0], SenderCmd::RegisterEndpoint { .. }));
    assert!(matches!(cmds[1], SenderCmd::CloseEndpoint { .. }));

    // The driver keeps working afterwards.
    driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();
    assert!(driver.conductor.has_send_endpoint(&channel));
}

#[test]
fn malformed_frame_is_counted_and_reported() {
    let mut driver = TestDriver::new();
    driver.offer(bytes::Bytes::from_static(&[0xFF, 0xEE, 0, 0, 1, 2, 3]));
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::MalformedCommand, .. }));
    assert_eq!(driver.conductor.error_count(), 1);
}

#[test]
fn subscription_registers_endpoint_and_stream_once() {
    let mut driver = TestDriver::new();
    let first = driver.offer_add_subscription(CLIENT, 10, CHANNEL);
    driver.work();

    let cmds = driver.receiver_cmds();
    assert!(matches!(cmds[0], ReceiverCmd::RegisterEndpoint { .. }));
    assert!(matches!(cmds[1], ReceiverCmd::AddSubscription { stream_id: 10, .. }));

    let events = driver.drain_events();
    let DriverEvent::SubscriptionReady { correlation_id, .. } = &events[0] else {
        unreachable!("expected SubscriptionReady, got {:?}", events[0]);
    };
    assert_eq!(*correlation_id, first);

    // Second subscription on the same (endpoint, stream): no new receiver
    // registration.
    driver.offer_add_subscription(CLIENT, 10, CHANNEL);
    driver.work();
    assert!(driver.receiver_cmds().is_empty());
}

#[test]
fn subscription_teardown_cascades_to_endpoint() {
    let mut driver = TestDriver::new();
    let a = driver.offer_add_subscription(CLIENT, 10, CHANNEL);
    let b = driver.offer_add_subscription(CLIENT, 11, CHANNEL);
    driver.work();
    driver.receiver_cmds();
    driver.drain_events();

    driver.offer_remove_subscription(CLIENT, a);
    driver.work();
    let cmds = driver.receiver_cmds();
    assert_eq!(cmds.len(), 1);
    assert!(matches!(cmds[0], ReceiverCmd::RemoveSubscription { stream_id: 10, .. }));

    driver.offer_remove_subscription(CLIENT, b);
    driver.work();
    let cmds = driver.receiver_cmds();
    assert!(matches!(cmds[0], ReceiverCmd::RemoveSubscription { stream_id: 11, .. }));
    assert!(matches!(cmds[1], ReceiverCmd::CloseEndpoint { .. }));

    let channel = ChannelUri::parse(CHANNEL).unwrap();
    assert!(!driver.conductor.has_receive_endpoint(&channel));
}

#[test]
fn reliability_conflict_rejects_second_subscription() {
    let mut driver = TestDriver::new();
    driver.offer_add_subscription(CLIENT, 10, CHANNEL);
    driver.work();
    driver.drain_events();

    driver.offer_add_subscription(CLIENT, 10, "aeron:udp?endpoint=localhost:4000|reliable=false");
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::GenericError, .. }));
    assert_eq!(driver.conductor.snapshot().subscriptions, 1);
}

#[test]
fn image_lifecycle_emits_paired_availability() {
    let mut driver = TestDriver::new();
    let sub = driver.offer_add_subscription(CLIENT, 10, CHANNEL);
    driver.work();
    let cmds = driver.receiver_cmds();
    let ReceiverCmd::RegisterEndpoint { endpoint_id, .. } = &cmds[0] else {
        unreachable!("expected RegisterEndpoint, got {:?}", cmds[0]);
    };
    let endpoint_id = *endpoint_id;
    driver.drain_events();

    // Receiver observes a new session on the endpoint.
    driver.inbound.offer(ConductorCmd::CreateImage {
        session_id: 77,
        stream_id: 10,
        endpoint_id,
        init_term_id: 0,
        active_term_id: 0,
        term_offset: 0,
        term_length: 65536,
        mtu: 1408,
        source_identity: "127.0.0.1:9000".to_string(),
    });
    driver.work();

    let cmds = driver.receiver_cmds();
    let ReceiverCmd::NewImage { correlation_id, .. } = &cmds[0] else {
        unreachable!("expected NewImage, got {:?}", cmds[0]);
    };
    let image_id = *correlation_id;
    // No availability yet: the image has not activated.
    assert!(driver.drain_events().is_empty());

    driver.inbound.offer(ConductorCmd::ImageActive { correlation_id: image_id });
    driver.work();
    let events = driver.drain_events();
    let DriverEvent::AvailableImage { correlation_id, session_id, subscriber_positions, .. } =
        &events[0]
    else {
        unreachable!("expected AvailableImage, got {:?}", events[0]);
    };
    assert_eq!(*correlation_id, image_id);
    assert_eq!(*session_id, 77);
    assert_eq!(subscriber_positions[0].subscription_registration_id, sub);

    driver.inbound.offer(ConductorCmd::ImageInactive { correlation_id: image_id });
    driver.work();
    let events = driver.drain_events();
    assert!(
        matches!(&events[0], DriverEvent::UnavailableImage { correlation_id, .. } if *correlation_id == image_id)
    );

    // Liveness expiry walks INACTIVE -> LINGER -> CLOSING -> deleted. The
    // silent client times out along the way, so the receiver also sees
    // its subscription teardown.
    let liveness = DriverContext::default().image_liveness_timeout_ns;
    driver.advance_and_work(liveness + 1);
    driver.advance_and_work(liveness + 1);
    let cmds = driver.receiver_cmds();
    assert!(cmds.iter().any(|cmd| {
        matches!(cmd, ReceiverCmd::RemoveImage { correlation_id } if *correlation_id == image_id)
    }));
    assert!(driver.conductor.snapshot().images.is_empty());
    // Exactly one unavailable went out.
    assert!(driver.drain_events().is_empty());
}

#[test]
fn late_subscriber_to_active_image_gets_available_after_ready() {
    let mut driver = TestDriver::new();
    driver.offer_add_subscription(CLIENT, 10, CHANNEL);
    driver.work();
    let cmds = driver.receiver_cmds();
    let ReceiverCmd::RegisterEndpoint { endpoint_id, .. } = &cmds[0] else {
        unreachable!("expected RegisterEndpoint, got {:?}", cmds[0]);
    };
    let endpoint_id = *endpoint_id;
    driver.inbound.offer(ConductorCmd::CreateImage {
        session_id: 77,
        stream_id: 10,
        endpoint_id,
        init_term_id: 0,
        active_term_id: 0,
        term_offset: 0,
        term_length: 65536,
        mtu: 1408,
        source_identity: "127.0.0.1:9000".to_string(),
    });
    driver.work();
    let cmds = driver.receiver_cmds();
    let ReceiverCmd::NewImage { correlation_id: image_id, .. } = &cmds[0] else {
        unreachable!("expected NewImage, got {:?}", cmds[0]);
    };
    let image_id = *image_id;
    driver.inbound.offer(ConductorCmd::ImageActive { correlation_id: image_id });
    driver.work();
    driver.drain_events();

    let late = driver.offer_add_subscription(CLIENT, 10, CHANNEL);
    driver.work();

    let events = driver.drain_events();
    assert!(
        matches!(&events[0], DriverEvent::SubscriptionReady { correlation_id, .. } if *correlation_id == late)
    );
    let DriverEvent::AvailableImage { correlation_id, subscriber_positions, .. } = &events[1] else {
        unreachable!("expected AvailableImage, got {:?}", events[1]);
    };
    assert_eq!(*correlation_id, image_id);
    assert_eq!(subscriber_positions.len(), 1);
    assert_eq!(subscriber_positions[0].subscription_registration_id, late);
}

#[test]
fn ipc_publication_and_subscription_link_up() {
    let mut driver = TestDriver::new();
    let publication = driver.offer_add_publication(CLIENT, 20, "aeron:ipc");
    driver.work();
    driver.drain_events();

    let sub = driver.offer_add_subscription(CLIENT, 20, "aeron:ipc");
    driver.work();

    let events = driver.drain_events();
    assert!(
        matches!(&events[0], DriverEvent::OperationSuccess { correlation_id } if *correlation_id == sub)
    );
    let DriverEvent::AvailableImage { correlation_id, .. } = &events[1] else {
        unreachable!("expected AvailableImage, got {:?}", events[1]);
    };
    assert_eq!(*correlation_id, publication);

    // Nothing goes near the network agents for IPC.
    assert!(driver.sender_cmds().is_empty());
    assert!(driver.receiver_cmds().is_empty());
}

#[test]
fn ipc_publication_without_subscribers_closes_on_remove() {
    let mut driver = TestDriver::new();
    let publication = driver.offer_add_publication(CLIENT, 20, "aeron:ipc");
    driver.work();
    driver.drain_events();

    driver.offer_remove_publication(CLIENT, publication);
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::OperationSuccess { .. }));
    assert!(driver.conductor.snapshot().ipc_publications.is_empty());
}

#[test]
fn destination_commands_forward_by_registration_kind() {
    let mut driver = TestDriver::new();
    let publication = driver.offer_add_publication(CLIENT, 10, CHANNEL);
    let subscription = driver.offer_add_subscription(CLIENT, 11, "aeron:udp?endpoint=localhost:5000");
    driver.work();
    driver.sender_cmds();
    driver.receiver_cmds();
    driver.drain_events();

    let correlation = driver.next_correlation();
    driver.offer(crate::command::encode_destination(
        true,
        CLIENT,
        correlation,
        publication,
        "aeron:udp?endpoint=localhost:6000",
    ));
    driver.work();
    assert!(matches!(driver.sender_cmds()[0], SenderCmd::AddDestination { .. }));
    assert!(matches!(driver.drain_events()[0], DriverEvent::OperationSuccess { .. }));

    let correlation = driver.next_correlation();
    driver.offer(crate::command::encode_destination(
        false,
        CLIENT,
        correlation,
        subscription,
        "aeron:udp?endpoint=localhost:6000",
    ));
    driver.work();
    assert!(matches!(driver.receiver_cmds()[0], ReceiverCmd::RemoveDestination { .. }));

    // Unknown registration.
    let correlation = driver.next_correlation();
    driver.offer(crate::command::encode_destination(
        true,
        CLIENT,
        correlation,
        999_999,
        "aeron:udp?endpoint=localhost:6000",
    ));
    driver.work();
    assert!(matches!(
        driver.drain_events().last(),
        Some(DriverEvent::Error { code: ErrorCode::GenericError, .. })
    ));
}

#[test]
fn client_timeout_releases_publications_then_subscriptions() {
    let mut driver = TestDriver::with_context(ctx());
    driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.offer_add_subscription(CLIENT, 10, CHANNEL);
    driver.work();
    driver.drain_events();
    driver.sender_cmds();
    driver.receiver_cmds();

    let liveness = ctx().client_liveness_timeout_ns;
    driver.advance_and_work(liveness + 1);

    assert_eq!(driver.conductor.client_timeout_count(), 1);
    assert_eq!(driver.conductor.snapshot().subscriptions, 0);
    // The publication left ACTIVE and is on its way out.
    assert!(driver.conductor.snapshot().network_publications[0].state != PubState::Active);
    // The receive endpoint went with the subscription.
    let channel = ChannelUri::parse(CHANNEL).unwrap();
    assert!(!driver.conductor.has_receive_endpoint(&channel));
}

#[test]
fn keepalive_preserves_registrations_indefinitely() {
    let mut driver = TestDriver::with_context(ctx());
    driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();
    driver.drain_events();

    let liveness = ctx().client_liveness_timeout_ns;
    for _ in 0..5 {
        driver.offer_keepalive(CLIENT);
        driver.advance_and_work(liveness / 2);
    }
    assert_eq!(driver.conductor.client_timeout_count(), 0);
    assert_eq!(driver.conductor.snapshot().network_publications[0].state, PubState::Active);
}

#[test]
fn closing_publication_waits_for_sender_ack() {
    let mut driver = TestDriver::with_context(ctx());
    let publication = driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();
    driver.drain_events();
    driver.sender_cmds();

    driver.offer_remove_publication(CLIENT, publication);
    driver.work();
    // Drained and unreferenced: straight to LINGER, then CLOSING.
    let linger = ctx().publication_linger_ns;
    driver.advance_and_work(linger + 1);

    let snapshot = driver.conductor.snapshot();
    assert_eq!(snapshot.network_publications[0].state, PubState::Closing);
    let cmds = driver.sender_cmds();
    assert!(
        matches!(&cmds[0], SenderCmd::RemovePublication { registration_id } if *registration_id == publication)
    );
    assert!(matches!(cmds[1], SenderCmd::CloseEndpoint { .. }));

    // Slot is retired on the ack.
    driver.inbound.offer(ConductorCmd::PublicationClosed { registration_id: publication });
    driver.work();
    assert!(driver.conductor.snapshot().network_publications.is_empty());
}

#[test]
fn fresh_add_during_linger_creates_a_new_publication() {
    let mut driver = TestDriver::with_context(ctx());
    let first = driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();
    driver.offer_remove_publication(CLIENT, first);
    driver.work();
    driver.drain_events();

    // Old publication lingers; a new add must not merge with it.
    let second = driver.offer_add_publication(CLIENT, 10, CHANNEL);
    driver.work();

    let snapshot = driver.conductor.snapshot();
    assert_eq!(snapshot.network_publications.len(), 2);
    let events = driver.drain_events();
    let DriverEvent::PublicationReady { registration_id, .. } = &events[0] else {
        unreachable!("expected PublicationReady, got {:?}", events[0]);
    };
    assert_eq!(*registration_id, second);
    assert_ne!(second, first);
}
