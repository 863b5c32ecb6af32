// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end conductor scenarios with literal timing values.

use weir::conductor::DriverContext;
use weir::error::ErrorCode;
use weir::event::DriverEvent;
use weir::proxy::{ConductorCmd, ReceiverCmd, SenderCmd};
use weir::test_support::TestDriver;
use weir::uri::ChannelUri;

use weir_specs::{correlations, drain_sender_with_acks, publication_ready};

const CLIENT: i64 = 1;
const CHANNEL_4000: &str = "aeron:udp?endpoint=localhost:4000";

fn ctx() -> DriverContext {
    DriverContext { timer_interval_ns: 1, session_id_seed: Some(7), ..DriverContext::default() }
}

fn driver() -> TestDriver {
    TestDriver::with_context(ctx())
}

#[test]
fn scenario_1_add_single_publication() {
    let mut driver = driver();
    driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    driver.work();

    let new_publications: Vec<SenderCmd> = driver
        .sender_cmds()
        .into_iter()
        .filter(|cmd| matches!(cmd, SenderCmd::NewPublication { .. }))
        .collect();
    assert_eq!(new_publications.len(), 1);
    assert!(matches!(new_publications[0], SenderCmd::NewPublication { stream_id: 10, .. }));

    let events = driver.drain_events();
    assert!(matches!(
        publication_ready(&events),
        Some(DriverEvent::PublicationReady { is_exclusive: false, .. })
    ));
}

#[test]
fn scenario_2_add_exclusive_with_replay() {
    let mut driver = driver();
    driver.offer_add_exclusive_publication(
        CLIENT,
        10,
        "aeron:udp?endpoint=localhost:4000|mtu=8192|term-length=131072|init-term-id=7|term-id=11|term-offset=64",
    );
    driver.work();

    let cmds = driver.sender_cmds();
    let log = cmds
        .iter()
        .find_map(|cmd| match cmd {
            SenderCmd::NewPublication { log, .. } => Some(log),
            _ => None,
        })
        .unwrap();
    assert_eq!(log.mtu(), 8192);
    // 131072 * (11 - 7) + 64
    assert_eq!(log.producer_position(), 524352);
    assert_eq!(log.consumer_position(), 524352);

    let events = driver.drain_events();
    assert!(matches!(
        publication_ready(&events),
        Some(DriverEvent::PublicationReady { is_exclusive: true, .. })
    ));
}

#[test]
fn scenario_3_remove_unknown_registration() {
    let mut driver = driver();
    let registration = driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    driver.work();
    driver.offer_remove_publication(CLIENT, registration + 1);
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(
        events[0],
        DriverEvent::PublicationReady { registration_id, .. } if registration_id == registration
    ));
    assert!(matches!(events[1], DriverEvent::Error { code: ErrorCode::UnknownPublication, .. }));
    assert_eq!(driver.conductor.error_count(), 1);
}

#[test]
fn scenario_4_publication_times_out_without_keepalive() {
    let mut driver = driver();
    driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    driver.work();
    driver.sender_cmds();

    let timeout = ctx().client_liveness_timeout_ns;
    let linger = ctx().publication_linger_ns;

    // Past the client liveness window: the publication is released.
    driver.advance_and_work(timeout + 1);
    // Past linger: the publication closes and the endpoint goes with it.
    driver.advance_and_work(linger + 1);

    let cmds = driver.sender_cmds();
    assert!(cmds.iter().any(|cmd| matches!(cmd, SenderCmd::RemovePublication { .. })));
    assert!(cmds.iter().any(|cmd| matches!(cmd, SenderCmd::CloseEndpoint { .. })));

    let channel = ChannelUri::parse(CHANNEL_4000).unwrap();
    assert!(!driver.conductor.has_send_endpoint(&channel));
}

#[test]
fn scenario_5_spy_subscription_sees_publication() {
    let mut driver = driver();
    let publication = driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    driver.work();
    driver.drain_events();
    driver.receiver_cmds();

    let spy = driver.offer_add_subscription(CLIENT, 10, "aeron-spy:aeron:udp?endpoint=localhost:4000");
    driver.work();

    // The receiver is never asked to register anything for a spy.
    assert!(driver.receiver_cmds().is_empty());

    let events = driver.drain_events();
    assert!(matches!(
        events[0],
        DriverEvent::OperationSuccess { correlation_id } if correlation_id == spy
    ));
    assert!(matches!(
        events[1],
        DriverEvent::AvailableImage { correlation_id, stream_id: 10, .. }
            if correlation_id == publication
    ));
}

#[test]
fn scenario_6_conflicting_reliability() {
    let mut driver = driver();
    driver.offer_add_subscription(CLIENT, 10, CHANNEL_4000);
    driver.work();
    driver.drain_events();

    driver.offer_add_subscription(CLIENT, 10, "aeron:udp?endpoint=localhost:4000|reliable=false");
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::GenericError, .. }));
}

#[test]
fn malformed_frame_never_halts_the_conductor() {
    let mut driver = driver();
    driver.offer(bytes::Bytes::from_static(&[0x99, 0, 0, 0, 1]));
    let after = driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    driver.work();

    let events = driver.drain_events();
    assert!(matches!(events[0], DriverEvent::Error { code: ErrorCode::MalformedCommand, .. }));
    assert!(matches!(
        events[1],
        DriverEvent::PublicationReady { correlation_id, .. } if correlation_id == after
    ));
    assert_eq!(driver.conductor.error_count(), 1);
}

#[test]
fn law_add_then_remove_returns_to_pre_add_state() {
    let mut driver = driver();
    let baseline_counters = driver.counters.snapshot().len();

    let publication = driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    driver.work();
    driver.offer_remove_publication(CLIENT, publication);
    driver.work();

    let timeout = ctx().client_liveness_timeout_ns;
    let linger = ctx().publication_linger_ns;
    driver.advance_and_work(timeout + linger + 1);
    drain_sender_with_acks(&mut driver);

    let snapshot = driver.conductor.snapshot();
    assert!(snapshot.network_publications.is_empty());
    assert_eq!(snapshot.subscriptions, 0);
    assert_eq!(snapshot.send_endpoints, 0);
    assert_eq!(snapshot.receive_endpoints, 0);
    // Every per-publication counter was freed again.
    assert_eq!(driver.counters.snapshot().len(), baseline_counters);
}

#[test]
fn law_keepalive_preserves_registrations() {
    let mut driver = driver();
    driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    driver.work();

    let timeout = ctx().client_liveness_timeout_ns;
    for _ in 0..8 {
        driver.offer_keepalive(CLIENT);
        driver.advance_and_work(timeout / 2);
    }

    assert_eq!(driver.conductor.client_timeout_count(), 0);
    assert_eq!(driver.conductor.snapshot().network_publications.len(), 1);
}

#[test]
fn invariant_1_at_most_one_live_publication_per_key() {
    let mut driver = driver();
    let first = driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    driver.work();
    driver.offer_remove_publication(CLIENT, first);
    driver.work();

    // Old one lingers; a new add creates a distinct publication.
    driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    driver.work();

    let snapshot = driver.conductor.snapshot();
    let mut live_keys: Vec<(i32, i32)> = snapshot
        .network_publications
        .iter()
        .filter(|p| p.state != weir::publication::PubState::Closing)
        .map(|p| (p.stream_id, p.session_id))
        .collect();
    let total = live_keys.len();
    live_keys.sort_unstable();
    live_keys.dedup();
    assert_eq!(live_keys.len(), total, "duplicate (stream, session) among live publications");
}

#[test]
fn invariant_4_every_available_gets_exactly_one_unavailable() {
    let mut driver = driver();
    driver.offer_add_subscription(CLIENT, 10, CHANNEL_4000);
    driver.work();
    let cmds = driver.receiver_cmds();
    let ReceiverCmd::RegisterEndpoint { endpoint_id, .. } = &cmds[0] else {
        unreachable!("expected RegisterEndpoint, got {:?}", cmds[0]);
    };
    let endpoint_id = *endpoint_id;
    driver.drain_events();

    driver.inbound.offer(ConductorCmd::CreateImage {
        session_id: 5,
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
    let image = *correlation_id;

    driver.inbound.offer(ConductorCmd::ImageActive { correlation_id: image });
    driver.work();
    driver.inbound.offer(ConductorCmd::ImageInactive { correlation_id: image });
    driver.work();

    // Run the image all the way to deletion.
    let liveness = ctx().image_liveness_timeout_ns;
    driver.advance_and_work(liveness + 1);
    driver.advance_and_work(liveness + 1);
    assert!(driver.conductor.snapshot().images.is_empty());

    let events = driver.drain_events();
    let available = events
        .iter()
        .filter(|e| matches!(e, DriverEvent::AvailableImage { correlation_id, .. } if *correlation_id == image))
        .count();
    let unavailable = events
        .iter()
        .filter(|e| matches!(e, DriverEvent::UnavailableImage { correlation_id, .. } if *correlation_id == image))
        .count();
    assert!(available >= 1);
    assert_eq!(unavailable, 1);
}

#[test]
fn invariant_5_event_order_matches_command_order() {
    let mut driver = driver();
    let c1 = driver.offer_add_publication(CLIENT, 10, CHANNEL_4000);
    let c2 = driver.offer_add_subscription(CLIENT, 10, CHANNEL_4000);
    let c3 = driver.offer_add_publication(CLIENT, 11, CHANNEL_4000);
    let c4 = driver.offer_remove_publication(CLIENT, c1);
    driver.work();

    let events = driver.drain_events();
    let order = correlations(&events);
    let first_positions: Vec<usize> = [c1, c2, c3, c4]
        .iter()
        .map(|c| order.iter().position(|o| o == c).unwrap())
        .collect();
    let mut sorted = first_positions.clone();
    sorted.sort_unstable();
    assert_eq!(first_positions, sorted, "per-command replies out of order: {order:?}");
}
