// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn publication_ready_roundtrip() {
    let event = DriverEvent::PublicationReady {
        correlation_id: 100,
        registration_id: 100,
        stream_id: 10,
        session_id: 0x1234,
        position_limit_counter_id: 3,
        is_exclusive: true,
        log_file: "/dev/shm/weir/100.logbuffer".to_string(),
    };
    assert_eq!(DriverEvent::decode(event.encode()), Ok(event));
}

#[test]
fn available_image_roundtrip_with_positions() {
    let event = DriverEvent::AvailableImage {
        correlation_id: 200,
        session_id: 7,
        stream_id: 10,
        subscriber_positions: vec![
            SubscriberPosition { counter_id: 4, subscription_registration_id: 101 },
            SubscriberPosition { counter_id: 5, subscription_registration_id: 102 },
        ],
        log_file: "/dev/shm/weir/200.logbuffer".to_string(),
        source_identity: "127.0.0.1:9000".to_string(),
    };
    assert_eq!(DriverEvent::decode(event.encode()), Ok(event));
}

#[test]
fn error_roundtrip_preserves_code() {
    let event = DriverEvent::Error {
        correlation_id: 300,
        code: ErrorCode::UnknownPublication,
        message: "unknown publication: 42".to_string(),
    };
    let decoded = DriverEvent::decode(event.encode()).unwrap();
    assert_eq!(decoded, event);
    assert_eq!(decoded.correlation_id(), 300);
}

#[test]
fn operation_success_and_unavailable_roundtrip() {
    for event in [
        DriverEvent::OperationSuccess { correlation_id: 1 },
        DriverEvent::SubscriptionReady { correlation_id: 2, channel_status_indicator_id: 9 },
        DriverEvent::UnavailableImage {
            correlation_id: 3,
            stream_id: 10,
            channel: "aeron:udp?endpoint=localhost:4000".to_string(),
        },
    ] {
        assert_eq!(DriverEvent::decode(event.encode()), Ok(event));
    }
}

#[test]
fn rejects_truncated_event() {
    let frame = DriverEvent::OperationSuccess { correlation_id: 1 }.encode();
    let truncated = frame.slice(0..frame.len() - 1);
    assert!(DriverEvent::decode(truncated).is_err());
}
