// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::registry::Registry;
use std::path::PathBuf;

const LIVENESS: u64 = 10_000;

fn image() -> PublicationImage {
    let mut endpoints: Registry<()> = Registry::new();
    let endpoint = endpoints.insert(());
    PublicationImage::new(
        300,
        7,
        10,
        endpoint,
        2,
        "aeron:udp?endpoint=localhost:4000".to_string(),
        "127.0.0.1:9000".to_string(),
        Arc::new(RawLog::new(PathBuf::from("image.logbuffer"), 65536, 1408, 0)),
        0,
    )
}

#[test]
fn starts_in_init() {
    let image = image();
    assert_eq!(image.state(), ImageState::Init);
    assert!(!image.is_active());
    assert!(!image.owes_unavailable());
}

#[test]
fn activates_exactly_once() {
    let mut image = image();
    assert!(image.activate(10));
    assert!(image.is_active());
    assert!(!image.activate(20));
}

#[test]
fn inactive_only_from_active() {
    let mut image = image();
    assert!(!image.if_active_go_inactive(10));

    image.activate(10);
    assert!(image.if_active_go_inactive(20));
    assert_eq!(image.state(), ImageState::Inactive);
    assert!(!image.if_active_go_inactive(30));
}

#[test]
fn inactive_ages_through_linger_to_closing() {
    let mut image = image();
    image.activate(0);
    image.if_active_go_inactive(100);

    assert_eq!(image.on_time_event(100 + LIVENESS, LIVENESS), None);
    assert_eq!(
        image.on_time_event(101 + LIVENESS, LIVENESS),
        Some(ImageTransition::ToLinger)
    );
    assert_eq!(image.state(), ImageState::Linger);

    assert_eq!(
        image.on_time_event(102 + 2 * LIVENESS, LIVENESS),
        Some(ImageTransition::ToClosing)
    );
    assert_eq!(image.state(), ImageState::Closing);
    assert_eq!(image.on_time_event(u64::MAX / 2, LIVENESS), None);
}

#[test]
fn active_image_ignores_time_events() {
    let mut image = image();
    image.activate(0);
    assert_eq!(image.on_time_event(u64::MAX / 2, LIVENESS), None);
    assert!(image.is_active());
}

#[test]
fn notified_flag_pairs_unavailable() {
    let mut image = image();
    image.mark_notified();
    assert!(image.owes_unavailable());
    image.mark_unavailable_sent();
    assert!(!image.owes_unavailable());
}
