// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harness helpers for end-to-end driver scenarios.
//!
//! Scenarios drive a fully wired conductor the way a client process
//! would: encoded command frames in, decoded broadcast events out, with a
//! manually-advanced clock and inspectable sender/receiver mailboxes.

use weir::event::DriverEvent;
use weir::proxy::{ConductorCmd, SenderCmd};
use weir::test_support::TestDriver;

/// Act as the sender agent for publication teardown: drain the sender
/// mailbox and ack every `RemovePublication` so the conductor can retire
/// closing publications. Returns the drained commands.
pub fn drain_sender_with_acks(driver: &mut TestDriver) -> Vec<SenderCmd> {
    let cmds = driver.sender_cmds();
    for cmd in &cmds {
        if let SenderCmd::RemovePublication { registration_id } = cmd {
            driver
                .inbound
                .offer(ConductorCmd::PublicationClosed { registration_id: *registration_id });
        }
    }
    driver.work();
    cmds
}

/// Correlation ids of broadcast events, in emission order.
pub fn correlations(events: &[DriverEvent]) -> Vec<i64> {
    events.iter().map(DriverEvent::correlation_id).collect()
}

/// Panic-free lookup of the single `PublicationReady` in a batch.
pub fn publication_ready(events: &[DriverEvent]) -> Option<&DriverEvent> {
    events.iter().find(|event| matches!(event, DriverEvent::PublicationReady { .. }))
}
