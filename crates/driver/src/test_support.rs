// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test fixtures: deterministic clock, in-memory log factory, and
//! a fully wired conductor harness. Used by unit tests here and by the
//! end-to-end specs crate.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

use crate::broadcast::{Broadcast, BroadcastReceiver};
use crate::clock::Clock;
use crate::conductor::{Conductor, ConductorChannels, DriverContext};
use crate::counters::CountersManager;
use crate::error::DriverError;
use crate::event::DriverEvent;
use crate::proxy::{mailbox, ConductorCmd, MailboxRx, MailboxTx, ReceiverCmd, SenderCmd};
use crate::raw_log::{LogFactory, RawLog};
use crate::ring::CommandRing;

/// Manually-advanced clock.
#[derive(Debug, Clone)]
pub struct TestClock {
    ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Starts away from zero so subtraction never underflows in tests.
    pub fn new() -> Self {
        Self { ns: Arc::new(AtomicU64::new(1_000_000)) }
    }

    pub fn advance(&self, delta_ns: u64) {
        self.ns.fetch_add(delta_ns, Ordering::SeqCst);
    }

    pub fn set(&self, now_ns: u64) {
        self.ns.store(now_ns, Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_ns(&self) -> u64 {
        self.ns.load(Ordering::SeqCst)
    }
}

/// Log factory that never touches the filesystem.
#[derive(Debug, Clone, Default)]
pub struct TestLogFactory {
    created: Arc<AtomicUsize>,
    fail_next: Arc<AtomicBool>,
}

impl TestLogFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Make the next allocation fail with `RESOURCE_EXHAUSTED`.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

impl LogFactory for TestLogFactory {
    fn create_log(
        &self,
        correlation_id: i64,
        term_length: u32,
        mtu: u32,
        init_term_id: i32,
    ) -> Result<Arc<RawLog>, DriverError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DriverError::resource_exhausted("log allocation failed (test)"));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let path = PathBuf::from(format!("test-logs/{correlation_id}.logbuffer"));
        Ok(Arc::new(RawLog::new(path, term_length, mtu, init_term_id)))
    }
}

/// A conductor wired to inspectable test endpoints.
pub struct TestDriver {
    pub conductor: Conductor,
    pub clock: TestClock,
    pub log_factory: TestLogFactory,
    pub counters: Arc<CountersManager>,
    pub ring: Arc<CommandRing>,
    pub events: BroadcastReceiver,
    pub sender_rx: MailboxRx<SenderCmd>,
    pub receiver_rx: MailboxRx<ReceiverCmd>,
    pub inbound: MailboxTx<ConductorCmd>,
    next_correlation: i64,
}

impl TestDriver {
    /// Default harness: deterministic session ids, a timer that fires on
    /// every tick once any time has passed, production timeout defaults.
    pub fn new() -> Self {
        let ctx = DriverContext {
            timer_interval_ns: 1,
            session_id_seed: Some(42),
            ..DriverContext::default()
        };
        Self::with_context(ctx)
    }

    pub fn with_context(ctx: DriverContext) -> Self {
        let clock = TestClock::new();
        let log_factory = TestLogFactory::new();
        let counters = Arc::new(CountersManager::new());
        let ring = Arc::new(CommandRing::new(64 * 1024));
        let broadcast = Broadcast::new(64 * 1024, 4096);
        let events = broadcast.receiver();
        let (sender_tx, sender_rx) = mailbox(256);
        let (receiver_tx, receiver_rx) = mailbox(256);
        let (inbound_tx, inbound_rx) = mailbox(256);

        let conductor = Conductor::new(
            ctx,
            Arc::new(clock.clone()),
            Box::new(log_factory.clone()),
            Arc::clone(&counters),
            ConductorChannels {
                command_ring: Arc::clone(&ring),
                broadcast,
                sender: sender_tx,
                receiver: receiver_tx,
                inbound: inbound_rx,
            },
        );

        Self {
            conductor,
            clock,
            log_factory,
            counters,
            ring,
            events,
            sender_rx,
            receiver_rx,
            inbound: inbound_tx,
            next_correlation: 1000,
        }
    }

    pub fn next_correlation(&mut self) -> i64 {
        self.next_correlation += 1;
        self.next_correlation
    }

    pub fn offer(&self, frame: Bytes) {
        assert!(self.ring.offer(&frame).is_ok(), "test command ring full");
    }

    pub fn work(&mut self) -> usize {
        self.conductor.do_work()
    }

    /// Advance the clock, then run a tick so timer maintenance observes
    /// the new time.
    pub fn advance_and_work(&mut self, delta_ns: u64) -> usize {
        self.clock.advance(delta_ns);
        self.work()
    }

    /// Decode everything currently on the broadcast.
    pub fn drain_events(&mut self) -> Vec<DriverEvent> {
        let mut events = Vec::new();
        while let Some(frame) = self.events.try_recv() {
            match DriverEvent::decode(frame) {
                Ok(event) => events.push(event),
                Err(error) => unreachable!("undecodable event on broadcast: {error}"),
            }
        }
        events
    }

    pub fn sender_cmds(&self) -> Vec<SenderCmd> {
        self.sender_rx.drain(usize::MAX)
    }

    pub fn receiver_cmds(&self) -> Vec<ReceiverCmd> {
        self.receiver_rx.drain(usize::MAX)
    }

    // Convenience command builders; each offers one frame and returns the
    // correlation id it used. Callers drive ticks themselves.

    pub fn offer_add_publication(&mut self, client_id: i64, stream_id: i32, channel: &str) -> i64 {
        let correlation_id = self.next_correlation();
        self.offer(crate::command::encode_add_publication(
            client_id,
            correlation_id,
            stream_id,
            channel,
            false,
        ));
        correlation_id
    }

    pub fn offer_add_exclusive_publication(
        &mut self,
        client_id: i64,
        stream_id: i32,
        channel: &str,
    ) -> i64 {
        let correlation_id = self.next_correlation();
        self.offer(crate::command::encode_add_publication(
            client_id,
            correlation_id,
            stream_id,
            channel,
            true,
        ));
        correlation_id
    }

    pub fn offer_remove_publication(&mut self, client_id: i64, registration_id: i64) -> i64 {
        let correlation_id = self.next_correlation();
        self.offer(crate::command::encode_remove_publication(
            client_id,
            correlation_id,
            registration_id,
        ));
        correlation_id
    }

    pub fn offer_add_subscription(&mut self, client_id: i64, stream_id: i32, channel: &str) -> i64 {
        let correlation_id = self.next_correlation();
        self.offer(crate::command::encode_add_subscription(
            client_id,
            correlation_id,
            stream_id,
            crate::command::NO_REGISTRATION_ID,
            channel,
        ));
        correlation_id
    }

    pub fn offer_remove_subscription(&mut self, client_id: i64, registration_id: i64) -> i64 {
        let correlation_id = self.next_correlation();
        self.offer(crate::command::encode_remove_subscription(
            client_id,
            correlation_id,
            registration_id,
        ));
        correlation_id
    }

    pub fn offer_keepalive(&mut self, client_id: i64) {
        self.offer(crate::command::encode_client_keepalive(client_id));
    }
}

impl Default for TestDriver {
    fn default() -> Self {
        Self::new()
    }
}
