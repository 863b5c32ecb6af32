// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One-way mailboxes between the conductor and its collaborators.
//!
//! Each proxy exposes only the handful of operations the conductor calls
//! on that collaborator. Offers never block; a full mailbox is a fault
//! (logged and counted), not a wait.

use crate::broadcast::Broadcast;
use crate::counters::Counter;
use crate::error::ErrorCode;
use crate::event::{DriverEvent, SubscriberPosition};
use crate::raw_log::RawLog;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::warn;

/// Bounded single-producer single-consumer queue.
pub fn mailbox<T>(capacity: usize) -> (MailboxTx<T>, MailboxRx<T>) {
    let shared = Arc::new(Shared { queue: Mutex::new(VecDeque::new()), capacity });
    (MailboxTx { shared: Arc::clone(&shared) }, MailboxRx { shared })
}

#[derive(Debug)]
struct Shared<T> {
    queue: Mutex<VecDeque<T>>,
    capacity: usize,
}

#[derive(Debug)]
pub struct MailboxTx<T> {
    shared: Arc<Shared<T>>,
}

impl<T> MailboxTx<T> {
    /// Non-blocking; false when the mailbox is full.
    pub fn offer(&self, message: T) -> bool {
        let mut queue = self.shared.queue.lock();
        if queue.len() >= self.shared.capacity {
            return false;
        }
        queue.push_back(message);
        true
    }

    pub fn len(&self) -> usize {
        self.shared.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct MailboxRx<T> {
    shared: Arc<Shared<T>>,
}

impl<T> MailboxRx<T> {
    pub fn try_recv(&self) -> Option<T> {
        self.shared.queue.lock().pop_front()
    }

    /// Drain up to `max` messages in offer order.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut queue = self.shared.queue.lock();
        let take = max.min(queue.len());
        queue.drain(..take).collect()
    }
}

/// Instructions the conductor issues to the sender agent.
#[derive(Debug)]
pub enum SenderCmd {
    RegisterEndpoint { endpoint_id: i64, key: String },
    CloseEndpoint { endpoint_id: i64 },
    NewPublication {
        registration_id: i64,
        stream_id: i32,
        session_id: i32,
        endpoint_id: i64,
        log: Arc<RawLog>,
    },
    RemovePublication { registration_id: i64 },
    AddDestination { registration_id: i64, channel: String },
    RemoveDestination { registration_id: i64, channel: String },
}

/// Instructions the conductor issues to the receiver agent.
#[derive(Debug)]
pub enum ReceiverCmd {
    RegisterEndpoint { endpoint_id: i64, key: String },
    CloseEndpoint { endpoint_id: i64 },
    AddSubscription { endpoint_id: i64, stream_id: i32 },
    RemoveSubscription { endpoint_id: i64, stream_id: i32 },
    NewImage { correlation_id: i64, log: Arc<RawLog> },
    RemoveImage { correlation_id: i64 },
    AddDestination { registration_id: i64, channel: String },
    RemoveDestination { registration_id: i64, channel: String },
}

/// Commands arriving at the conductor from the data-plane agents.
#[derive(Debug)]
pub enum ConductorCmd {
    /// The receiver observed a new (session, stream) on an endpoint.
    CreateImage {
        session_id: i32,
        stream_id: i32,
        endpoint_id: i64,
        init_term_id: i32,
        active_term_id: i32,
        term_offset: u32,
        term_length: u32,
        mtu: u32,
        source_identity: String,
    },
    /// First status message went out for the image.
    ImageActive { correlation_id: i64 },
    /// The receiver stopped tracking the image.
    ImageInactive { correlation_id: i64 },
    /// Sender finished tearing down a publication the conductor retired.
    PublicationClosed { registration_id: i64 },
}

/// Sender-facing capability set.
#[derive(Debug)]
pub struct SenderProxy {
    tx: MailboxTx<SenderCmd>,
    errors: Counter,
}

impl SenderProxy {
    pub fn new(tx: MailboxTx<SenderCmd>, errors: Counter) -> Self {
        Self { tx, errors }
    }

    pub fn register_endpoint(&self, endpoint_id: i64, key: String) {
        self.offer(SenderCmd::RegisterEndpoint { endpoint_id, key });
    }

    pub fn close_endpoint(&self, endpoint_id: i64) {
        self.offer(SenderCmd::CloseEndpoint { endpoint_id });
    }

    pub fn new_publication(
        &self,
        registration_id: i64,
        stream_id: i32,
        session_id: i32,
        endpoint_id: i64,
        log: Arc<RawLog>,
    ) {
        self.offer(SenderCmd::NewPublication {
            registration_id,
            stream_id,
            session_id,
            endpoint_id,
            log,
        });
    }

    pub fn remove_publication(&self, registration_id: i64) {
        self.offer(SenderCmd::RemovePublication { registration_id });
    }

    pub fn add_destination(&self, registration_id: i64, channel: String) {
        self.offer(SenderCmd::AddDestination { registration_id, channel });
    }

    pub fn remove_destination(&self, registration_id: i64, channel: String) {
        self.offer(SenderCmd::RemoveDestination { registration_id, channel });
    }

    fn offer(&self, cmd: SenderCmd) {
        if !self.tx.offer(cmd) {
            self.errors.increment();
            warn!("sender mailbox full, command dropped");
        }
    }
}

/// Receiver-facing capability set.
#[derive(Debug)]
pub struct ReceiverProxy {
    tx: MailboxTx<ReceiverCmd>,
    errors: Counter,
}

impl ReceiverProxy {
    pub fn new(tx: MailboxTx<ReceiverCmd>, errors: Counter) -> Self {
        Self { tx, errors }
    }

    pub fn register_endpoint(&self, endpoint_id: i64, key: String) {
        self.offer(ReceiverCmd::RegisterEndpoint { endpoint_id, key });
    }

    pub fn close_endpoint(&self, endpoint_id: i64) {
        self.offer(ReceiverCmd::CloseEndpoint { endpoint_id });
    }

    pub fn add_subscription(&self, endpoint_id: i64, stream_id: i32) {
        self.offer(ReceiverCmd::AddSubscription { endpoint_id, stream_id });
    }

    pub fn remove_subscription(&self, endpoint_id: i64, stream_id: i32) {
        self.offer(ReceiverCmd::RemoveSubscription { endpoint_id, stream_id });
    }

    pub fn new_image(&self, correlation_id: i64, log: Arc<RawLog>) {
        self.offer(ReceiverCmd::NewImage { correlation_id, log });
    }

    pub fn remove_image(&self, correlation_id: i64) {
        self.offer(ReceiverCmd::RemoveImage { correlation_id });
    }

    pub fn add_destination(&self, registration_id: i64, channel: String) {
        self.offer(ReceiverCmd::AddDestination { registration_id, channel });
    }

    pub fn remove_destination(&self, registration_id: i64, channel: String) {
        self.offer(ReceiverCmd::RemoveDestination { registration_id, channel });
    }

    fn offer(&self, cmd: ReceiverCmd) {
        if !self.tx.offer(cmd) {
            self.errors.increment();
            warn!("receiver mailbox full, command dropped");
        }
    }
}

/// Client-facing event emitter over the broadcast buffer.
///
/// Emission never blocks the conductor; an event that cannot be written is
/// dropped and the error counter incremented.
#[derive(Debug)]
pub struct ClientProxy {
    broadcast: Broadcast,
    errors: Counter,
}

impl ClientProxy {
    pub fn new(broadcast: Broadcast, errors: Counter) -> Self {
        Self { broadcast, errors }
    }

    pub fn on_publication_ready(
        &self,
        correlation_id: i64,
        registration_id: i64,
        stream_id: i32,
        session_id: i32,
        position_limit_counter_id: i32,
        is_exclusive: bool,
        log_file: String,
    ) {
        self.transmit(DriverEvent::PublicationReady {
            correlation_id,
            registration_id,
            stream_id,
            session_id,
            position_limit_counter_id,
            is_exclusive,
            log_file,
        });
    }

    pub fn on_subscription_ready(&self, correlation_id: i64, channel_status_indicator_id: i32) {
        self.transmit(DriverEvent::SubscriptionReady { correlation_id, channel_status_indicator_id });
    }

    pub fn on_operation_success(&self, correlation_id: i64) {
        self.transmit(DriverEvent::OperationSuccess { correlation_id });
    }

    pub fn on_available_image(
        &self,
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
        subscriber_positions: Vec<SubscriberPosition>,
        log_file: String,
        source_identity: String,
    ) {
        self.transmit(DriverEvent::AvailableImage {
            correlation_id,
            session_id,
            stream_id,
            subscriber_positions,
            log_file,
            source_identity,
        });
    }

    pub fn on_unavailable_image(&self, correlation_id: i64, stream_id: i32, channel: String) {
        self.transmit(DriverEvent::UnavailableImage { correlation_id, stream_id, channel });
    }

    pub fn on_error(&self, correlation_id: i64, code: ErrorCode, message: String) {
        self.transmit(DriverEvent::Error { correlation_id, code, message });
    }

    fn transmit(&self, event: DriverEvent) {
        if !self.broadcast.transmit(event.encode()) {
            self.errors.increment();
            warn!("broadcast rejected event, dropped");
        }
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod tests;
