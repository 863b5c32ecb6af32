// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publication state machines.
//!
//! A publication is ACTIVE while clients hold references. When the last
//! reference is released it drains unconsumed data, lingers so late
//! consumers can finish, and finally closes:
//!
//! ```text
//! ACTIVE   --refs==0, drained--------> LINGER
//! ACTIVE   --refs==0, not drained----> DRAINING
//! DRAINING --producer == consumer----> LINGER
//! DRAINING --connection timeout------> LINGER
//! LINGER   --linger elapsed----------> CLOSING
//! ```
//!
//! Entering CLOSING is the conductor's cue to instruct teardown; the slot
//! itself is freed on the data-plane ack.

use crate::counters::Counter;
use crate::raw_log::RawLog;
use crate::registry::Token;
use crate::uri::ChannelUri;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PubState {
    Active,
    Draining,
    Linger,
    Closing,
}

/// Maintenance outcome the conductor acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PubTransition {
    ToLinger,
    ToClosing,
}

/// A publication backed by a UDP send endpoint.
#[derive(Debug)]
pub struct NetworkPublication {
    pub registration_id: i64,
    pub stream_id: i32,
    pub session_id: i32,
    pub channel: ChannelUri,
    pub channel_uri: String,
    pub endpoint: Token,
    pub endpoint_id: i64,
    pub log: Arc<RawLog>,
    pub pub_lmt: Counter,
    pub is_exclusive: bool,
    refs: u32,
    state: PubState,
    last_change_ns: u64,
    /// Spy links: (subscription registration id, its position counter).
    pub spy_positions: Vec<(i64, Counter)>,
    /// Whether any available-image was emitted for this publication's
    /// spies; pairs the final unavailable-image exactly once.
    pub spies_notified: bool,
}

impl NetworkPublication {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_id: i64,
        stream_id: i32,
        session_id: i32,
        channel: ChannelUri,
        channel_uri: String,
        endpoint: Token,
        endpoint_id: i64,
        log: Arc<RawLog>,
        pub_lmt: Counter,
        is_exclusive: bool,
        now_ns: u64,
    ) -> Self {
        Self {
            registration_id,
            stream_id,
            session_id,
            channel,
            channel_uri,
            endpoint,
            endpoint_id,
            log,
            pub_lmt,
            is_exclusive,
            refs: 1,
            state: PubState::Active,
            last_change_ns: now_ns,
            spy_positions: Vec::new(),
            spies_notified: false,
        }
    }

    pub fn state(&self) -> PubState {
        self.state
    }

    pub fn refs(&self) -> u32 {
        self.refs
    }

    pub fn is_active(&self) -> bool {
        self.state == PubState::Active
    }

    /// Counts toward invariant: at most one publication per key while in
    /// ACTIVE, DRAINING, or LINGER.
    pub fn holds_key(&self) -> bool {
        self.state != PubState::Closing
    }

    pub fn add_ref(&mut self) {
        self.refs += 1;
    }

    /// Drop one reference; on the last one, leave ACTIVE for DRAINING or
    /// straight to LINGER when nothing is left to drain.
    pub fn remove_ref(&mut self, now_ns: u64) {
        self.refs = self.refs.saturating_sub(1);
        if self.refs == 0 && self.state == PubState::Active {
            let next =
                if self.log.is_drained() { PubState::Linger } else { PubState::Draining };
            self.change_state(next, now_ns);
        }
    }

    /// Time-driven evaluation; at most one transition per call.
    pub fn on_time_event(
        &mut self,
        now_ns: u64,
        linger_ns: u64,
        connection_timeout_ns: u64,
    ) -> Option<PubTransition> {
        match self.state {
            PubState::Active | PubState::Closing => None,
            PubState::Draining => {
                let timed_out = now_ns - self.last_change_ns > connection_timeout_ns;
                if self.log.is_drained() || timed_out {
                    self.change_state(PubState::Linger, now_ns);
                    Some(PubTransition::ToLinger)
                } else {
                    None
                }
            }
            PubState::Linger => {
                if now_ns - self.last_change_ns > linger_ns {
                    self.change_state(PubState::Closing, now_ns);
                    Some(PubTransition::ToClosing)
                } else {
                    None
                }
            }
        }
    }

    fn change_state(&mut self, next: PubState, now_ns: u64) {
        debug!(
            registration_id = self.registration_id,
            session_id = self.session_id,
            stream_id = self.stream_id,
            from = ?self.state,
            to = ?next,
            "network publication state"
        );
        self.state = next;
        self.last_change_ns = now_ns;
    }
}

/// A publication consumed in-process through shared memory.
#[derive(Debug)]
pub struct IpcPublication {
    pub registration_id: i64,
    pub stream_id: i32,
    pub session_id: i32,
    pub channel_uri: String,
    pub log: Arc<RawLog>,
    pub pub_lmt: Counter,
    pub is_exclusive: bool,
    refs: u32,
    state: PubState,
    last_change_ns: u64,
    /// Subscriber links: (subscription registration id, position counter).
    pub subscriber_positions: Vec<(i64, Counter)>,
    pub subscribers_notified: bool,
}

impl IpcPublication {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registration_id: i64,
        stream_id: i32,
        session_id: i32,
        channel_uri: String,
        log: Arc<RawLog>,
        pub_lmt: Counter,
        is_exclusive: bool,
        now_ns: u64,
    ) -> Self {
        Self {
            registration_id,
            stream_id,
            session_id,
            channel_uri,
            log,
            pub_lmt,
            is_exclusive,
            refs: 1,
            state: PubState::Active,
            last_change_ns: now_ns,
            subscriber_positions: Vec::new(),
            subscribers_notified: false,
        }
    }

    pub fn state(&self) -> PubState {
        self.state
    }

    pub fn refs(&self) -> u32 {
        self.refs
    }

    pub fn is_active(&self) -> bool {
        self.state == PubState::Active
    }

    pub fn holds_key(&self) -> bool {
        self.state != PubState::Closing
    }

    pub fn add_ref(&mut self) {
        self.refs += 1;
    }

    /// Drop one reference. With no subscribers there is nobody left to
    /// drain for, so the publication closes immediately.
    pub fn remove_ref(&mut self, now_ns: u64) -> Option<PubTransition> {
        self.refs = self.refs.saturating_sub(1);
        if self.refs > 0 || self.state != PubState::Active {
            return None;
        }
        if self.subscriber_positions.is_empty() {
            self.change_state(PubState::Closing, now_ns);
            Some(PubTransition::ToClosing)
        } else if self.log.is_drained() {
            self.change_state(PubState::Linger, now_ns);
            Some(PubTransition::ToLinger)
        } else {
            self.change_state(PubState::Draining, now_ns);
            None
        }
    }

    pub fn on_time_event(&mut self, now_ns: u64, linger_ns: u64) -> Option<PubTransition> {
        match self.state {
            PubState::Active | PubState::Closing => None,
            PubState::Draining => {
                if self.log.is_drained() {
                    self.change_state(PubState::Linger, now_ns);
                    Some(PubTransition::ToLinger)
                } else {
                    None
                }
            }
            PubState::Linger => {
                if now_ns - self.last_change_ns > linger_ns {
                    self.change_state(PubState::Closing, now_ns);
                    Some(PubTransition::ToClosing)
                } else {
                    None
                }
            }
        }
    }

    fn change_state(&mut self, next: PubState, now_ns: u64) {
        debug!(
            registration_id = self.registration_id,
            stream_id = self.stream_id,
            from = ?self.state,
            to = ?next,
            "ipc publication state"
        );
        self.state = next;
        self.last_change_ns = now_ns;
    }
}

/// Initial log position for replay params on an exclusive publication.
pub fn replay_position(term_length: u32, init_term_id: i32, term_id: i32, term_offset: u32) -> u64 {
    let terms = (term_id as i64 - init_term_id as i64).max(0) as u64;
    term_length as u64 * terms + term_offset as u64
}

#[cfg(test)]
#[path = "publication_tests.rs"]
mod tests;
