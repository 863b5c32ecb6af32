// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client liveness tracking.
//!
//! Every command refreshes its client's keepalive; a client that misses
//! the liveness window has all of its registrations released as if it had
//! removed them itself.

use indexmap::IndexMap;
use tracing::warn;

#[derive(Debug)]
struct Client {
    last_keepalive_ns: u64,
}

/// Registry of known clients in first-seen order.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: IndexMap<i64, Client>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn contains(&self, client_id: i64) -> bool {
        self.clients.contains_key(&client_id)
    }

    /// Any command from a client counts as a keepalive.
    pub fn on_activity(&mut self, client_id: i64, now_ns: u64) {
        self.clients
            .entry(client_id)
            .and_modify(|client| client.last_keepalive_ns = now_ns)
            .or_insert(Client { last_keepalive_ns: now_ns });
    }

    /// Remove and return clients whose keepalive window has elapsed, in
    /// first-seen order.
    pub fn timed_out(&mut self, now_ns: u64, timeout_ns: u64) -> Vec<i64> {
        let expired: Vec<i64> = self
            .clients
            .iter()
            .filter(|(_, client)| now_ns.saturating_sub(client.last_keepalive_ns) > timeout_ns)
            .map(|(&id, _)| id)
            .collect();
        for client_id in &expired {
            warn!(client_id, "client timed out");
            self.clients.shift_remove(client_id);
        }
        expired
    }

    /// Drop a client without releasing anything; used once its
    /// registrations are already gone.
    pub fn remove(&mut self, client_id: i64) {
        self.clients.shift_remove(&client_id);
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
