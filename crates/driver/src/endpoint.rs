// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! UDP channel endpoint registries.
//!
//! One endpoint per canonical UDP address, shared by every stream on that
//! address and reference-counted by the publications or subscriptions it
//! backs. Endpoints are created lazily; when the last reference goes the
//! endpoint is removed from the registry and the owning agent is told to
//! close it. Removal-before-close is what makes the close instruction
//! single-shot: a removed endpoint can never be found again.

use crate::registry::{Registry, Token};
use crate::uri::ChannelUri;
use indexmap::IndexMap;
use tracing::debug;

/// Send-side endpoint, refcounted by network publications.
#[derive(Debug)]
pub struct SendEndpoint {
    pub id: i64,
    pub key: String,
    publications: u32,
}

/// Registry of send endpoints keyed by canonical send address.
#[derive(Debug, Default)]
pub struct SendEndpoints {
    registry: Registry<SendEndpoint>,
    by_key: IndexMap<String, Token>,
}

impl SendEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn find(&self, channel: &ChannelUri) -> Option<Token> {
        self.by_key.get(&channel.endpoint_key()).copied()
    }

    pub fn get(&self, token: Token) -> Option<&SendEndpoint> {
        self.registry.get(token)
    }

    /// Look up or create the endpoint for a channel. Returns the token and
    /// whether it was just created (the caller registers new endpoints
    /// with the sender).
    pub fn ensure(&mut self, channel: &ChannelUri, id: i64) -> (Token, bool) {
        let key = channel.endpoint_key();
        if let Some(&token) = self.by_key.get(&key) {
            return (token, false);
        }
        debug!(%key, id, "send endpoint created");
        let token = self.registry.insert(SendEndpoint { id, key: key.clone(), publications: 0 });
        self.by_key.insert(key, token);
        (token, true)
    }

    pub fn attach(&mut self, token: Token) {
        if let Some(endpoint) = self.registry.get_mut(token) {
            endpoint.publications += 1;
        }
    }

    /// Drop one publication reference. When the count reaches zero the
    /// endpoint is removed and its id returned so the caller can instruct
    /// the sender to close it, exactly once.
    pub fn release(&mut self, token: Token) -> Option<i64> {
        let endpoint = self.registry.get_mut(token)?;
        endpoint.publications = endpoint.publications.saturating_sub(1);
        if endpoint.publications > 0 {
            return None;
        }
        let endpoint = self.registry.remove(token)?;
        self.by_key.shift_remove(&endpoint.key);
        debug!(key = %endpoint.key, id = endpoint.id, "send endpoint closed");
        Some(endpoint.id)
    }
}

/// Per-stream interest on a receive endpoint.
#[derive(Debug)]
struct StreamInterest {
    subscriptions: u32,
    reliable: bool,
}

/// Receive-side endpoint, refcounted per stream by subscriptions.
#[derive(Debug)]
pub struct ReceiveEndpoint {
    pub id: i64,
    pub key: String,
    streams: IndexMap<i32, StreamInterest>,
}

impl ReceiveEndpoint {
    /// Reliability already established for a stream, if any.
    pub fn stream_reliability(&self, stream_id: i32) -> Option<bool> {
        self.streams.get(&stream_id).map(|interest| interest.reliable)
    }

    pub fn has_stream(&self, stream_id: i32) -> bool {
        self.streams.contains_key(&stream_id)
    }
}

/// Outcome of removing one subscription reference from a stream.
#[derive(Debug, PartialEq, Eq)]
pub struct StreamRelease {
    /// The stream's last subscription went; unregister it with the receiver.
    pub last_for_stream: bool,
    /// The endpoint's last stream went; it was removed, close this id.
    pub endpoint_closed: Option<i64>,
}

/// Registry of receive endpoints keyed by canonical receive address.
#[derive(Debug, Default)]
pub struct ReceiveEndpoints {
    registry: Registry<ReceiveEndpoint>,
    by_key: IndexMap<String, Token>,
}

impl ReceiveEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn find(&self, channel: &ChannelUri) -> Option<Token> {
        self.by_key.get(&channel.endpoint_key()).copied()
    }

    pub fn get(&self, token: Token) -> Option<&ReceiveEndpoint> {
        self.registry.get(token)
    }

    /// Look up or create; creating does not open the socket, the receiver
    /// does that when it processes the registration.
    pub fn ensure(&mut self, channel: &ChannelUri, id: i64) -> (Token, bool) {
        let key = channel.endpoint_key();
        if let Some(&token) = self.by_key.get(&key) {
            return (token, false);
        }
        debug!(%key, id, "receive endpoint created");
        let token =
            self.registry.insert(ReceiveEndpoint { id, key: key.clone(), streams: IndexMap::new() });
        self.by_key.insert(key, token);
        (token, true)
    }

    /// Add one subscription to a stream. Returns true when this is the
    /// stream's first subscription (register the stream with the
    /// receiver). The caller has already checked reliability conflicts.
    pub fn add_stream(&mut self, token: Token, stream_id: i32, reliable: bool) -> bool {
        let Some(endpoint) = self.registry.get_mut(token) else {
            return false;
        };
        match endpoint.streams.get_mut(&stream_id) {
            Some(interest) => {
                interest.subscriptions += 1;
                false
            }
            None => {
                endpoint.streams.insert(stream_id, StreamInterest { subscriptions: 1, reliable });
                true
            }
        }
    }

    /// Drop one subscription from a stream, cascading to stream and
    /// endpoint teardown when counts reach zero.
    pub fn remove_stream(&mut self, token: Token, stream_id: i32) -> StreamRelease {
        let Some(endpoint) = self.registry.get_mut(token) else {
            return StreamRelease { last_for_stream: false, endpoint_closed: None };
        };
        let Some(interest) = endpoint.streams.get_mut(&stream_id) else {
            return StreamRelease { last_for_stream: false, endpoint_closed: None };
        };

        interest.subscriptions = interest.subscriptions.saturating_sub(1);
        if interest.subscriptions > 0 {
            return StreamRelease { last_for_stream: false, endpoint_closed: None };
        }
        endpoint.streams.shift_remove(&stream_id);

        if !endpoint.streams.is_empty() {
            return StreamRelease { last_for_stream: true, endpoint_closed: None };
        }
        let endpoint_closed = self.registry.remove(token).map(|endpoint| {
            self.by_key.shift_remove(&endpoint.key);
            debug!(key = %endpoint.key, id = endpoint.id, "receive endpoint closed");
            endpoint.id
        });
        StreamRelease { last_for_stream: true, endpoint_closed }
    }
}

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;
