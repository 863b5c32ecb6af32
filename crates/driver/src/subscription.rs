// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription records.
//!
//! A subscription is a client's interest in a (channel, stream). Network
//! subscriptions hold a reference to their receive endpoint; spies attach
//! to co-located publications instead and never touch the receiver.

use crate::registry::Token;
use crate::uri::ChannelUri;

/// How the subscription is wired into the data plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionLink {
    /// Reads from a UDP receive endpoint.
    Network { endpoint: Token, endpoint_id: i64 },
    /// Reads a co-located IPC publication's log directly.
    Ipc,
    /// Reads a co-located network publication's log directly. Spies are
    /// always reliable regardless of URI params.
    Spy,
}

#[derive(Debug)]
pub struct Subscription {
    pub registration_id: i64,
    pub client_id: i64,
    pub stream_id: i32,
    pub channel: ChannelUri,
    pub channel_uri: String,
    pub reliable: bool,
    pub link: SubscriptionLink,
}

impl Subscription {
    pub fn is_network(&self) -> bool {
        matches!(self.link, SubscriptionLink::Network { .. })
    }

    pub fn is_spy(&self) -> bool {
        matches!(self.link, SubscriptionLink::Spy)
    }
}
