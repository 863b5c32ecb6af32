// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Publication images: remote publications as seen by the receiver.
//!
//! ```text
//! INIT     --first status message----> ACTIVE
//! ACTIVE   --receiver goes quiet-----> INACTIVE
//! INACTIVE --liveness elapsed--------> LINGER
//! LINGER   --liveness elapsed--------> CLOSING
//! ```
//!
//! Entering INACTIVE is the availability boundary: the conductor emits one
//! unavailable-image for every image whose subscribers were told it was
//! available, before the image can be deleted.

use crate::counters::Counter;
use crate::raw_log::RawLog;
use crate::registry::Token;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImageState {
    Init,
    Active,
    Inactive,
    Linger,
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageTransition {
    ToLinger,
    ToClosing,
}

/// One remote (session, stream) observed on a receive endpoint.
#[derive(Debug)]
pub struct PublicationImage {
    pub correlation_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub endpoint: Token,
    pub endpoint_id: i64,
    pub channel_uri: String,
    pub source_identity: String,
    pub log: Arc<RawLog>,
    state: ImageState,
    last_change_ns: u64,
    /// Subscriber links told this image is available:
    /// (subscription registration id, position counter).
    pub subscriber_positions: Vec<(i64, Counter)>,
    notified: bool,
}

impl PublicationImage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        correlation_id: i64,
        session_id: i32,
        stream_id: i32,
        endpoint: Token,
        endpoint_id: i64,
        channel_uri: String,
        source_identity: String,
        log: Arc<RawLog>,
        now_ns: u64,
    ) -> Self {
        Self {
            correlation_id,
            session_id,
            stream_id,
            endpoint,
            endpoint_id,
            channel_uri,
            source_identity,
            log,
            state: ImageState::Init,
            last_change_ns: now_ns,
            subscriber_positions: Vec::new(),
            notified: false,
        }
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == ImageState::Active
    }

    /// Whether availability was announced and the closing
    /// unavailable-image is still owed.
    pub fn owes_unavailable(&self) -> bool {
        self.notified
    }

    pub fn mark_notified(&mut self) {
        self.notified = true;
    }

    pub fn mark_unavailable_sent(&mut self) {
        self.notified = false;
    }

    /// First status message sent by the receiver.
    pub fn activate(&mut self, now_ns: u64) -> bool {
        if self.state != ImageState::Init {
            return false;
        }
        self.change_state(ImageState::Active, now_ns);
        true
    }

    /// The receiver stopped tracking this image.
    pub fn if_active_go_inactive(&mut self, now_ns: u64) -> bool {
        if self.state != ImageState::Active {
            return false;
        }
        self.change_state(ImageState::Inactive, now_ns);
        true
    }

    pub fn on_time_event(&mut self, now_ns: u64, liveness_ns: u64) -> Option<ImageTransition> {
        match self.state {
            ImageState::Init | ImageState::Active | ImageState::Closing => None,
            ImageState::Inactive => {
                if now_ns - self.last_change_ns > liveness_ns {
                    self.change_state(ImageState::Linger, now_ns);
                    Some(ImageTransition::ToLinger)
                } else {
                    None
                }
            }
            ImageState::Linger => {
                if now_ns - self.last_change_ns > liveness_ns {
                    self.change_state(ImageState::Closing, now_ns);
                    Some(ImageTransition::ToClosing)
                } else {
                    None
                }
            }
        }
    }

    fn change_state(&mut self, next: ImageState, now_ns: u64) {
        debug!(
            correlation_id = self.correlation_id,
            session_id = self.session_id,
            stream_id = self.stream_id,
            from = ?self.state,
            to = ?next,
            "image state"
        );
        self.state = next;
        self.last_change_ns = now_ns;
    }
}

#[cfg(test)]
#[path = "image_tests.rs"]
mod tests;
