// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event broadcast buffer from the conductor to clients.
//!
//! Single-producer, multi-consumer. The transmitter never blocks: frames
//! are appended with a global byte offset and the oldest frames are
//! evicted once the retained window exceeds capacity. Each receiver keeps
//! its own cursor; a receiver that falls behind the retained window
//! observes the loss and resumes from the oldest retained frame.

use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

const FRAME_OVERHEAD: u64 = 4;

#[derive(Debug)]
struct State {
    /// Retained frames with their global start offsets, oldest first.
    /// Offsets are contiguous: next = offset + overhead + len.
    frames: VecDeque<(u64, Bytes)>,
    retained_bytes: usize,
    total_written: u64,
    dropped: u64,
}

#[derive(Debug)]
struct Shared {
    state: RwLock<State>,
    capacity: usize,
    max_frame: usize,
}

/// Transmitter half, owned by the conductor.
#[derive(Debug, Clone)]
pub struct Broadcast {
    shared: Arc<Shared>,
}

impl Broadcast {
    pub fn new(capacity: usize, max_frame: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(State {
                    frames: VecDeque::new(),
                    retained_bytes: 0,
                    total_written: 0,
                    dropped: 0,
                }),
                capacity,
                max_frame,
            }),
        }
    }

    /// Transmit one frame. Returns false (and counts the drop) when the
    /// frame exceeds the maximum frame length; never blocks.
    pub fn transmit(&self, frame: Bytes) -> bool {
        let mut state = self.shared.state.write();
        if frame.len() > self.shared.max_frame {
            state.dropped += 1;
            return false;
        }

        let framed = FRAME_OVERHEAD as usize + frame.len();
        let offset = state.total_written;
        state.frames.push_back((offset, frame));
        state.total_written += framed as u64;
        state.retained_bytes += framed;

        while state.retained_bytes > self.shared.capacity {
            if let Some((_, old)) = state.frames.pop_front() {
                state.retained_bytes -= FRAME_OVERHEAD as usize + old.len();
            }
        }
        true
    }

    /// Frames dropped for exceeding the maximum frame length.
    pub fn dropped(&self) -> u64 {
        self.shared.state.read().dropped
    }

    /// Total bytes ever transmitted.
    pub fn total_written(&self) -> u64 {
        self.shared.state.read().total_written
    }

    /// New receiver positioned at the current tail; it sees only frames
    /// transmitted after this call.
    pub fn receiver(&self) -> BroadcastReceiver {
        BroadcastReceiver {
            shared: Arc::clone(&self.shared),
            next_offset: self.shared.state.read().total_written,
            lost_bytes: 0,
        }
    }
}

/// Receiver half; one per consumer, each with an independent cursor.
#[derive(Debug)]
pub struct BroadcastReceiver {
    shared: Arc<Shared>,
    next_offset: u64,
    lost_bytes: u64,
}

impl BroadcastReceiver {
    /// Next frame at or after this receiver's cursor, or `None` when
    /// caught up. A cursor behind the retained window records the loss
    /// and jumps forward to the oldest retained frame.
    pub fn try_recv(&mut self) -> Option<Bytes> {
        let state = self.shared.state.read();
        if self.next_offset >= state.total_written {
            return None;
        }

        if let Some(&(oldest, _)) = state.frames.front() {
            if self.next_offset < oldest {
                self.lost_bytes += oldest - self.next_offset;
                self.next_offset = oldest;
            }
        }

        let idx = state.frames.partition_point(|&(offset, _)| offset < self.next_offset);
        let (offset, frame) = state.frames.get(idx)?;
        self.next_offset = offset + FRAME_OVERHEAD + frame.len() as u64;
        Some(frame.clone())
    }

    /// Bytes skipped because this receiver fell behind the window.
    pub fn lost_bytes(&self) -> u64 {
        self.lost_bytes
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
