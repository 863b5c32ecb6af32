// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed command ring between clients and the conductor.
//!
//! Multi-producer, single-consumer. Producers offer length-prefixed frames
//! without blocking; a full ring rejects the offer and the producer retries
//! on its own schedule. The conductor drains a bounded number of frames per
//! tick. When the buffer wraps, frames are copied in two slices.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::fmt;

const LENGTH_PREFIX: usize = 4;

/// Why an offer was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    /// The frame exceeds the ring's maximum frame length.
    FrameTooLarge,
    /// Not enough free space; retry after the consumer drains.
    InsufficientSpace,
}

impl fmt::Display for OfferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooLarge => f.write_str("frame too large"),
            Self::InsufficientSpace => f.write_str("insufficient space"),
        }
    }
}

/// Fixed-capacity circular frame buffer.
#[derive(Debug)]
pub struct CommandRing {
    inner: Mutex<Inner>,
    capacity: usize,
    max_frame: usize,
}

#[derive(Debug)]
struct Inner {
    buf: Vec<u8>,
    /// Global read offset; only the consumer advances it.
    head: u64,
    /// Global write offset.
    tail: u64,
}

impl CommandRing {
    /// Create a ring with the given byte capacity. The maximum frame
    /// length is capacity / 8.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner { buf: vec![0u8; capacity], head: 0, tail: 0 }),
            capacity,
            max_frame: capacity / 8,
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame
    }

    /// Offer one frame. Non-blocking; never overwrites pending frames.
    pub fn offer(&self, frame: &[u8]) -> Result<(), OfferError> {
        if frame.len() > self.max_frame {
            return Err(OfferError::FrameTooLarge);
        }
        let framed = LENGTH_PREFIX + frame.len();

        let mut inner = self.inner.lock();
        let used = (inner.tail - inner.head) as usize;
        if used + framed > self.capacity {
            return Err(OfferError::InsufficientSpace);
        }

        let tail = inner.tail;
        self.copy_in(&mut inner.buf, tail, &(frame.len() as u32).to_le_bytes());
        self.copy_in(&mut inner.buf, tail + LENGTH_PREFIX as u64, frame);
        inner.tail = tail + framed as u64;
        Ok(())
    }

    /// Drain up to `max_frames` frames in offer order.
    pub fn drain(&self, max_frames: usize) -> Vec<Bytes> {
        let mut inner = self.inner.lock();
        let mut frames = Vec::new();

        while frames.len() < max_frames && inner.head < inner.tail {
            let mut len_bytes = [0u8; LENGTH_PREFIX];
            let head = inner.head;
            self.copy_out(&inner.buf, head, &mut len_bytes);
            let len = u32::from_le_bytes(len_bytes) as usize;

            let mut frame = BytesMut::zeroed(len);
            self.copy_out(&inner.buf, head + LENGTH_PREFIX as u64, &mut frame);
            inner.head = head + (LENGTH_PREFIX + len) as u64;
            frames.push(frame.freeze());
        }
        frames
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        (inner.tail - inner.head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn copy_in(&self, buf: &mut [u8], offset: u64, data: &[u8]) {
        let start = (offset % self.capacity as u64) as usize;
        let end = start + data.len();
        if end <= self.capacity {
            buf[start..end].copy_from_slice(data);
        } else {
            let first = self.capacity - start;
            buf[start..self.capacity].copy_from_slice(&data[..first]);
            buf[..data.len() - first].copy_from_slice(&data[first..]);
        }
    }

    fn copy_out(&self, buf: &[u8], offset: u64, out: &mut [u8]) {
        let start = (offset % self.capacity as u64) as usize;
        let end = start + out.len();
        if end <= self.capacity {
            out.copy_from_slice(&buf[start..end]);
        } else {
            let first = self.capacity - start;
            let out_len = out.len();
            out[..first].copy_from_slice(&buf[start..self.capacity]);
            out[first..].copy_from_slice(&buf[..out_len - first]);
        }
    }
}

#[cfg(test)]
#[path = "ring_tests.rs"]
mod tests;
