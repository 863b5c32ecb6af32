// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Counter storage shared between the conductor and its observers.
//!
//! The conductor allocates a labelled counter per observable quantity
//! (errors, per-publication limits, per-subscriber positions) and hands
//! out [`Counter`] value handles. Ids are reused after free, so holders
//! must drop their handle when the owning entity closes.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Atomic value handle for one allocated counter.
#[derive(Debug, Clone)]
pub struct Counter {
    id: i32,
    value: Arc<AtomicI64>,
}

impl Counter {
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Acquire)
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Release);
    }

    pub fn increment(&self) -> i64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// One row of [`CountersManager::snapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct CounterInfo {
    pub id: i32,
    pub label: String,
    pub value: i64,
}

#[derive(Debug)]
struct Slot {
    label: String,
    value: Arc<AtomicI64>,
}

/// Allocator and directory for all driver counters.
#[derive(Debug, Default)]
pub struct CountersManager {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    slots: Vec<Option<Slot>>,
    free: Vec<i32>,
}

impl CountersManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self, label: impl Into<String>) -> Counter {
        let mut inner = self.inner.lock();
        let value = Arc::new(AtomicI64::new(0));
        let slot = Slot { label: label.into(), value: Arc::clone(&value) };

        let id = match inner.free.pop() {
            Some(id) => {
                inner.slots[id as usize] = Some(slot);
                id
            }
            None => {
                inner.slots.push(Some(slot));
                (inner.slots.len() - 1) as i32
            }
        };
        Counter { id, value }
    }

    /// Release a counter id for reuse. Outstanding [`Counter`] handles keep
    /// the value alive but the id no longer resolves.
    pub fn free(&self, id: i32) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut(id as usize) {
            if slot.take().is_some() {
                inner.free.push(id);
            }
        }
    }

    pub fn label(&self, id: i32) -> Option<String> {
        let inner = self.inner.lock();
        inner.slots.get(id as usize)?.as_ref().map(|s| s.label.clone())
    }

    pub fn snapshot(&self) -> Vec<CounterInfo> {
        let inner = self.inner.lock();
        inner
            .slots
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                slot.as_ref().map(|s| CounterInfo {
                    id: id as i32,
                    label: s.label.clone(),
                    value: s.value.load(Ordering::Acquire),
                })
            })
            .collect()
    }
}

/// Driver-wide counters allocated at startup.
#[derive(Debug, Clone)]
pub struct SystemCounters {
    /// Command validation failures, handler errors, dropped events.
    pub errors: Counter,
    /// Clients released after missing their keepalive window.
    pub client_timeouts: Counter,
}

impl SystemCounters {
    pub fn new(counters: &CountersManager) -> Self {
        Self {
            errors: counters.allocate("driver-errors"),
            client_timeouts: counters.allocate("client-timeouts"),
        }
    }
}

#[cfg(test)]
#[path = "counters_tests.rs"]
mod tests;
