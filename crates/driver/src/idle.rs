// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent scheduling: backoff idle strategy and the runner thread.
//!
//! An agent is a `do_work` closure returning how much work it did. The
//! runner drives it in a loop; when a tick does no work the idle strategy
//! spins, then yields, then parks for increasing intervals until work
//! shows up again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

/// Spin/yield/park backoff.
#[derive(Debug)]
pub struct BackoffIdleStrategy {
    max_spins: u32,
    max_yields: u32,
    min_park: Duration,
    max_park: Duration,
    spins: u32,
    yields: u32,
    park: Duration,
}

impl BackoffIdleStrategy {
    pub fn new(max_spins: u32, max_yields: u32, min_park: Duration, max_park: Duration) -> Self {
        Self { max_spins, max_yields, min_park, max_park, spins: 0, yields: 0, park: min_park }
    }

    /// 100 spins, 100 yields, park 1 microsecond doubling to 1 millisecond.
    pub fn default_backoff() -> Self {
        Self::new(100, 100, Duration::from_micros(1), Duration::from_millis(1))
    }

    /// Apply backoff appropriate to the amount of work the last tick did.
    pub fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.reset();
            return;
        }
        if self.spins < self.max_spins {
            self.spins += 1;
            std::hint::spin_loop();
        } else if self.yields < self.max_yields {
            self.yields += 1;
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.park);
            self.park = (self.park * 2).min(self.max_park);
        }
    }

    fn reset(&mut self) {
        self.spins = 0;
        self.yields = 0;
        self.park = self.min_park;
    }
}

impl Default for BackoffIdleStrategy {
    fn default() -> Self {
        Self::default_backoff()
    }
}

/// Drives an agent on a dedicated named thread until shut down.
#[derive(Debug)]
pub struct AgentRunner {
    name: String,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AgentRunner {
    pub fn spawn(
        name: &str,
        mut idle: BackoffIdleStrategy,
        mut do_work: impl FnMut() -> usize + Send + 'static,
    ) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&shutdown);
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new().name(thread_name).spawn(move || {
            while !stop.load(Ordering::Acquire) {
                let work = do_work();
                idle.idle(work);
            }
        })?;

        debug!(name, "agent started");
        Ok(Self { name: name.to_string(), shutdown, handle: Some(handle) })
    }

    /// Signal the agent to stop and join its thread.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!(name = %self.name, "agent thread panicked");
            } else {
                debug!(name = %self.name, "agent stopped");
            }
        }
    }
}

impl Drop for AgentRunner {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

#[cfg(test)]
#[path = "idle_tests.rs"]
mod tests;
