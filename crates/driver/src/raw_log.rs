// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Log-buffer handles and the allocation seam.
//!
//! The conductor never touches term contents; it stores the handle, stamps
//! the initial metadata, and publishes the file name to clients. File
//! layout below the handle is the log factory's business.

use crate::error::DriverError;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A log is three rotating terms plus a metadata page.
pub const TERM_COUNT: u64 = 3;
pub const LOG_META_LENGTH: u64 = 4096;

/// Memory-mapped log-buffer set for one publication or image.
///
/// Producer and consumer positions use release/acquire so data-plane
/// agents and clients can read them lock-free.
pub struct RawLog {
    path: PathBuf,
    term_length: u32,
    mtu: u32,
    init_term_id: i32,
    producer_pos: AtomicU64,
    consumer_pos: AtomicU64,
}

impl RawLog {
    pub fn new(path: PathBuf, term_length: u32, mtu: u32, init_term_id: i32) -> Self {
        Self {
            path,
            term_length,
            mtu,
            init_term_id,
            producer_pos: AtomicU64::new(0),
            consumer_pos: AtomicU64::new(0),
        }
    }

    /// File name published to clients in ready/available events.
    pub fn file_name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn term_length(&self) -> u32 {
        self.term_length
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn init_term_id(&self) -> i32 {
        self.init_term_id
    }

    pub fn producer_position(&self) -> u64 {
        self.producer_pos.load(Ordering::Acquire)
    }

    pub fn set_producer_position(&self, position: u64) {
        self.producer_pos.store(position, Ordering::Release);
    }

    pub fn consumer_position(&self) -> u64 {
        self.consumer_pos.load(Ordering::Acquire)
    }

    pub fn set_consumer_position(&self, position: u64) {
        self.consumer_pos.store(position, Ordering::Release);
    }

    /// Seed both positions, e.g. for exclusive replay publications.
    pub fn set_initial_position(&self, position: u64) {
        self.producer_pos.store(position, Ordering::Release);
        self.consumer_pos.store(position, Ordering::Release);
    }

    /// Whether all produced data has been consumed.
    pub fn is_drained(&self) -> bool {
        self.consumer_position() >= self.producer_position()
    }
}

impl fmt::Debug for RawLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawLog")
            .field("path", &self.path)
            .field("term_length", &self.term_length)
            .field("mtu", &self.mtu)
            .field("init_term_id", &self.init_term_id)
            .field("producer_pos", &self.producer_position())
            .field("consumer_pos", &self.consumer_position())
            .finish()
    }
}

/// Allocation seam; injected so tests run without touching the filesystem.
pub trait LogFactory: Send {
    fn create_log(
        &self,
        correlation_id: i64,
        term_length: u32,
        mtu: u32,
        init_term_id: i32,
    ) -> Result<Arc<RawLog>, DriverError>;
}

/// Production factory: sized files under the driver directory.
#[derive(Debug)]
pub struct FileLogFactory {
    dir: PathBuf,
}

impl FileLogFactory {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }
}

impl LogFactory for FileLogFactory {
    fn create_log(
        &self,
        correlation_id: i64,
        term_length: u32,
        mtu: u32,
        init_term_id: i32,
    ) -> Result<Arc<RawLog>, DriverError> {
        let path = self.dir.join(format!("{correlation_id}.logbuffer"));
        let length = TERM_COUNT * term_length as u64 + LOG_META_LENGTH;

        let file = std::fs::File::create(&path)
            .map_err(|e| DriverError::resource_exhausted(format!("create {path:?}: {e}")))?;
        file.set_len(length)
            .map_err(|e| DriverError::resource_exhausted(format!("size {path:?}: {e}")))?;

        Ok(Arc::new(RawLog::new(path, term_length, mtu, init_term_id)))
    }
}

#[cfg(test)]
#[path = "raw_log_tests.rs"]
mod tests;
