// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use crate::conductor::DriverContext;
use crate::uri::{FRAME_ALIGNMENT, MTU_MAX_LENGTH, MTU_MIN_LENGTH, TERM_MAX_LENGTH, TERM_MIN_LENGTH};

const MS_TO_NS: u64 = 1_000_000;

/// Shared-memory/UDP messaging driver.
#[derive(Debug, Parser)]
#[command(name = "weir", version, about)]
pub struct Config {
    /// Directory for log-buffer files.
    #[arg(long, env = "WEIR_DIR", default_value = "/dev/shm/weir")]
    pub dir: PathBuf,

    /// Client liveness timeout in milliseconds.
    #[arg(long, env = "WEIR_CLIENT_LIVENESS_TIMEOUT_MS", default_value = "10000")]
    pub client_liveness_timeout_ms: u64,

    /// Publication linger in milliseconds.
    #[arg(long, env = "WEIR_PUBLICATION_LINGER_MS", default_value = "5000")]
    pub publication_linger_ms: u64,

    /// Draining publication connection timeout in milliseconds.
    #[arg(long, env = "WEIR_PUBLICATION_CONNECTION_TIMEOUT_MS", default_value = "5000")]
    pub publication_connection_timeout_ms: u64,

    /// Image liveness timeout in milliseconds.
    #[arg(long, env = "WEIR_IMAGE_LIVENESS_TIMEOUT_MS", default_value = "10000")]
    pub image_liveness_timeout_ms: u64,

    /// Conductor timer interval in milliseconds.
    #[arg(long, env = "WEIR_TIMER_INTERVAL_MS", default_value = "1000")]
    pub timer_interval_ms: u64,

    /// Default publication term length in bytes (power of two).
    #[arg(long, env = "WEIR_TERM_LENGTH", default_value = "16777216")]
    pub term_length: u32,

    /// Default publication MTU in bytes.
    #[arg(long, env = "WEIR_MTU", default_value = "1408")]
    pub mtu: u32,

    /// Client command ring capacity in bytes.
    #[arg(long, env = "WEIR_COMMAND_RING_CAPACITY", default_value = "1048576")]
    pub command_ring_capacity: usize,

    /// Client broadcast buffer capacity in bytes.
    #[arg(long, env = "WEIR_BROADCAST_CAPACITY", default_value = "1048576")]
    pub broadcast_capacity: usize,

    /// Largest event frame the broadcast buffer accepts.
    #[arg(long, env = "WEIR_MAX_EVENT_FRAME", default_value = "4096")]
    pub max_event_frame: usize,

    /// Commands drained from the ring per conductor tick.
    #[arg(long, env = "WEIR_COMMAND_DRAIN_LIMIT", default_value = "10")]
    pub command_drain_limit: usize,

    /// Mailbox capacity for sender/receiver command queues.
    #[arg(long, env = "WEIR_MAILBOX_CAPACITY", default_value = "1024")]
    pub mailbox_capacity: usize,

    /// Log format (json or text).
    #[arg(long, env = "WEIR_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "WEIR_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.term_length.is_power_of_two()
            || !(TERM_MIN_LENGTH..=TERM_MAX_LENGTH).contains(&self.term_length)
        {
            anyhow::bail!(
                "--term-length must be a power of two in [{TERM_MIN_LENGTH}, {TERM_MAX_LENGTH}]"
            );
        }
        if self.mtu % FRAME_ALIGNMENT != 0 || !(MTU_MIN_LENGTH..=MTU_MAX_LENGTH).contains(&self.mtu)
        {
            anyhow::bail!("--mtu must be a multiple of {FRAME_ALIGNMENT} in [{MTU_MIN_LENGTH}, {MTU_MAX_LENGTH}]");
        }
        if self.command_drain_limit == 0 {
            anyhow::bail!("--command-drain-limit must be at least 1");
        }
        if self.timer_interval_ms == 0 {
            anyhow::bail!("--timer-interval-ms must be at least 1");
        }
        if self.max_event_frame * 2 > self.broadcast_capacity {
            anyhow::bail!("--max-event-frame must fit the broadcast buffer at least twice");
        }
        Ok(())
    }

    /// Conductor parameters derived from this configuration.
    pub fn driver_context(&self) -> DriverContext {
        DriverContext {
            client_liveness_timeout_ns: self.client_liveness_timeout_ms * MS_TO_NS,
            publication_linger_ns: self.publication_linger_ms * MS_TO_NS,
            publication_connection_timeout_ns: self.publication_connection_timeout_ms * MS_TO_NS,
            image_liveness_timeout_ns: self.image_liveness_timeout_ms * MS_TO_NS,
            timer_interval_ns: self.timer_interval_ms * MS_TO_NS,
            default_term_length: self.term_length,
            default_mtu: self.mtu,
            command_drain_limit: self.command_drain_limit,
            session_id_seed: None,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
