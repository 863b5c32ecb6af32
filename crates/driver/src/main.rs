// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use weir::broadcast::Broadcast;
use weir::conductor::{Conductor, ConductorChannels};
use weir::config::Config;
use weir::counters::CountersManager;
use weir::idle::{AgentRunner, BackoffIdleStrategy};
use weir::proxy::{mailbox, ConductorCmd, ReceiverCmd, SenderCmd};
use weir::raw_log::FileLogFactory;
use weir::ring::CommandRing;

const SNAPSHOT_INTERVAL: Duration = Duration::from_secs(10);

fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }
    init_tracing(&config);

    if let Err(e) = run(config) {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    // Priority: --log-level / WEIR_LOG_LEVEL > RUST_LOG > default ("info").
    let filter = if std::env::var("WEIR_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

fn run(config: Config) -> anyhow::Result<()> {
    let counters = Arc::new(CountersManager::new());
    let command_ring = Arc::new(CommandRing::new(config.command_ring_capacity));
    let broadcast = Broadcast::new(config.broadcast_capacity, config.max_event_frame);
    let log_factory = FileLogFactory::new(&config.dir)?;

    let (sender_tx, sender_rx) = mailbox::<SenderCmd>(config.mailbox_capacity);
    let (receiver_tx, receiver_rx) = mailbox::<ReceiverCmd>(config.mailbox_capacity);
    let (inbound_tx, inbound_rx) = mailbox::<ConductorCmd>(config.mailbox_capacity);

    let mut conductor = Conductor::new(
        config.driver_context(),
        Arc::new(weir::clock::MonotonicClock::new()),
        Box::new(log_factory),
        Arc::clone(&counters),
        ConductorChannels {
            command_ring,
            broadcast,
            sender: sender_tx,
            receiver: receiver_tx,
            inbound: inbound_rx,
        },
    );

    info!(dir = %config.dir.display(), "driver started");

    let mut last_snapshot = Instant::now();
    let _conductor_runner =
        AgentRunner::spawn("weir-conductor", BackoffIdleStrategy::default_backoff(), move || {
            let work = conductor.do_work();
            if last_snapshot.elapsed() >= SNAPSHOT_INTERVAL {
                last_snapshot = Instant::now();
                match serde_json::to_string(&conductor.snapshot()) {
                    Ok(snapshot) => debug!(%snapshot, "driver snapshot"),
                    Err(e) => debug!("snapshot serialization failed: {e}"),
                }
            }
            work
        })?;

    // Mailbox drains standing in for the sender/receiver agents until they
    // attach; publication teardown is acked straight back so the conductor
    // can retire closing publications.
    let sender_ack = inbound_tx;
    let _sender_runner =
        AgentRunner::spawn("weir-sender", BackoffIdleStrategy::default_backoff(), move || {
            let mut work = 0;
            while let Some(cmd) = sender_rx.try_recv() {
                work += 1;
                if let SenderCmd::RemovePublication { registration_id } = cmd {
                    sender_ack.offer(ConductorCmd::PublicationClosed { registration_id });
                }
            }
            work
        })?;

    let _receiver_runner =
        AgentRunner::spawn("weir-receiver", BackoffIdleStrategy::default_backoff(), move || {
            let mut work = 0;
            while receiver_rx.try_recv().is_some() {
                work += 1;
            }
            work
        })?;

    loop {
        std::thread::park();
    }
}
