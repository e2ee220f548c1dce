// SPDX-License-Identifier: Apache-2.0

//! Configuration for the shipping agent core. Produced by the CLI layer in
//! `init::args`; opaque defaults live here.

use std::path::PathBuf;
use std::time::Duration;

use crate::outputs::OutputKind;

/// How batches are handed to the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishMode {
    /// One batch in flight, block for its acknowledgment.
    Sync,
    /// Submission-ordered in-flight list with out-of-order completions.
    #[default]
    Async,
}

impl std::str::FromStr for PublishMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sync" => Ok(PublishMode::Sync),
            "async" => Ok(PublishMode::Async),
            other => Err(format!("unknown publish mode: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShipperConfig {
    /// Glob patterns for files to tail.
    pub include: Vec<String>,
    /// Glob patterns for files to skip.
    pub exclude: Vec<String>,
    /// Interval between prospector scans.
    pub scan_frequency: Duration,
    /// Inactivity threshold: files untouched for longer are dead on arrival,
    /// and running harvesters stop after this much read silence.
    pub dead_time: Duration,
    /// Spooler flush timer, reset on every flush.
    pub idle_timeout: Duration,
    /// Spooler flushes once this many events are buffered.
    pub spool_size: usize,
    /// Upper bound on a single EOF wait inside the harvester read loop.
    pub read_timeout: Duration,
    /// Sleep between EOF probes and between open retries.
    pub backoff: Duration,
    /// Open attempts before a harvester instance gives up.
    pub open_retry_limit: u32,
    /// Seek to end-of-file when starting on a file with no stored offset.
    pub tail_files: bool,
    /// Scans a tracked path may stay absent before it is dropped from the
    /// prospector's in-memory map.
    pub clean_iterations: u64,
    /// Capacity of every inter-component queue.
    pub queue_size: usize,
    /// Sync or async publishing.
    pub publish_mode: PublishMode,
    /// Sink batches are delivered to.
    pub output: OutputKind,
    /// Durable registry location.
    pub registry_path: PathBuf,
    /// Also harvest standard input. Never persisted to the registry.
    pub stdin: bool,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            scan_frequency: Duration::from_secs(10),
            dead_time: Duration::from_secs(24 * 3600),
            idle_timeout: Duration::from_secs(5),
            spool_size: 2048,
            read_timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(1),
            open_retry_limit: 10,
            tail_files: false,
            clean_iterations: 5,
            queue_size: 16,
            publish_mode: PublishMode::Async,
            output: OutputKind::Console,
            registry_path: PathBuf::from("/var/lib/skiff/registry.json"),
            stdin: false,
        }
    }
}

impl ShipperConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.include.is_empty() && !self.stdin {
            return Err("at least one include pattern must be specified".to_string());
        }
        if self.spool_size == 0 {
            return Err("spool_size must be greater than zero".to_string());
        }
        if self.queue_size == 0 {
            return Err("queue_size must be greater than zero".to_string());
        }
        if self.backoff > self.read_timeout {
            return Err("backoff must not exceed read_timeout".to_string());
        }
        Ok(())
    }
}
