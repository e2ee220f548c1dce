// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{PublishMode, ShipperConfig};
use crate::init::parse;
use crate::outputs::OutputKind;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Glob patterns of files to tail
    #[arg(long, env = "SKIFF_INCLUDE", value_delimiter = ',')]
    pub include: Vec<String>,

    /// Glob patterns of files to skip
    #[arg(long, env = "SKIFF_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Interval between discovery scans
    #[arg(long, env = "SKIFF_SCAN_FREQUENCY", default_value = "10s", value_parser = parse::parse_duration)]
    pub scan_frequency: Duration,

    /// Files untouched for longer are not harvested until they change
    #[arg(long, env = "SKIFF_DEAD_TIME", default_value = "24h", value_parser = parse::parse_duration)]
    pub dead_time: Duration,

    /// Flush a partial batch after this much inactivity
    #[arg(long, env = "SKIFF_IDLE_TIMEOUT", default_value = "5s", value_parser = parse::parse_duration)]
    pub idle_timeout: Duration,

    /// Events per batch
    #[arg(long, env = "SKIFF_SPOOL_SIZE", default_value = "2048")]
    pub spool_size: usize,

    /// Upper bound on a single wait for new data
    #[arg(long, env = "SKIFF_READ_TIMEOUT", default_value = "10s", value_parser = parse::parse_duration)]
    pub read_timeout: Duration,

    /// Sleep between end-of-file probes and open retries
    #[arg(long, env = "SKIFF_BACKOFF", default_value = "1s", value_parser = parse::parse_duration)]
    pub backoff: Duration,

    /// Open attempts before a harvester gives up on a file
    #[arg(long, env = "SKIFF_OPEN_RETRY_LIMIT", default_value = "10")]
    pub open_retry_limit: u32,

    /// Start new files at the end instead of the beginning
    #[arg(long, env = "SKIFF_TAIL_FILES", default_value = "false")]
    pub tail_files: bool,

    /// Number of scans a vanished file stays tracked before it is forgotten
    #[arg(long, env = "SKIFF_CLEAN_ITERATIONS", default_value = "5")]
    pub clean_iterations: u64,

    /// Capacity of the internal pipeline queues
    #[arg(long, env = "SKIFF_QUEUE_SIZE", default_value = "16")]
    pub queue_size: usize,

    /// Publish mode: sync or async
    #[arg(long, env = "SKIFF_PUBLISH_MODE", default_value = "async")]
    pub publish_mode: PublishMode,

    /// Output sink: console or blackhole
    #[arg(long, env = "SKIFF_OUTPUT", default_value = "console")]
    pub output: OutputKind,

    /// Registry file recording per-file progress
    #[arg(
        long,
        env = "SKIFF_REGISTRY_FILE",
        default_value = "/var/lib/skiff/registry.json"
    )]
    pub registry_file: PathBuf,

    /// Also read lines from standard input
    #[arg(long, env = "SKIFF_STDIN", default_value = "false")]
    pub stdin: bool,
}

impl AgentRun {
    pub fn build_config(&self) -> ShipperConfig {
        ShipperConfig {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            scan_frequency: self.scan_frequency,
            dead_time: self.dead_time,
            idle_timeout: self.idle_timeout,
            spool_size: self.spool_size,
            read_timeout: self.read_timeout,
            backoff: self.backoff,
            open_retry_limit: self.open_retry_limit,
            tail_files: self.tail_files,
            clean_iterations: self.clean_iterations,
            queue_size: self.queue_size,
            publish_mode: self.publish_mode,
            output: self.output,
            registry_path: self.registry_file.clone(),
            stdin: self.stdin,
        }
    }
}
