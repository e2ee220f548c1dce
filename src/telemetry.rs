// SPDX-License-Identifier: Apache-2.0

//! Injected metrics sink. Components receive a [`PipelineMetrics`] handle
//! instead of touching process-global counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub trait Counter: Send + Sync {
    fn add(&self, value: u64);
    fn get(&self) -> u64;
}

#[derive(Clone, Default)]
pub enum PipelineCounter {
    Atomic(Arc<AtomicU64>),
    #[default]
    NoOp,
}

impl PipelineCounter {
    fn atomic() -> Self {
        PipelineCounter::Atomic(Arc::new(AtomicU64::new(0)))
    }

    pub fn inc(&self) {
        self.add(1)
    }
}

impl Counter for PipelineCounter {
    fn add(&self, value: u64) {
        match self {
            PipelineCounter::Atomic(c) => {
                c.fetch_add(value, Ordering::Relaxed);
            }
            PipelineCounter::NoOp => {}
        }
    }

    fn get(&self) -> u64 {
        match self {
            PipelineCounter::Atomic(c) => c.load(Ordering::Relaxed),
            PipelineCounter::NoOp => 0,
        }
    }
}

/// Counters for the pipeline, shared by clone.
#[derive(Clone, Default)]
pub struct PipelineMetrics {
    pub harvesters_started: PipelineCounter,
    pub harvesters_closed: PipelineCounter,
    pub harvester_open_failures: PipelineCounter,
    pub files_truncated: PipelineCounter,
    pub files_renamed: PipelineCounter,
    pub events_emitted: PipelineCounter,
    pub batches_published: PipelineCounter,
    pub batches_failed: PipelineCounter,
    pub registry_writes: PipelineCounter,
    pub registry_write_failures: PipelineCounter,
}

impl PipelineMetrics {
    /// Atomic-backed counters.
    pub fn new() -> Self {
        Self {
            harvesters_started: PipelineCounter::atomic(),
            harvesters_closed: PipelineCounter::atomic(),
            harvester_open_failures: PipelineCounter::atomic(),
            files_truncated: PipelineCounter::atomic(),
            files_renamed: PipelineCounter::atomic(),
            events_emitted: PipelineCounter::atomic(),
            batches_published: PipelineCounter::atomic(),
            batches_failed: PipelineCounter::atomic(),
            registry_writes: PipelineCounter::atomic(),
            registry_write_failures: PipelineCounter::atomic(),
        }
    }

    /// All counters are no-ops.
    pub fn disabled() -> Self {
        Self::default()
    }
}
