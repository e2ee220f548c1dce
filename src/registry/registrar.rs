// SPDX-License-Identifier: Apache-2.0

//! The registrar: sole writer of the durable registry.
//!
//! Receives resume seeds from the prospector and acknowledged batches from
//! the publisher on one channel and persists after every update. A failed
//! write is logged and the loop continues; the in-memory map stays correct,
//! so the next successful write restores durability.

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::bounded_channel::BoundedReceiver;
use crate::error::Result;
use crate::event::Event;
use crate::registry::{FileState, Registry};
use crate::telemetry::PipelineMetrics;

/// Updates accepted by the registrar loop.
pub enum RegistryUpdate {
    /// Prospector matched an on-disk file to prior state; re-confirm it.
    Seed(FileState),
    /// Events of a batch acknowledged by the output, in batch order.
    Published(Vec<Event>),
}

pub struct Registrar {
    registry: Registry,
    rx: BoundedReceiver<RegistryUpdate>,
    metrics: PipelineMetrics,
}

impl Registrar {
    pub fn new(
        registry: Registry,
        rx: BoundedReceiver<RegistryUpdate>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            registry,
            rx,
            metrics,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("Registrar started");

        loop {
            select! {
                biased;

                update = self.rx.next() => {
                    match update {
                        Some(update) => self.apply(update),
                        None => {
                            debug!("Registrar update channel closed");
                            break;
                        }
                    }
                }

                _ = cancel.cancelled() => {
                    debug!("Registrar cancelled");
                    break;
                }
            }
        }

        // Upstream may still hold already-acknowledged updates; drain what
        // is queued, flush once more and exit.
        while let Some(update) = self.rx.try_recv() {
            self.apply(update);
        }
        self.persist();

        info!(states = self.registry.len(), "Registrar stopped");
        Ok(())
    }

    fn apply(&mut self, update: RegistryUpdate) {
        match update {
            RegistryUpdate::Seed(state) => {
                debug!(source = %state.source.display(), offset = state.offset,
                    "Seeding registry state");
                self.registry.upsert(state);
            }
            RegistryUpdate::Published(events) => {
                let mut changed = false;
                for event in events {
                    // Stdin-style sources carry no identity and are never
                    // persisted.
                    let Some(identity) = event.identity else {
                        continue;
                    };
                    let offset = event.next_offset();
                    self.registry
                        .upsert(FileState::new(event.source, offset, identity));
                    changed = true;
                }
                if !changed {
                    return;
                }
            }
        }
        self.persist();
    }

    fn persist(&mut self) {
        match self.registry.write() {
            Ok(()) => self.metrics.registry_writes.inc(),
            Err(e) => {
                // Not fatal: the in-memory map is still correct.
                error!(error = %e, "Failed to write registry");
                self.metrics.registry_write_failures.inc();
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }
}
