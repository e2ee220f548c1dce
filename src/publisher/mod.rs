// SPDX-License-Identifier: Apache-2.0

//! Publisher: hands batches to the output and commits acknowledged offsets
//! in submission order.
//!
//! Each batch gets a sequence number and an [`AckHandle`]. Completions may
//! arrive out of order; the publisher only forwards offsets to the registrar
//! from the head of the in-flight queue, so a slow batch holds back every
//! batch behind it and the registry never records offsets past an
//! unacknowledged gap. A failed or canceled batch flips the publisher into
//! draining mode: later batches still flow to the output but their offsets
//! are no longer committed, trading duplicate delivery after restart for
//! never losing the failed bytes.

pub mod batch;

use std::collections::VecDeque;
use std::sync::atomic::AtomicU8;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bounded_channel::{bounded, BoundedReceiver, BoundedSender};
use crate::config::PublishMode;
use crate::event::Event;
use crate::registry::registrar::RegistryUpdate;
use crate::telemetry::PipelineMetrics;

use batch::{load_status, AckHandle, Batch, BatchStatus};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

struct InFlight {
    seq: u64,
    status: Arc<AtomicU8>,
    events: Arc<Vec<Event>>,
}

pub struct Publisher {
    batches_rx: BoundedReceiver<Vec<Event>>,
    output_tx: BoundedSender<(Batch, AckHandle)>,
    registrar_tx: BoundedSender<RegistryUpdate>,
    mode: PublishMode,
    metrics: PipelineMetrics,
    seq: u64,
    in_flight: VecDeque<InFlight>,
    notify_tx: BoundedSender<u64>,
    notify_rx: BoundedReceiver<u64>,
    draining: bool,
}

impl Publisher {
    pub fn new(
        batches_rx: BoundedReceiver<Vec<Event>>,
        output_tx: BoundedSender<(Batch, AckHandle)>,
        registrar_tx: BoundedSender<RegistryUpdate>,
        mode: PublishMode,
        queue_size: usize,
        metrics: PipelineMetrics,
    ) -> Self {
        // Sized so a full in-flight window can notify without drops; the
        // periodic sweep covers the rest.
        let (notify_tx, notify_rx) = bounded(queue_size.max(1) * 2);
        Self {
            batches_rx,
            output_tx,
            registrar_tx,
            mode,
            metrics,
            seq: 0,
            in_flight: VecDeque::new(),
            notify_tx,
            notify_rx,
            draining: false,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(mode = ?self.mode, "Publisher started");
        let mut sweep_tick = tokio::time::interval(SWEEP_INTERVAL);

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Publisher cancelled");
                    break;
                }

                completed = self.notify_rx.next() => {
                    if completed.is_some() {
                        self.sweep().await;
                    }
                }

                batch = self.batches_rx.next() => {
                    match batch {
                        Some(events) => {
                            if !self.dispatch(events).await {
                                break;
                            }
                            if self.mode == PublishMode::Sync && !self.wait_in_flight().await {
                                break;
                            }
                        }
                        None => {
                            debug!("Batch channel closed");
                            break;
                        }
                    }
                }

                _ = sweep_tick.tick() => {
                    self.sweep().await;
                }
            }
        }

        self.drain().await;
        info!("Publisher stopped");
    }

    /// Assign a sequence number and hand the batch to the output. Returns
    /// false when the output is gone.
    async fn dispatch(&mut self, events: Vec<Event>) -> bool {
        self.seq += 1;
        let events = Arc::new(events);
        let (handle, status) = AckHandle::new(self.seq, self.notify_tx.clone());
        let batch = Batch {
            seq: self.seq,
            events: events.clone(),
        };

        debug!(seq = self.seq, events = events.len(), "Publishing batch");
        if self.output_tx.send((batch, handle)).await.is_err() {
            warn!("Output channel closed, dropping batch");
            return false;
        }

        self.in_flight.push_back(InFlight {
            seq: self.seq,
            status,
            events,
        });
        true
    }

    /// Pop resolved batches off the head of the in-flight queue and commit
    /// their offsets. A pending head stops the sweep, preserving submission
    /// order.
    async fn sweep(&mut self) {
        while let Some(head) = self.in_flight.front() {
            let status = load_status(&head.status);
            if !status.is_terminal() {
                return;
            }
            let head = match self.in_flight.pop_front() {
                Some(head) => head,
                None => return,
            };

            match status {
                BatchStatus::Success => {
                    self.metrics.batches_published.inc();
                    if self.draining {
                        debug!(seq = head.seq, "Draining, not committing batch");
                        continue;
                    }
                    let events = Arc::try_unwrap(head.events)
                        .unwrap_or_else(|shared| shared.as_ref().clone());
                    if self
                        .registrar_tx
                        .send(RegistryUpdate::Published(events))
                        .await
                        .is_err()
                    {
                        debug!("Registrar channel closed, stopping offset commits");
                        self.draining = true;
                    }
                }
                BatchStatus::Failed | BatchStatus::Canceled => {
                    self.metrics.batches_failed.inc();
                    if !self.draining {
                        warn!(seq = head.seq, ?status,
                            "Batch not delivered, offsets frozen until restart");
                        self.draining = true;
                    }
                }
                BatchStatus::Pending => {}
            }
        }
    }

    /// Sync mode: block until every dispatched batch has resolved. Returns
    /// false when completions can no longer arrive.
    async fn wait_in_flight(&mut self) -> bool {
        while !self.in_flight.is_empty() {
            select! {
                completed = self.notify_rx.next() => {
                    if completed.is_none() {
                        return false;
                    }
                    self.sweep().await;
                }
                _ = tokio::time::sleep(SWEEP_INTERVAL) => {
                    self.sweep().await;
                }
            }
        }
        true
    }

    /// Wait out the remaining in-flight batches, bounded by a deadline.
    /// Whatever has not resolved by then stays uncommitted; the registry
    /// keeps the pre-batch offsets and those bytes ship again on restart.
    async fn drain(&mut self) {
        self.sweep().await;
        if self.in_flight.is_empty() {
            return;
        }

        debug!(batches = self.in_flight.len(), "Draining in-flight batches");
        let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
        while !self.in_flight.is_empty() {
            let wait = tokio::time::timeout_at(deadline, self.notify_rx.next());
            match wait.await {
                Ok(Some(_)) => self.sweep().await,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        unresolved = self.in_flight.len(),
                        "Drain deadline reached with unresolved batches"
                    );
                    break;
                }
            }
        }
        self.sweep().await;
    }
}
