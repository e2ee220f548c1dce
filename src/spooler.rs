// SPDX-License-Identifier: Apache-2.0

//! Spooler: turns the event stream into batches.
//!
//! Collects events from all harvesters and flushes when the spool reaches
//! capacity or when the idle timeout elapses, whichever comes first. The
//! timer resets on every flush, so a steady trickle still ships with
//! bounded latency. When the event channel closes the spooler flushes the
//! remainder and exits.

use std::time::Duration;
use tokio::select;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use crate::event::Event;

pub struct Spooler {
    spool_size: usize,
    idle_timeout: Duration,
    rx: BoundedReceiver<Event>,
    tx: BoundedSender<Vec<Event>>,
}

impl Spooler {
    pub fn new(
        spool_size: usize,
        idle_timeout: Duration,
        rx: BoundedReceiver<Event>,
        tx: BoundedSender<Vec<Event>>,
    ) -> Self {
        Self {
            spool_size,
            idle_timeout,
            rx,
            tx,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            spool_size = self.spool_size,
            idle_timeout = ?self.idle_timeout,
            "Spooler started"
        );

        let mut spool: Vec<Event> = Vec::with_capacity(self.spool_size);
        let mut flush_deadline = Instant::now() + self.idle_timeout;

        loop {
            select! {
                biased;

                event = self.rx.next() => {
                    match event {
                        Some(event) => {
                            spool.push(event);
                            if spool.len() >= self.spool_size
                                && !self.flush(&mut spool, &mut flush_deadline).await
                            {
                                return;
                            }
                        }
                        None => {
                            debug!("Event channel closed, draining spool");
                            break;
                        }
                    }
                }

                _ = sleep_until(flush_deadline) => {
                    if !self.flush(&mut spool, &mut flush_deadline).await {
                        return;
                    }
                }

                _ = cancel.cancelled() => {
                    debug!("Spooler cancelled");
                    break;
                }
            }
        }

        // Take everything still queued before the final flush.
        while let Some(event) = self.rx.try_recv() {
            spool.push(event);
        }
        let mut deadline = Instant::now();
        self.flush(&mut spool, &mut deadline).await;
        info!("Spooler stopped");
    }

    /// Flush the spool downstream. An empty spool only resets the timer.
    /// Returns false once the publisher is gone.
    async fn flush(&self, spool: &mut Vec<Event>, deadline: &mut Instant) -> bool {
        *deadline = Instant::now() + self.idle_timeout;
        if spool.is_empty() {
            return true;
        }

        let batch = std::mem::replace(spool, Vec::with_capacity(self.spool_size));
        debug!(events = batch.len(), "Flushing spool");
        if self.tx.send(batch).await.is_err() {
            debug!("Publisher channel closed");
            return false;
        }
        true
    }
}
