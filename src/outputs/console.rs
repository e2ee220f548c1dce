// SPDX-License-Identifier: Apache-2.0

//! Console output: one JSON document per event, newline delimited.
//!
//! A batch is acknowledged only after every line has been written and
//! flushed. Write failures fail the whole batch so its offsets are never
//! committed.

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::bounded_channel::BoundedReceiver;
use crate::publisher::batch::{AckHandle, Batch};

pub struct ConsoleOutput<W> {
    rx: BoundedReceiver<(Batch, AckHandle)>,
    writer: W,
}

impl ConsoleOutput<tokio::io::Stdout> {
    pub fn stdout(rx: BoundedReceiver<(Batch, AckHandle)>) -> Self {
        Self::with_writer(rx, tokio::io::stdout())
    }
}

impl<W: AsyncWrite + Unpin> ConsoleOutput<W> {
    pub fn with_writer(rx: BoundedReceiver<(Batch, AckHandle)>, writer: W) -> Self {
        Self { rx, writer }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            select! {
                item = self.rx.next() => {
                    match item {
                        Some((batch, ack)) => self.write_batch(batch, ack).await,
                        None => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        // Publisher may have batches queued behind the cancellation; they
        // were dispatched, so they still get written and acknowledged.
        while let Some((batch, ack)) = self.rx.try_recv() {
            self.write_batch(batch, ack).await;
        }
        debug!("Exiting console output");
    }

    async fn write_batch(&mut self, batch: Batch, ack: AckHandle) {
        for event in batch.events.iter() {
            let line = match serde_json::to_vec(event) {
                Ok(line) => line,
                Err(e) => {
                    error!(seq = batch.seq, error = %e, "Failed to encode event");
                    ack.fail();
                    return;
                }
            };
            let write = async {
                self.writer.write_all(&line).await?;
                self.writer.write_all(b"\n").await
            };
            if let Err(e) = write.await {
                error!(seq = batch.seq, error = %e, "Failed to write event");
                ack.fail();
                return;
            }
        }
        if let Err(e) = self.writer.flush().await {
            error!(seq = batch.seq, error = %e, "Failed to flush output");
            ack.fail();
            return;
        }
        ack.success();
    }
}
