// SPDX-License-Identifier: Apache-2.0

//! Blackhole output: acknowledges and discards every batch. Useful for
//! measuring pipeline throughput without sink overhead.

use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bounded_channel::BoundedReceiver;
use crate::publisher::batch::{AckHandle, Batch};

pub struct BlackholeOutput {
    rx: BoundedReceiver<(Batch, AckHandle)>,
}

impl BlackholeOutput {
    pub fn new(rx: BoundedReceiver<(Batch, AckHandle)>) -> Self {
        Self { rx }
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            select! {
                item = self.rx.next() => {
                    match item {
                        Some((_, ack)) => ack.success(),
                        None => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        while let Some((_, ack)) = self.rx.try_recv() {
            ack.success();
        }
        debug!("Exiting blackhole output");
    }
}
