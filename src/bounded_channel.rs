// SPDX-License-Identifier: Apache-2.0

//! Bounded channels used for every cross-component handoff in the pipeline.
//!
//! A full downstream queue blocks the upstream producer; this is the only
//! flow control mechanism in the agent.

use flume::{Receiver, Sender};
use std::fmt;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

impl<T> BoundedSender<T> {
    /// Async send, waiting for capacity. Fails only when the receiver is gone.
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Non-waiting send from sync contexts such as ack callbacks. Drops the
    /// item when the channel is full; callers must tolerate lost wakeups.
    pub fn try_send(&self, item: T) -> Result<(), SendError> {
        match self.tx.try_send(item) {
            Ok(()) | Err(flume::TrySendError::Full(_)) => Ok(()),
            Err(flume::TrySendError::Disconnected(_)) => Err(SendError::Disconnected),
        }
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Receive the next item, or `None` once all senders are dropped and the
    /// channel is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{bounded, SendError};
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn send_and_receive() {
        let (tx, mut rx) = bounded(2);

        let mut send = spawn(async { tx.send(7).await });
        let mut recv = spawn(async { rx.next().await });

        assert_pending!(recv.poll());
        assert_ok!(assert_ready!(send.poll()));
        assert!(recv.is_woken());
        assert_eq!(Some(7), assert_ready!(recv.poll()));

        drop(send);
        drop(recv);

        let mut recv = spawn(async { rx.next().await });
        drop(tx);
        assert_eq!(None, assert_ready!(recv.poll()));
    }

    #[tokio::test]
    async fn full_channel_applies_backpressure() {
        let (tx, mut rx) = bounded(1);

        let mut first = spawn(async { tx.send(1).await });
        assert_ok!(assert_ready!(first.poll()));
        drop(first);

        let mut second = spawn(async { tx.send(2).await });
        assert_pending!(second.poll());

        assert_eq!(Some(1), rx.next().await);
        assert_ok!(assert_ready!(second.poll()));
    }

    #[tokio::test]
    async fn send_fails_after_receiver_drop() {
        let (tx, rx) = bounded::<u32>(1);
        drop(rx);
        assert_eq!(Err(SendError::Disconnected), tx.send(3).await);
        assert_eq!(Err(SendError::Disconnected), tx.try_send(4));
    }

    #[test]
    fn try_send_drops_on_full() {
        let (tx, rx) = bounded(1);
        assert_eq!(Ok(()), tx.try_send(1));
        // Full channel: item is dropped, not an error.
        assert_eq!(Ok(()), tx.try_send(2));
        assert_eq!(Some(1), rx.try_recv());
        assert_eq!(None, rx.try_recv());
    }
}
