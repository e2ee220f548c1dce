// SPDX-License-Identifier: Apache-2.0

//! Batch and acknowledgement types shared between the publisher and the
//! outputs.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::bounded_channel::BoundedSender;
use crate::event::Event;

const PENDING: u8 = 0;
const SUCCESS: u8 = 1;
const FAILED: u8 = 2;
const CANCELED: u8 = 3;

/// Terminal state of a batch delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Pending,
    Success,
    Failed,
    Canceled,
}

impl BatchStatus {
    fn from_raw(raw: u8) -> Self {
        match raw {
            SUCCESS => BatchStatus::Success,
            FAILED => BatchStatus::Failed,
            CANCELED => BatchStatus::Canceled,
            _ => BatchStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != BatchStatus::Pending
    }
}

/// A sequenced batch of events handed to an output.
#[derive(Clone)]
pub struct Batch {
    pub seq: u64,
    pub events: Arc<Vec<Event>>,
}

/// One-shot acknowledgement for a single batch.
///
/// The first terminal transition wins; later calls are no-ops. Dropping an
/// unresolved handle counts as cancellation so a crashed output can never
/// leave the publisher waiting forever.
pub struct AckHandle {
    seq: u64,
    status: Arc<AtomicU8>,
    notify: BoundedSender<u64>,
}

impl AckHandle {
    pub(crate) fn new(seq: u64, notify: BoundedSender<u64>) -> (Self, Arc<AtomicU8>) {
        let status = Arc::new(AtomicU8::new(PENDING));
        (
            Self {
                seq,
                status: status.clone(),
                notify,
            },
            status,
        )
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn success(&self) {
        self.complete(SUCCESS);
    }

    pub fn fail(&self) {
        self.complete(FAILED);
    }

    pub fn cancel(&self) {
        self.complete(CANCELED);
    }

    fn complete(&self, terminal: u8) {
        if self
            .status
            .compare_exchange(PENDING, terminal, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            // Lost wakeups are recovered by the publisher's periodic sweep.
            let _ = self.notify.try_send(self.seq);
        }
    }
}

impl Drop for AckHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub(crate) fn load_status(status: &AtomicU8) -> BatchStatus {
    BatchStatus::from_raw(status.load(Ordering::Acquire))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::bounded;

    #[test]
    fn first_terminal_transition_wins() {
        let (tx, rx) = bounded(4);
        let (handle, status) = AckHandle::new(1, tx);

        assert_eq!(BatchStatus::Pending, load_status(&status));

        handle.success();
        handle.fail();
        assert_eq!(BatchStatus::Success, load_status(&status));
        assert_eq!(Some(1), rx.try_recv());
        // Second transition did not notify.
        assert_eq!(None, rx.try_recv());
    }

    #[test]
    fn dropped_handle_cancels() {
        let (tx, rx) = bounded(4);
        let (handle, status) = AckHandle::new(9, tx);
        drop(handle);

        assert_eq!(BatchStatus::Canceled, load_status(&status));
        assert_eq!(Some(9), rx.try_recv());
    }

    #[test]
    fn drop_after_ack_is_a_noop() {
        let (tx, rx) = bounded(4);
        let (handle, status) = AckHandle::new(2, tx);
        handle.success();
        drop(handle);

        assert_eq!(BatchStatus::Success, load_status(&status));
        assert_eq!(Some(2), rx.try_recv());
        assert_eq!(None, rx.try_recv());
    }
}
