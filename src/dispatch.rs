//! Per-subscription dispatch queues.
//!
//! A dispatch queue is the only hand-off between the inbound read path and a
//! subscription's delivery worker. Enqueueing never waits: the queue is
//! unbounded so the read path can push and move on. Entries come out in the
//! order they went in.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::Delivery;

/// Returned when the receiving side of a dispatch queue has been dropped.
///
/// The rejected entry is handed back to the caller.
#[derive(Debug, Error)]
#[error("dispatch queue closed")]
pub struct DispatchClosed(pub Delivery);

/// Create a connected sender/receiver pair.
#[must_use]
pub fn dispatch_queue() -> (DispatchSender, DispatchReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let pending = Arc::new(AtomicUsize::new(0));
    (
        DispatchSender {
            tx,
            pending: Arc::clone(&pending),
        },
        DispatchReceiver { rx, pending },
    )
}

/// Producer side, cloned into whatever routes inbound frames.
#[derive(Clone, Debug)]
pub struct DispatchSender {
    tx: mpsc::UnboundedSender<Delivery>,
    pending: Arc<AtomicUsize>,
}

impl DispatchSender {
    /// Append `delivery` to the queue without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchClosed`] if the receiver has been dropped or closed.
    pub fn enqueue(&self, delivery: Delivery) -> Result<(), DispatchClosed> {
        // Count first so a fast consumer never observes an underflow.
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.tx.send(delivery).map_err(|mpsc::error::SendError(d)| {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            DispatchClosed(d)
        })
    }

    /// Number of entries enqueued but not yet taken by the worker.
    #[must_use]
    pub fn pending(&self) -> usize { self.pending.load(Ordering::Acquire) }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

/// Consumer side, owned by the delivery worker.
#[derive(Debug)]
pub struct DispatchReceiver {
    rx: mpsc::UnboundedReceiver<Delivery>,
    pending: Arc<AtomicUsize>,
}

impl DispatchReceiver {
    /// Wait for the next entry.
    ///
    /// Returns `None` once every sender is gone and the queue is drained.
    /// Cancel-safe: dropping the future before it completes loses nothing.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let delivery = self.rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(delivery)
    }

    /// Take the next entry if one is immediately available.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        let delivery = self.rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::AcqRel);
        Some(delivery)
    }

    /// Refuse further entries; already queued entries can still be received.
    pub fn close(&mut self) { self.rx.close(); }
}
