//! Bounded in-memory channel implementing [`Transport`].
//!
//! The connection pushes frames into an [`OutboundSender`]; whatever writes to
//! the server (or, in the demo and tests, plays the server) drains the paired
//! [`OutboundReceiver`] in order.

use tokio::sync::mpsc::{self, error::TrySendError};

use crate::transport::{OutboundFrame, Transport, TransportError};

/// Capacity used by the demo binary and the integration tests.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Create a bounded outbound channel holding up to `capacity` frames.
///
/// A `capacity` of zero is raised to one.
///
/// # Examples
///
/// ```
/// use streamlink::{OutboundFrame, Transport, outbound};
///
/// let (sender, mut receiver) = outbound::channel(8);
/// sender
///     .send(OutboundFrame::Publish {
///         subject: "greet".into(),
///         reply_to: None,
///         payload: "hi".into(),
///     })
///     .expect("room in the channel");
/// assert!(receiver.try_recv().is_some());
/// ```
#[must_use]
pub fn channel(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (OutboundSender { tx }, OutboundReceiver { rx })
}

/// Producer side handed to [`crate::Connection::builder`]. Never waits.
#[derive(Clone, Debug)]
pub struct OutboundSender {
    tx: mpsc::Sender<OutboundFrame>,
}

impl OutboundSender {
    /// Whether the receiving side has gone away.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.tx.is_closed() }
}

impl Transport for OutboundSender {
    fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.tx.try_send(frame).map_err(|error| match error {
            TrySendError::Full(_) => TransportError::QueueFull,
            TrySendError::Closed(_) => TransportError::Closed,
        })
    }
}

/// Receiving side, owned by the writer.
#[derive(Debug)]
pub struct OutboundReceiver {
    rx: mpsc::Receiver<OutboundFrame>,
}

impl OutboundReceiver {
    /// Next frame in send order; `None` once every sender is gone and the
    /// channel is drained.
    pub async fn recv(&mut self) -> Option<OutboundFrame> { self.rx.recv().await }

    pub fn try_recv(&mut self) -> Option<OutboundFrame> { self.rx.try_recv().ok() }

    /// Stop accepting frames; queued frames can still be received.
    pub fn close(&mut self) { self.rx.close(); }
}
