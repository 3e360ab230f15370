//! Boundary between the delivery engine and the protocol writer.
//!
//! The engine never writes to a socket. Every control-plane or publish
//! operation is expressed as an [`OutboundFrame`] and handed to a
//! [`Transport`], which only has to enqueue it. Framing, TCP/TLS and
//! reconnection all live behind this trait.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::subscription::Sid;

/// Errors returned when an outbound frame cannot be enqueued.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The outbound queue was at capacity.
    #[error("outbound queue full")]
    QueueFull,
    /// The writer side of the transport has gone away.
    #[error("transport closed")]
    Closed,
}

/// One protocol operation waiting to be written to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Register interest in `subject` under `sid`.
    Subscribe {
        sid: Sid,
        subject: String,
        queue_group: Option<String>,
    },
    /// Withdraw interest for `sid`, optionally after `max` further messages.
    Unsubscribe { sid: Sid, max: Option<u64> },
    /// Publish `payload` on `subject`, optionally asking for a reply.
    Publish {
        subject: String,
        reply_to: Option<String>,
        payload: Bytes,
    },
}

/// A sink that accepts outbound frames without blocking the caller.
///
/// Implementations are shared between the application, every subscription
/// worker and the inbound read path, so `send` must return promptly and never
/// wait on network I/O.
pub trait Transport: Send + Sync + 'static {
    /// Enqueue `frame` for writing.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] if the frame cannot be accepted.
    fn send(&self, frame: OutboundFrame) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> { (**self).send(frame) }
}
