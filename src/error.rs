//! Error types surfaced by subscriptions, requests and connections.
//!
//! Expected failure paths either resolve into a request outcome or surface
//! synchronously to the caller; nothing here is ever raised on the inbound
//! read path.

use std::time::Duration;

use thiserror::Error;

use crate::{request::CancelReason, subscription::Sid, transport::TransportError};

/// Errors returned by subscription operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// The subscription was closed, unsubscribed or exhausted its limit.
    #[error("subscription {sid} is no longer valid")]
    InvalidState { sid: Sid },
    /// A reply was attempted for a message that carries no reply subject.
    #[error("message on {subject} has no reply subject")]
    NoReplySubject { subject: String },
    /// No connection was attached to the delivery.
    #[error("delivery is not attached to a connection")]
    Detached,
    /// The control frame could not be enqueued.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Caller-visible failures of a request/reply exchange.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// The request was cancelled and the caller asked for a plain cancellation.
    #[error("request cancelled: {0}")]
    Cancelled(CancelReason),
    /// The owning connection closed before a reply arrived.
    #[error("request cancelled, connection closing")]
    ConnectionClosing,
    /// No reply was registered before the request expired.
    #[error("request timed out, response not registered in time")]
    TimedOut,
    /// The server reported that nobody is subscribed to the request subject.
    #[error("no responders available for request")]
    NoResponders,
    /// The connection was already closed when the request was made.
    #[error("connection is closed")]
    ConnectionClosed,
    /// The request subject is empty or contains whitespace.
    #[error("invalid request subject {0:?}")]
    InvalidSubject(String),
    /// The request frame could not be enqueued.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors returned when building or using a [`crate::Connection`].
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The subject is empty or contains whitespace.
    #[error("invalid subject {0:?}")]
    InvalidSubject(String),
    /// The connection has been closed.
    #[error("connection is closed")]
    Closed,
    /// A connection must be built from within a tokio runtime.
    #[error("no tokio runtime available to host connection workers")]
    NoRuntime,
    /// The expiry sweep needs a non-zero period.
    #[error("invalid sweep interval {0:?}; must be non-zero")]
    InvalidSweepInterval(Duration),
    /// Starting a freshly built subscription failed.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    /// A publish frame could not be enqueued.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
