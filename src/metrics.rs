//! Metric helpers for `streamlink`.
//!
//! Names and thin wrappers over the [`metrics`](https://docs.rs/metrics)
//! crate. With the `metrics` feature disabled every helper compiles to a
//! no-op so call sites need no feature gates of their own.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Gauge tracking live connections.
pub const CONNECTIONS_ACTIVE: &str = "streamlink_connections_active";
/// Counter of messages handed to a subscription handler.
pub const MESSAGES_DELIVERED: &str = "streamlink_messages_delivered_total";
/// Counter of inbound messages discarded without reaching a handler.
pub const MESSAGES_DROPPED: &str = "streamlink_messages_dropped_total";
/// Counter of handler invocations that returned an error or panicked.
pub const HANDLER_FAILURES: &str = "streamlink_handler_failures_total";
/// Gauge tracking requests waiting in the pending registry.
pub const REQUESTS_OUTSTANDING: &str = "streamlink_requests_outstanding";
/// Counter of requests resolved, labelled by outcome.
pub const REQUESTS_RESOLVED: &str = "streamlink_requests_resolved_total";

/// Why an inbound message never reached a handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// No live subscription matched the message's sid.
    NoSubscription,
    /// The subscription had no handler registered yet.
    NoHandler,
    /// The subscription's dispatch queue no longer accepts entries.
    QueueClosed,
}

impl DropReason {
    #[cfg_attr(not(feature = "metrics"), expect(dead_code, reason = "label only recorded with metrics"))]
    fn as_str(self) -> &'static str {
        match self {
            Self::NoSubscription => "no_subscription",
            Self::NoHandler => "no_handler",
            Self::QueueClosed => "queue_closed",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a message handed to a handler.
pub fn inc_delivered() {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_DELIVERED).increment(1);
}

/// Record a discarded inbound message.
pub fn inc_dropped(reason: DropReason) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_DROPPED, "reason" => reason.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}

/// Record a failed handler invocation; `kind` is `"error"` or `"panic"`.
pub fn inc_handler_failures(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(HANDLER_FAILURES, "kind" => kind).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record a request entering the pending registry.
pub fn inc_requests_outstanding() {
    #[cfg(feature = "metrics")]
    gauge!(REQUESTS_OUTSTANDING).increment(1.0);
}

/// Record a request leaving the pending registry.
pub fn dec_requests_outstanding() {
    #[cfg(feature = "metrics")]
    gauge!(REQUESTS_OUTSTANDING).decrement(1.0);
}

/// Record a request resolution with its outcome label.
pub fn inc_requests_resolved(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(REQUESTS_RESOLVED, "outcome" => outcome).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}
