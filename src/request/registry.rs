//! Concurrent registry of outstanding requests keyed by correlation key.
//!
//! The reply path, the close path and the expiry sweep all mutate the map
//! independently. Every removal goes through `DashMap`'s per-shard locking and
//! every resolution through the future's state cell, so no path needs an
//! external lock and none of them call back into the transport.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, trace};

use super::{RequestFuture, RequestHandle, RequestOptions};
use crate::{message::Message, metrics};

/// Pending request/reply exchanges for one connection.
#[derive(Default)]
pub struct PendingRequests {
    entries: DashMap<String, Arc<RequestFuture>>,
    registered: Notify,
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Create a request under `key` and return the caller's handle.
    ///
    /// Keys are expected to be unique; registering an existing key replaces
    /// the old entry, which is then cancelled as closing.
    pub(crate) fn register(
        &self,
        key: String,
        options: RequestOptions,
        default_timeout: Duration,
    ) -> RequestHandle {
        let (future, handle) = RequestFuture::new(key.clone(), options, default_timeout);
        metrics::inc_requests_outstanding();
        if let Some(previous) = self.entries.insert(key, future) {
            metrics::dec_requests_outstanding();
            if previous.cancel_closing() {
                metrics::inc_requests_resolved("cancelled_closing");
            }
        }
        self.registered.notify_one();
        handle
    }

    /// Remove `key` and cancel it as closing, if it is still present.
    pub(crate) fn abandon(&self, key: &str) -> bool {
        let Some((_, future)) = self.entries.remove(key) else {
            return false;
        };
        metrics::dec_requests_outstanding();
        let cancelled = future.cancel_closing();
        if cancelled {
            metrics::inc_requests_resolved("cancelled_closing");
        }
        cancelled
    }

    /// Resolve the request waiting on `key` with `message`.
    ///
    /// A "no responders" status reply cancels the request instead of
    /// fulfilling it. Returns `false` when no request is waiting on `key`, in
    /// which case the reply is dropped.
    pub fn resolve_reply(&self, key: &str, message: Message) -> bool {
        let Some((_, future)) = self.entries.remove(key) else {
            trace!(correlation_key = key, "reply without pending request dropped");
            return false;
        };
        metrics::dec_requests_outstanding();
        let (resolved, outcome) = if message.is_no_responders() {
            (future.cancel_no_responders(), "no_responders")
        } else {
            (future.complete(message), "fulfilled")
        };
        if resolved {
            metrics::inc_requests_resolved(outcome);
        }
        resolved
    }

    /// Cancel every pending request as closing and empty the registry.
    ///
    /// Returns how many requests this call resolved. Requests that another
    /// path resolved first are removed but not counted.
    pub fn cancel_all(&self) -> usize {
        let keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        let cancelled = keys.iter().filter(|key| self.abandon(key)).count();
        if cancelled > 0 {
            debug!(cancelled, "pending requests cancelled on close");
        }
        cancelled
    }

    /// Cancel every request whose deadline is at or before `now`.
    ///
    /// Entries already resolved elsewhere are pruned as well. Returns how
    /// many requests this pass timed out.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut expired = 0;
        self.entries.retain(|key, future| {
            if future.has_exceeded_timeout(now) {
                metrics::dec_requests_outstanding();
                if future.cancel_timed_out() {
                    trace!(correlation_key = %key, "request expired");
                    metrics::inc_requests_resolved("cancelled_timed_out");
                    expired += 1;
                }
                false
            } else if future.is_done() {
                metrics::dec_requests_outstanding();
                false
            } else {
                true
            }
        });
        expired
    }

    /// The earliest deadline among pending requests.
    #[must_use]
    pub fn next_expiry(&self) -> Option<Instant> {
        self.entries.iter().map(|e| e.value().expires_at()).min()
    }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool { self.entries.contains_key(key) }

    /// Wait until a request is registered after the last wait returned.
    pub(crate) async fn registered(&self) { self.registered.notified().await; }
}
