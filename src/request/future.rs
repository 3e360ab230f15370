//! Single-assignment completion cell for one request.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        atomic::{AtomicU8, Ordering},
    },
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    sync::oneshot::{self, error::TryRecvError},
    time::Instant,
};
use tracing::trace;

use super::{CancelReason, REQUEST_GRACE_MARGIN, RequestOptions, RequestOutcome};
use crate::{error::RequestError, message::Message};

const PENDING: u8 = 0;
const FULFILLED: u8 = 1;
const CANCELLED_CLOSING: u8 = 2;
const CANCELLED_TIMED_OUT: u8 = 3;
const CANCELLED_NO_RESPONDERS: u8 = 4;

/// Registry-side half of an outstanding request.
///
/// Every resolution path calls one of the `complete`/`cancel_*` methods. Each
/// first claims the state cell with a compare-and-swap from `PENDING`; only
/// the claimant sends an outcome, everyone else gets `false` back.
pub(crate) struct RequestFuture {
    key: String,
    options: RequestOptions,
    created_at: Instant,
    expires_at: Instant,
    state: AtomicU8,
    slot: Mutex<Option<oneshot::Sender<RequestOutcome>>>,
}

impl RequestFuture {
    /// Create a request expiring after its timeout (or `default_timeout`) plus
    /// [`REQUEST_GRACE_MARGIN`], together with the caller's handle.
    pub(crate) fn new(
        key: impl Into<String>,
        options: RequestOptions,
        default_timeout: Duration,
    ) -> (Arc<Self>, RequestHandle) {
        let created_at = Instant::now();
        let timeout = options.timeout.unwrap_or(default_timeout);
        let (tx, rx) = oneshot::channel();
        let future = Arc::new(Self {
            key: key.into(),
            options,
            created_at,
            expires_at: created_at + timeout + REQUEST_GRACE_MARGIN,
            state: AtomicU8::new(PENDING),
            slot: Mutex::new(Some(tx)),
        });
        let handle = RequestHandle {
            future: Arc::clone(&future),
            receiver: rx,
            settled: None,
        };
        (future, handle)
    }

    pub(crate) fn key(&self) -> &str { &self.key }

    pub(crate) fn expires_at(&self) -> Instant { self.expires_at }

    pub(crate) fn has_exceeded_timeout(&self, now: Instant) -> bool { now >= self.expires_at }

    pub(crate) fn is_done(&self) -> bool { self.state.load(Ordering::Acquire) != PENDING }

    pub(crate) fn complete(&self, message: Message) -> bool {
        self.resolve(FULFILLED, RequestOutcome::Fulfilled(message))
    }

    pub(crate) fn cancel_closing(&self) -> bool {
        self.resolve(
            CANCELLED_CLOSING,
            RequestOutcome::Cancelled(CancelReason::Closing),
        )
    }

    pub(crate) fn cancel_timed_out(&self) -> bool {
        self.resolve(
            CANCELLED_TIMED_OUT,
            RequestOutcome::Cancelled(CancelReason::TimedOut),
        )
    }

    pub(crate) fn cancel_no_responders(&self) -> bool {
        self.resolve(
            CANCELLED_NO_RESPONDERS,
            RequestOutcome::Cancelled(CancelReason::NoResponders),
        )
    }

    fn resolve(&self, terminal: u8, outcome: RequestOutcome) -> bool {
        if self
            .state
            .compare_exchange(PENDING, terminal, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            // The caller may have dropped its handle; the outcome is still final.
            let _ = tx.send(outcome);
        }
        trace!(
            correlation_key = %self.key,
            elapsed = ?self.created_at.elapsed(),
            "request resolved"
        );
        true
    }

    fn state(&self) -> u8 { self.state.load(Ordering::Acquire) }
}

/// Caller-side half of an outstanding request.
///
/// Await it to obtain the reply. The result is shaped by the request's
/// [`crate::CancelAction`]: a cancelled request either fails, fails with the
/// specific reason, or succeeds with `None`.
#[must_use = "a request handle does nothing unless awaited or polled"]
pub struct RequestHandle {
    future: Arc<RequestFuture>,
    receiver: oneshot::Receiver<RequestOutcome>,
    settled: Option<RequestOutcome>,
}

impl RequestHandle {
    /// The reply subject identifying this request.
    #[must_use]
    pub fn correlation_key(&self) -> &str { self.future.key() }

    #[must_use]
    pub fn options(&self) -> RequestOptions { self.future.options }

    /// The instant after which the expiry sweep cancels the request.
    #[must_use]
    pub fn expires_at(&self) -> Instant { self.future.expires_at() }

    #[must_use]
    pub fn is_done(&self) -> bool { self.future.is_done() }

    #[must_use]
    pub fn is_fulfilled(&self) -> bool { self.future.state() == FULFILLED }

    #[must_use]
    pub fn was_cancelled_closing(&self) -> bool { self.future.state() == CANCELLED_CLOSING }

    #[must_use]
    pub fn was_cancelled_timed_out(&self) -> bool { self.future.state() == CANCELLED_TIMED_OUT }

    /// Take the result without waiting.
    ///
    /// Returns `None` while the request is still pending. Once resolved, every
    /// call and a later `.await` yield the same result.
    pub fn try_result(&mut self) -> Option<Result<Option<Message>, RequestError>> {
        if self.settled.is_none() {
            let outcome = match self.receiver.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => return None,
                Err(TryRecvError::Closed) => RequestOutcome::Cancelled(CancelReason::Closing),
            };
            self.settled = Some(outcome);
        }
        self.settled
            .clone()
            .map(|outcome| self.future.options.settle(outcome))
    }
}

impl Future for RequestHandle {
    type Output = Result<Option<Message>, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(outcome) = self.settled.clone() {
            return Poll::Ready(self.future.options.settle(outcome));
        }
        let outcome = match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(outcome)) => outcome,
            // The sender lives inside `self.future`, so it cannot be dropped
            // unresolved while this handle exists.
            Poll::Ready(Err(_)) => RequestOutcome::Cancelled(CancelReason::Closing),
        };
        self.settled = Some(outcome.clone());
        Poll::Ready(self.future.options.settle(outcome))
    }
}

impl std::fmt::Debug for RequestHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandle")
            .field("correlation_key", &self.future.key)
            .field("done", &self.future.is_done())
            .finish_non_exhaustive()
    }
}
