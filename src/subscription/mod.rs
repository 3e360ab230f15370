//! Asynchronous subscriptions and their delivery workers.
//!
//! An [`AsyncSubscription`] owns a dispatch queue fed by the connection's read
//! path and a worker task that drains it into the registered handler. The
//! worker runs on the connection's runtime and is tracked by its task tracker,
//! so closing the connection stops every subscription worker.

use std::{
    fmt,
    future::Future,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use futures::{FutureExt, future::BoxFuture};
use tokio::runtime::Handle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::debug;

use crate::{
    dispatch::{DispatchReceiver, DispatchSender, dispatch_queue},
    error::SubscriptionError,
    message::{Delivery, Message},
    metrics::{self, DropReason},
    options::SubscribeOptions,
    transport::{OutboundFrame, Transport},
};

mod failure;
mod table;
mod worker;

pub use failure::{HandlerFailure, HandlerFailureHook};
pub(crate) use table::SubscriptionTable;

/// Identifier the client assigns to a subscription and the server echoes on
/// every message delivered for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid(u64);

impl From<u64> for Sid {
    fn from(value: u64) -> Self { Self(value) }
}

impl Sid {
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// Error a message handler may return; it is logged and otherwise ignored.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result of one handler invocation.
pub type HandlerResult = Result<(), HandlerError>;

/// Callback invoked for each message delivered to a subscription.
pub type MessageHandler = Arc<dyn Fn(Delivery) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Wrap an async closure as a [`MessageHandler`].
///
/// # Examples
///
/// ```
/// use streamlink::{Delivery, handler_fn};
///
/// let handler = handler_fn(|delivery: Delivery| async move {
///     println!("{:?}", delivery.message().payload());
///     Ok(())
/// });
/// # drop(handler);
/// ```
pub fn handler_fn<F, Fut>(f: F) -> MessageHandler
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |delivery| f(delivery).boxed())
}

/// Runtime resources shared by every worker a connection spawns.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) runtime: Handle,
    pub(crate) tracker: TaskTracker,
    pub(crate) shutdown: CancellationToken,
    pub(crate) on_failure: Option<HandlerFailureHook>,
}

/// Everything needed to create a subscription.
pub(crate) struct SubscriptionParts {
    pub(crate) sid: Sid,
    pub(crate) subject: String,
    pub(crate) queue_group: Option<String>,
    pub(crate) options: Option<SubscribeOptions>,
    pub(crate) handler: Option<MessageHandler>,
    pub(crate) max: u64,
    pub(crate) connection: Arc<dyn Transport>,
    pub(crate) table: Weak<SubscriptionTable>,
    pub(crate) context: WorkerContext,
}

struct SubscriptionState {
    handler: Option<MessageHandler>,
    connection: Option<Arc<dyn Transport>>,
    max: u64,
}

/// Values the delivery loop reads together before handling one message.
pub(super) struct Snapshot {
    pub(super) handler: Option<MessageHandler>,
    pub(super) attached: bool,
    pub(super) max: u64,
}

/// State shared between the application's handles, the connection table and
/// the delivery worker.
pub(crate) struct SubscriptionShared {
    sid: Sid,
    subject: String,
    queue_group: Option<String>,
    options: Option<SubscribeOptions>,
    state: Mutex<SubscriptionState>,
    delivered: AtomicU64,
    valid: AtomicBool,
    sender: DispatchSender,
    receiver: Arc<tokio::sync::Mutex<DispatchReceiver>>,
    worker: Mutex<Option<CancellationToken>>,
    table: Weak<SubscriptionTable>,
    context: WorkerContext,
}

impl SubscriptionShared {
    pub(crate) fn new(parts: SubscriptionParts) -> Arc<Self> {
        let (sender, receiver) = dispatch_queue();
        Arc::new(Self {
            sid: parts.sid,
            subject: parts.subject,
            queue_group: parts.queue_group,
            options: parts.options,
            state: Mutex::new(SubscriptionState {
                handler: parts.handler,
                connection: Some(parts.connection),
                max: parts.max,
            }),
            delivered: AtomicU64::new(0),
            valid: AtomicBool::new(true),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            worker: Mutex::new(None),
            table: parts.table,
            context: parts.context,
        })
    }

    pub(crate) fn sid(&self) -> Sid { self.sid }

    pub(crate) fn subject(&self) -> &str { &self.subject }

    pub(super) fn receiver(&self) -> &Arc<tokio::sync::Mutex<DispatchReceiver>> { &self.receiver }

    pub(super) fn failure_hook(&self) -> Option<&HandlerFailureHook> { self.context.on_failure.as_ref() }

    fn state(&self) -> MutexGuard<'_, SubscriptionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn snapshot(&self) -> Snapshot {
        let state = self.state();
        Snapshot {
            handler: state.handler.clone(),
            attached: state.connection.is_some(),
            max: state.max,
        }
    }

    pub(crate) fn is_valid(&self) -> bool { self.valid.load(Ordering::Acquire) }

    /// Count one delivery, unless `max` is non-zero and already reached.
    ///
    /// Returns the new count.
    pub(super) fn claim_delivery(&self, max: u64) -> Option<u64> {
        self.delivered
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    /// Enqueue an inbound message with the connection attached right now.
    ///
    /// Never blocks. Returns `false` if the message was dropped.
    pub(crate) fn deliver(&self, message: Message) -> bool {
        if !self.is_valid() {
            trace_drop(self.sid, DropReason::NoSubscription);
            return false;
        }
        let connection = self.state().connection.clone();
        match self.sender.enqueue(Delivery::new(message, connection)) {
            Ok(()) => true,
            Err(_) => {
                trace_drop(self.sid, DropReason::QueueClosed);
                false
            }
        }
    }

    /// Start the worker. Returns `false` if it is already running.
    pub(crate) fn enable(self: &Arc<Self>) -> bool {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|token| !token.is_cancelled()) {
            return false;
        }
        let token = self.context.shutdown.child_token();
        self.context.tracker.spawn_on(
            worker::run(Arc::clone(self), token.clone()),
            &self.context.runtime,
        );
        *worker = Some(token);
        true
    }

    /// Stop the worker. Returns `false` if it was not running.
    pub(crate) fn disable(&self) -> bool {
        let token = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        token.is_some_and(|token| {
            let running = !token.is_cancelled();
            token.cancel();
            running
        })
    }

    fn is_started(&self) -> bool {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }

    fn send(&self, frame: OutboundFrame) -> Result<(), SubscriptionError> {
        let connection = self.state().connection.clone();
        let connection = connection.ok_or(SubscriptionError::Detached)?;
        connection.send(frame)?;
        Ok(())
    }

    /// Invalidate the subscription, detach it and withdraw interest.
    ///
    /// Only the first call does anything; later calls return `Ok(())`.
    fn teardown(&self) -> Result<(), SubscriptionError> {
        if !self.valid.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let connection = self.state().connection.take();
        if let Some(table) = self.table.upgrade() {
            table.remove(self.sid);
        }
        match connection {
            Some(connection) => {
                connection.send(OutboundFrame::Unsubscribe {
                    sid: self.sid,
                    max: None,
                })?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Best-effort teardown followed by stopping the worker.
    pub(crate) fn close(&self) {
        if let Err(error) = self.teardown() {
            debug!(sid = %self.sid, %error, "unsubscribe during close failed");
        }
        self.disable();
    }
}

fn trace_drop(sid: Sid, reason: DropReason) {
    tracing::trace!(sid = %sid, ?reason, "inbound message dropped");
    metrics::inc_dropped(reason);
}

/// Handle to an asynchronous subscription.
///
/// Cloning the handle is cheap; all clones refer to the same subscription.
/// Dropping every handle does not stop delivery: the connection keeps the
/// subscription alive until it is unsubscribed or the connection closes.
#[derive(Clone)]
pub struct AsyncSubscription {
    shared: Arc<SubscriptionShared>,
}

impl AsyncSubscription {
    pub(crate) fn from_shared(shared: Arc<SubscriptionShared>) -> Self { Self { shared } }

    pub(crate) fn shared(&self) -> &Arc<SubscriptionShared> { &self.shared }

    #[must_use]
    pub fn sid(&self) -> Sid { self.shared.sid }

    #[must_use]
    pub fn subject(&self) -> &str { &self.shared.subject }

    #[must_use]
    pub fn queue_group(&self) -> Option<&str> { self.shared.queue_group.as_deref() }

    #[must_use]
    pub fn options(&self) -> Option<&SubscribeOptions> { self.shared.options.as_ref() }

    /// Messages handed to the handler so far.
    #[must_use]
    pub fn delivered(&self) -> u64 { self.shared.delivered.load(Ordering::Acquire) }

    /// Delivery ceiling; `0` means unlimited.
    #[must_use]
    pub fn max_messages(&self) -> u64 { self.shared.state().max }

    /// Messages waiting in the dispatch queue.
    #[must_use]
    pub fn pending(&self) -> usize { self.shared.sender.pending() }

    #[must_use]
    pub fn is_valid(&self) -> bool { self.shared.is_valid() }

    /// Whether the delivery worker is running.
    #[must_use]
    pub fn is_started(&self) -> bool { self.shared.is_started() }

    /// Replace the message handler.
    ///
    /// Takes effect from the next message the worker picks up; a message
    /// already being handled finishes with the old handler.
    pub fn set_handler(&self, handler: MessageHandler) { self.shared.state().handler = Some(handler); }

    /// Start the delivery worker and announce the subscription to the server.
    ///
    /// Calling `start` on a running subscription does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidState`] if the subscription was
    /// closed or exhausted, or [`SubscriptionError::Transport`] if the
    /// announcement could not be enqueued; in that case the worker is stopped
    /// again.
    pub fn start(&self) -> Result<(), SubscriptionError> {
        let shared = &self.shared;
        if !shared.is_valid() {
            return Err(SubscriptionError::InvalidState { sid: shared.sid });
        }
        if !shared.enable() {
            return Ok(());
        }
        let announce = OutboundFrame::Subscribe {
            sid: shared.sid,
            subject: shared.subject.clone(),
            queue_group: shared.queue_group.clone(),
        };
        if let Err(error) = shared.send(announce) {
            shared.disable();
            return Err(error);
        }
        debug!(sid = %shared.sid, subject = %shared.subject, "subscription started");
        Ok(())
    }

    /// Withdraw interest, remove the subscription from its connection and stop
    /// the worker.
    ///
    /// Unsubscribing an already closed subscription is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::Transport`] if the withdrawal could not be
    /// enqueued. The subscription is closed locally regardless.
    pub fn unsubscribe(&self) -> Result<(), SubscriptionError> {
        let result = self.shared.teardown();
        self.shared.disable();
        result
    }

    /// Limit the subscription to `max` deliveries in total.
    ///
    /// The server is told to withdraw interest after the remaining messages.
    /// If `max` has already been reached the subscription is closed at once.
    /// `0` removes the limit.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::InvalidState`] for a closed subscription and
    /// [`SubscriptionError::Transport`] if the frame could not be enqueued.
    pub fn auto_unsubscribe(&self, max: u64) -> Result<(), SubscriptionError> {
        let shared = &self.shared;
        if !shared.is_valid() {
            return Err(SubscriptionError::InvalidState { sid: shared.sid });
        }
        shared.state().max = max;
        if max == 0 {
            return Ok(());
        }
        if self.delivered() >= max {
            return self.unsubscribe();
        }
        shared.send(OutboundFrame::Unsubscribe {
            sid: shared.sid,
            max: Some(max),
        })
    }

    /// Close the subscription, ignoring failures to notify the server.
    pub fn close(&self) { self.shared.close(); }
}

impl fmt::Debug for AsyncSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSubscription")
            .field("sid", &self.shared.sid)
            .field("subject", &self.shared.subject)
            .field("delivered", &self.delivered())
            .field("valid", &self.is_valid())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
