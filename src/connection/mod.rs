//! Connection glue between a transport and the delivery/request engine.
//!
//! A [`Connection`] owns the subscription table, the pending-request registry
//! and every task spawned on their behalf. The transport's read path feeds it
//! through [`Connection::deliver`], [`Connection::resolve_reply`] or
//! [`Connection::process_inbound`]; none of these wait on user code.

mod builder;
mod counter;
mod subscribe;

use std::sync::{
    Arc,
    Mutex,
    PoisonError,
    atomic::{AtomicBool, Ordering},
};

pub use builder::ConnectionBuilder;
use bytes::Bytes;
use counter::ActiveConnection;
pub use counter::{ConnectionId, active_connection_count};
use log::info;
pub use subscribe::SubscriptionBuilder;
use tracing::{debug, trace};

use crate::{
    config::ConnectionConfig,
    error::{ConnectionError, RequestError},
    inbox::InboxGenerator,
    message::Message,
    metrics::{self, DropReason},
    request::{PendingRequests, RequestHandle, RequestOptions},
    subscription::{AsyncSubscription, MessageHandler, Sid, SubscriptionTable, WorkerContext},
    transport::{OutboundFrame, Transport, TransportError},
};

/// Subscription id reserved for the connection's reply-subject interest.
pub const REPLY_SID: Sid = Sid::new(0);

struct ConnectionInner {
    transport: Arc<dyn Transport>,
    config: ConnectionConfig,
    subscriptions: Arc<SubscriptionTable>,
    requests: Arc<PendingRequests>,
    inbox: InboxGenerator,
    context: WorkerContext,
    closed: AtomicBool,
    /// Held until the reply-interest frame is enqueued; `true` once it is.
    reply_interest: Mutex<bool>,
    active: ActiveConnection,
}

impl ConnectionInner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let cancelled = self.requests.cancel_all();
        let subscriptions = self.subscriptions.snapshot();
        for shared in &subscriptions {
            shared.close();
        }
        self.context.shutdown.cancel();
        self.context.tracker.close();
        info!(
            "connection closed: id={}, cancelled_requests={cancelled}, closed_subscriptions={}, \
             streamlink_active_connections={}",
            self.active.id(),
            subscriptions.len(),
            active_connection_count()
        );
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) { self.close(); }
}

/// Handle to one client connection.
///
/// Cheap to clone. The connection closes when [`close`](Self::close) is called
/// or the last clone is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    #[must_use]
    pub fn builder() -> ConnectionBuilder { ConnectionBuilder::default() }

    /// Build a connection with default settings over `transport`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoRuntime`] outside a tokio runtime.
    pub fn new<T: Transport>(transport: T) -> Result<Self, ConnectionError> {
        Self::builder().build(transport)
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId { self.inner.active.id() }

    #[must_use]
    pub fn config(&self) -> &ConnectionConfig { &self.inner.config }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    /// Requests waiting for a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize { self.inner.requests.len() }

    /// Live subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize { self.inner.subscriptions.len() }

    /// Start describing a subscription to `subject`.
    pub fn subscription(&self, subject: impl Into<String>) -> SubscriptionBuilder<'_> {
        SubscriptionBuilder::new(self, subject.into())
    }

    /// Subscribe `handler` to `subject` and start delivering.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidSubject`] for an empty subject or one
    /// containing whitespace, [`ConnectionError::Closed`] after
    /// [`close`](Self::close), and [`ConnectionError::Subscription`] if the
    /// subscription could not be announced.
    pub fn subscribe(
        &self,
        subject: impl Into<String>,
        handler: MessageHandler,
    ) -> Result<AsyncSubscription, ConnectionError> {
        self.subscription(subject).handler(handler).start()
    }

    /// Route an inbound message to the subscription `sid`.
    ///
    /// Only enqueues; returns `false` if the message was dropped because no
    /// live subscription matches.
    pub fn deliver(&self, sid: Sid, message: Message) -> bool {
        match self.inner.subscriptions.get(sid) {
            Some(shared) => shared.deliver(message),
            None => {
                trace!(sid = %sid, subject = message.subject(), "no subscription, message dropped");
                metrics::inc_dropped(DropReason::NoSubscription);
                false
            }
        }
    }

    /// Resolve the request waiting on `correlation_key` with `message`.
    ///
    /// Returns `false` if no request is waiting, in which case the reply is
    /// dropped.
    pub fn resolve_reply(&self, correlation_key: &str, message: Message) -> bool {
        self.inner.requests.resolve_reply(correlation_key, message)
    }

    /// Route one decoded inbound message.
    ///
    /// Messages addressed to this connection's reply subjects resolve pending
    /// requests; everything else is delivered by sid.
    pub fn process_inbound(&self, message: Message) -> bool {
        if self.inner.inbox.owns(message.subject()) {
            let key = message.subject().to_owned();
            return self.resolve_reply(&key, message);
        }
        self.deliver(message.sid(), message)
    }

    /// Publish `payload` to `subject` without expecting a reply.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidSubject`],
    /// [`ConnectionError::Closed`] or [`ConnectionError::Transport`].
    pub fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Result<(), ConnectionError> {
        if !is_valid_subject(subject) {
            return Err(ConnectionError::InvalidSubject(subject.to_owned()));
        }
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        self.inner.transport.send(OutboundFrame::Publish {
            subject: subject.to_owned(),
            reply_to: None,
            payload: payload.into(),
        })?;
        Ok(())
    }

    /// Send a request and return a handle resolving to its reply.
    ///
    /// The request expires after `options.timeout`, or the connection's
    /// default, plus [`crate::REQUEST_GRACE_MARGIN`].
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::InvalidSubject`] for a malformed subject,
    /// [`RequestError::ConnectionClosed`] once the connection is closed and
    /// [`RequestError::Transport`] if the request frame could not be enqueued.
    /// Failures after the request was sent are reported through the handle.
    pub fn request(
        &self,
        subject: &str,
        payload: impl Into<Bytes>,
        options: RequestOptions,
    ) -> Result<RequestHandle, RequestError> {
        if !is_valid_subject(subject) {
            return Err(RequestError::InvalidSubject(subject.to_owned()));
        }
        if self.is_closed() {
            return Err(RequestError::ConnectionClosed);
        }
        self.ensure_reply_interest()?;

        let inner = &self.inner;
        let key = inner.inbox.next_inbox();
        let handle = inner
            .requests
            .register(key.clone(), options, inner.config.request_timeout);
        // A close that raced the registration may have missed this entry.
        if self.is_closed() {
            inner.requests.abandon(&key);
            return Err(RequestError::ConnectionClosed);
        }
        let frame = OutboundFrame::Publish {
            subject: subject.to_owned(),
            reply_to: Some(key.clone()),
            payload: payload.into(),
        };
        if let Err(error) = inner.transport.send(frame) {
            inner.requests.abandon(&key);
            return Err(error.into());
        }
        debug!(correlation_key = %key, subject, "request sent");
        Ok(handle)
    }

    /// Announce interest in this connection's reply subjects once.
    ///
    /// Concurrent first requests wait on the lock, so none of them publishes
    /// before the announcement is enqueued. A failed announcement is retried
    /// by the next request.
    fn ensure_reply_interest(&self) -> Result<(), TransportError> {
        let inner = &self.inner;
        let mut announced = inner
            .reply_interest
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *announced {
            return Ok(());
        }
        inner.transport.send(OutboundFrame::Subscribe {
            sid: REPLY_SID,
            subject: inner.inbox.wildcard(),
            queue_group: None,
        })?;
        *announced = true;
        Ok(())
    }

    /// Close the connection.
    ///
    /// Every pending request resolves as cancelled-closing, every subscription
    /// is closed and all workers are told to stop. Idempotent.
    pub fn close(&self) { self.inner.close(); }

    /// Close the connection and wait for every worker to exit.
    pub async fn shutdown(&self) {
        self.close();
        self.inner.context.tracker.wait().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("closed", &self.is_closed())
            .field("subscriptions", &self.subscription_count())
            .field("pending_requests", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

/// Subjects must be non-empty and free of whitespace.
fn is_valid_subject(subject: &str) -> bool { !subject.is_empty() && !subject.contains(char::is_whitespace) }
