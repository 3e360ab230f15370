#![doc(html_root_url = "https://docs.rs/streamlink/latest")]
//! Public API for the `streamlink` library.
//!
//! This crate provides the asynchronous delivery core of a publish/subscribe
//! messaging client: per-subscription dispatch queues drained by delivery
//! workers, and a registry of pending request/reply futures with timeout
//! handling. Wire framing and sockets live behind the [`Transport`] trait.

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
mod inbox;
pub mod message;
pub mod metrics;
pub mod options;
pub mod outbound;
pub mod panic;
pub mod request;
pub mod subscription;
pub mod transport;

pub use config::ConnectionConfig;
pub use connection::{
    Connection,
    ConnectionBuilder,
    ConnectionId,
    REPLY_SID,
    SubscriptionBuilder,
    active_connection_count,
};
pub use dispatch::{DispatchClosed, DispatchReceiver, DispatchSender, dispatch_queue};
pub use error::{ConnectionError, RequestError, SubscriptionError};
pub use message::{Delivery, Message, NO_RESPONDERS_STATUS};
pub use metrics::{
    CONNECTIONS_ACTIVE,
    HANDLER_FAILURES,
    MESSAGES_DELIVERED,
    MESSAGES_DROPPED,
    REQUESTS_OUTSTANDING,
    REQUESTS_RESOLVED,
};
pub use options::{ConsumerConfiguration, OptionsError, SubscribeOptions, SubscribeOptionsBuilder};
pub use request::{
    CancelAction,
    CancelReason,
    PendingRequests,
    REQUEST_GRACE_MARGIN,
    RequestHandle,
    RequestOptions,
    RequestOutcome,
};
pub use subscription::{
    AsyncSubscription,
    HandlerError,
    HandlerFailure,
    HandlerFailureHook,
    HandlerResult,
    MessageHandler,
    Sid,
    handler_fn,
};
pub use transport::{OutboundFrame, Transport, TransportError};
