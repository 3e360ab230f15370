//! Builder for [`Connection`].

use std::sync::{Arc, Mutex, atomic::AtomicBool};

use log::info;
use tokio::runtime::Handle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::{ActiveConnection, Connection, ConnectionInner, active_connection_count};
use crate::{
    config::ConnectionConfig,
    error::ConnectionError,
    inbox::InboxGenerator,
    request::{PendingRequests, spawn_sweeper},
    subscription::{HandlerFailure, HandlerFailureHook, Sid, SubscriptionTable, WorkerContext},
    transport::Transport,
};

/// Configures and builds a [`Connection`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use streamlink::{Connection, ConnectionConfig, outbound};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let (sender, _frames) = outbound::channel(16);
/// let connection = Connection::builder()
///     .config(ConnectionConfig::default().request_timeout(Duration::from_secs(1)))
///     .on_handler_failure(|sid, failure| eprintln!("subscription {sid}: {failure}"))
///     .build(sender)
///     .expect("inside a runtime");
/// connection.close();
/// # }
/// ```
#[derive(Default)]
#[must_use]
pub struct ConnectionBuilder {
    config: ConnectionConfig,
    on_failure: Option<HandlerFailureHook>,
}

impl ConnectionBuilder {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe handler errors and panics contained by delivery workers.
    pub fn on_handler_failure<F>(mut self, hook: F) -> Self
    where
        F: Fn(Sid, &HandlerFailure) + Send + Sync + 'static,
    {
        self.on_failure = Some(Arc::new(hook));
        self
    }

    /// Build the connection and start its expiry sweep on the current runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::NoRuntime`] when called outside a tokio
    /// runtime and [`ConnectionError::InvalidSweepInterval`] for a zero sweep
    /// interval.
    pub fn build<T: Transport>(self, transport: T) -> Result<Connection, ConnectionError> {
        let runtime = Handle::try_current().map_err(|_| ConnectionError::NoRuntime)?;
        if self.config.sweep_interval.is_zero() {
            return Err(ConnectionError::InvalidSweepInterval(self.config.sweep_interval));
        }

        let active = ActiveConnection::open();
        let id = active.id();
        let context = WorkerContext {
            runtime,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            on_failure: self.on_failure,
        };
        let requests = Arc::new(PendingRequests::new());
        spawn_sweeper(
            Arc::clone(&requests),
            self.config.sweep_interval,
            context.shutdown.clone(),
            &context.tracker,
            &context.runtime,
        );

        let inner = ConnectionInner {
            transport: Arc::new(transport),
            inbox: InboxGenerator::new(&self.config.inbox_prefix),
            config: self.config,
            subscriptions: Arc::new(SubscriptionTable::default()),
            requests,
            context,
            closed: AtomicBool::new(false),
            reply_interest: Mutex::new(false),
            active,
        };
        info!(
            "connection opened: id={id}, streamlink_active_connections={}",
            active_connection_count()
        );
        Ok(Connection {
            inner: Arc::new(inner),
        })
    }
}
