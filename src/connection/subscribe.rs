//! Building subscriptions on a connection.

use std::sync::Arc;

use tracing::debug;

use super::{Connection, is_valid_subject};
use crate::{
    error::ConnectionError,
    options::SubscribeOptions,
    subscription::{AsyncSubscription, MessageHandler, SubscriptionParts, SubscriptionShared},
};

/// Describes a subscription before it is registered.
///
/// Obtained from [`Connection::subscription`].
#[must_use]
pub struct SubscriptionBuilder<'a> {
    connection: &'a Connection,
    subject: String,
    queue_group: Option<String>,
    max_messages: u64,
    handler: Option<MessageHandler>,
    options: Option<SubscribeOptions>,
}

impl<'a> SubscriptionBuilder<'a> {
    pub(super) fn new(connection: &'a Connection, subject: String) -> Self {
        Self {
            connection,
            subject,
            queue_group: None,
            max_messages: 0,
            handler: None,
            options: None,
        }
    }

    /// Share delivery with other members of `group`.
    pub fn queue_group(mut self, group: impl Into<String>) -> Self {
        self.queue_group = Some(group.into());
        self
    }

    /// Close the subscription after `max` deliveries; `0` means unlimited.
    pub fn max_messages(mut self, max: u64) -> Self {
        self.max_messages = max;
        self
    }

    pub fn handler(mut self, handler: MessageHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Attach stream consumer options.
    pub fn options(mut self, options: SubscribeOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Register the subscription without starting it.
    ///
    /// Messages delivered before [`AsyncSubscription::start`] wait in its
    /// queue.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::InvalidSubject`] if the subject or queue group
    /// is empty or contains whitespace and [`ConnectionError::Closed`] once the
    /// connection is closed.
    pub fn build(self) -> Result<AsyncSubscription, ConnectionError> {
        if !is_valid_subject(&self.subject) {
            return Err(ConnectionError::InvalidSubject(self.subject));
        }
        if let Some(group) = &self.queue_group
            && !is_valid_subject(group)
        {
            return Err(ConnectionError::InvalidSubject(group.clone()));
        }
        let connection = self.connection;
        if connection.is_closed() {
            return Err(ConnectionError::Closed);
        }

        let inner = &connection.inner;
        let shared = SubscriptionShared::new(SubscriptionParts {
            sid: inner.subscriptions.next_sid(),
            subject: self.subject,
            queue_group: self.queue_group,
            options: self.options,
            handler: self.handler,
            max: self.max_messages,
            connection: Arc::clone(&inner.transport),
            table: Arc::downgrade(&inner.subscriptions),
            context: inner.context.clone(),
        });
        inner.subscriptions.insert(Arc::clone(&shared));
        // A close that raced the insert may have missed this entry.
        if connection.is_closed() {
            shared.close();
            return Err(ConnectionError::Closed);
        }
        debug!(sid = %shared.sid(), subject = shared.subject(), "subscription registered");
        Ok(AsyncSubscription::from_shared(shared))
    }

    /// Register the subscription and start delivering.
    ///
    /// # Errors
    ///
    /// As [`build`](Self::build), plus [`ConnectionError::Subscription`] if the
    /// subscription could not be announced; it is closed in that case.
    pub fn start(self) -> Result<AsyncSubscription, ConnectionError> {
        let subscription = self.build()?;
        if let Err(error) = subscription.start() {
            subscription.close();
            return Err(error.into());
        }
        Ok(subscription)
    }
}
