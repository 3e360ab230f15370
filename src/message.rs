//! Inbound messages and the entries carried by dispatch queues.
//!
//! A [`Message`] is the already-decoded form of one inbound frame. The
//! transport produces it; the engine only routes it. A [`Delivery`] pairs the
//! message with the connection that was attached to the subscription when the
//! message was enqueued, so handlers can reply even if the subscription is torn
//! down while the message waits in its queue.

use std::{fmt, sync::Arc};

use bytes::Bytes;

use crate::{
    error::SubscriptionError,
    subscription::Sid,
    transport::{OutboundFrame, Transport},
};

/// Status code the server attaches to a reply when nobody is subscribed to the
/// request subject.
pub const NO_RESPONDERS_STATUS: u16 = 503;

/// A raw inbound message.
///
/// # Examples
///
/// ```
/// use streamlink::{Message, Sid};
///
/// let msg = Message::new("orders.created", Sid::new(1), "payload").with_reply_to("_INBOX.a.1");
/// assert_eq!(msg.subject(), "orders.created");
/// assert_eq!(msg.reply_to(), Some("_INBOX.a.1"));
/// assert!(!msg.is_no_responders());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    subject: String,
    sid: Sid,
    reply_to: Option<String>,
    payload: Bytes,
    status: Option<u16>,
}

impl Message {
    /// Create a message received on `subject` for subscription `sid`.
    #[must_use]
    pub fn new(subject: impl Into<String>, sid: Sid, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            sid,
            reply_to: None,
            payload: payload.into(),
            status: None,
        }
    }

    /// Attach the reply subject the publisher asked responses to go to.
    #[must_use]
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Attach a server status code.
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn subject(&self) -> &str { &self.subject }

    #[must_use]
    pub fn sid(&self) -> Sid { self.sid }

    #[must_use]
    pub fn reply_to(&self) -> Option<&str> { self.reply_to.as_deref() }

    #[must_use]
    pub fn payload(&self) -> &Bytes { &self.payload }

    #[must_use]
    pub fn status(&self) -> Option<u16> { self.status }

    /// Consume the message and return its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }

    /// Whether this is the server's "no responders" signal for a request.
    #[must_use]
    pub fn is_no_responders(&self) -> bool {
        self.status == Some(NO_RESPONDERS_STATUS) && self.payload.is_empty()
    }
}

/// One dispatch-queue entry handed to a message handler.
pub struct Delivery {
    message: Message,
    connection: Option<Arc<dyn Transport>>,
}

impl Delivery {
    pub(crate) fn new(message: Message, connection: Option<Arc<dyn Transport>>) -> Self {
        Self {
            message,
            connection,
        }
    }

    #[must_use]
    pub fn message(&self) -> &Message { &self.message }

    #[must_use]
    pub fn into_message(self) -> Message { self.message }

    /// Whether a connection was attached when the message was enqueued.
    #[must_use]
    pub fn has_connection(&self) -> bool { self.connection.is_some() }

    /// Publish `payload` to the message's reply subject.
    ///
    /// # Errors
    ///
    /// Returns [`SubscriptionError::NoReplySubject`] if the publisher did not
    /// ask for a reply, [`SubscriptionError::Detached`] if no connection was
    /// attached at enqueue time, and [`SubscriptionError::Transport`] if the
    /// frame cannot be enqueued.
    pub fn respond(&self, payload: impl Into<Bytes>) -> Result<(), SubscriptionError> {
        let Some(reply_to) = self.message.reply_to() else {
            return Err(SubscriptionError::NoReplySubject {
                subject: self.message.subject().to_owned(),
            });
        };
        let connection = self.connection.as_ref().ok_or(SubscriptionError::Detached)?;
        connection.send(OutboundFrame::Publish {
            subject: reply_to.to_owned(),
            reply_to: None,
            payload: payload.into(),
        })?;
        Ok(())
    }
}

impl fmt::Debug for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("connected", &self.connection.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::*;
    use crate::transport::test_support::RecordingTransport;

    #[rstest]
    #[case::status_and_empty(Some(503), "", true)]
    #[case::status_with_body(Some(503), "busy", false)]
    #[case::other_status(Some(408), "", false)]
    #[case::plain(None, "", false)]
    fn no_responders_detection(
        #[case] status: Option<u16>,
        #[case] payload: &'static str,
        #[case] expected: bool,
    ) {
        let mut msg = Message::new("svc.echo", Sid::new(1), payload);
        if let Some(code) = status {
            msg = msg.with_status(code);
        }
        assert_eq!(msg.is_no_responders(), expected);
    }

    #[test]
    fn respond_publishes_to_reply_subject() {
        let transport = Arc::new(RecordingTransport::default());
        let msg = Message::new("svc.echo", Sid::new(3), "ping").with_reply_to("_INBOX.x.1");
        let connection: Arc<dyn Transport> = transport.clone();
        let delivery = Delivery::new(msg, Some(connection));

        delivery.respond("pong").expect("respond");

        assert_eq!(
            transport.frames(),
            vec![OutboundFrame::Publish {
                subject: "_INBOX.x.1".into(),
                reply_to: None,
                payload: Bytes::from_static(b"pong"),
            }]
        );
    }

    #[test]
    fn respond_without_reply_subject_fails() {
        let transport: Arc<dyn Transport> = Arc::new(RecordingTransport::default());
        let delivery = Delivery::new(Message::new("svc.echo", Sid::new(3), "ping"), Some(transport));
        assert!(matches!(
            delivery.respond("pong"),
            Err(SubscriptionError::NoReplySubject { .. })
        ));
    }

    #[test]
    fn respond_without_connection_fails() {
        let msg = Message::new("svc.echo", Sid::new(3), "ping").with_reply_to("_INBOX.x.1");
        let delivery = Delivery::new(msg, None);
        assert!(matches!(
            delivery.respond("pong"),
            Err(SubscriptionError::Detached)
        ));
    }
}
