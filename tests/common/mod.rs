//! Shared utilities for integration tests.
//!
//! Provides a serialised log capture fixture and a harness pairing a
//! [`Connection`] with the outbound channel it writes to, so tests can play the
//! server side.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::{
    sync::{Mutex, MutexGuard, OnceLock},
    time::Duration,
};

use logtest::Logger;
use rstest::fixture;
use streamlink::{
    Connection,
    ConnectionConfig,
    Delivery,
    Message,
    MessageHandler,
    OutboundFrame,
    REPLY_SID,
    handler_fn,
    outbound::{self, OutboundReceiver},
};
use tokio::sync::mpsc;

/// Handle to the global logger with exclusive access.
///
/// Serialises access to a [`logtest::Logger`] so tests do not consume each
/// other's records.
pub struct LoggerHandle {
    guard: MutexGuard<'static, Logger>,
}

impl LoggerHandle {
    pub fn new() -> Self {
        static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

        let logger = LOGGER.get_or_init(|| Mutex::new(Logger::start()));
        let guard = logger
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        Self { guard }
    }

    /// Discard every captured record.
    pub fn clear(&mut self) { while self.pop().is_some() {} }

    /// Drain every captured record into its formatted message.
    pub fn drain_messages(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Some(record) = self.pop() {
            messages.push(record.args().to_string());
        }
        messages
    }
}

impl std::ops::Deref for LoggerHandle {
    type Target = Logger;

    fn deref(&self) -> &Self::Target { &self.guard }
}

impl std::ops::DerefMut for LoggerHandle {
    fn deref_mut(&mut self) -> &mut Self::Target { &mut self.guard }
}

#[allow(
    unused_braces,
    reason = "rustc false positive for single line rstest fixtures"
)]
#[fixture]
pub fn logger() -> LoggerHandle { LoggerHandle::new() }

/// A connection plus the receiving side of its outbound channel.
pub struct Harness {
    pub connection: Connection,
    pub frames: OutboundReceiver,
}

impl Harness {
    pub fn new(config: ConnectionConfig) -> Self {
        let (sender, frames) = outbound::channel(outbound::DEFAULT_CAPACITY);
        let connection = Connection::builder()
            .config(config)
            .build(sender)
            .expect("build connection");
        Self { connection, frames }
    }

    /// Next frame the connection wrote, failing the test after one second.
    pub async fn next_frame(&mut self) -> OutboundFrame {
        tokio::time::timeout(Duration::from_secs(1), self.frames.recv())
            .await
            .expect("frame within a second")
            .expect("channel open")
    }

    /// Reply subject of the next request published, skipping control frames.
    pub async fn next_reply_subject(&mut self) -> String {
        loop {
            if let OutboundFrame::Publish {
                reply_to: Some(reply_to),
                ..
            } = self.next_frame().await
            {
                return reply_to;
            }
        }
    }

    /// Answer a request as the server would.
    pub fn reply(&self, reply_subject: &str, payload: &'static str) -> bool {
        self.connection
            .process_inbound(Message::new(reply_subject, REPLY_SID, payload))
    }
}

#[fixture]
pub fn harness() -> Harness { Harness::new(ConnectionConfig::default()) }

/// Handler forwarding every message it sees to the returned receiver.
pub fn collecting_handler() -> (MessageHandler, mpsc::UnboundedReceiver<Message>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler_fn(move |delivery: Delivery| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(delivery.into_message());
            Ok(())
        }
    });
    (handler, rx)
}
