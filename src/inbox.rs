//! Reply-subject generation for request/reply correlation.
//!
//! Each connection owns one [`InboxGenerator`]. Subjects have the form
//! `<prefix>.<token>.<n>`: the token is a random v4 UUID fixed per generator
//! and `n` counts requests.

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Produces unique reply subjects for one connection.
#[derive(Debug)]
pub struct InboxGenerator {
    base: String,
    next: AtomicU64,
}

impl InboxGenerator {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        let token = Uuid::new_v4().simple();
        Self {
            base: format!("{prefix}.{token}."),
            next: AtomicU64::new(0),
        }
    }

    /// Return the next unused reply subject.
    pub fn next_inbox(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}{n}", self.base)
    }

    /// Subject matching every inbox this generator produces.
    #[must_use]
    pub fn wildcard(&self) -> String { format!("{}*", self.base) }

    /// Whether `subject` was produced by this generator.
    #[must_use]
    pub fn owns(&self, subject: &str) -> bool { subject.starts_with(&self.base) }
}
