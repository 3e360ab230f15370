//! Connection identifiers and the live-connection gauge.

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

static ACTIVE_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a [`super::Connection`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self { Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)) }

    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "conn-{}", self.0) }
}

/// Counts a connection as live from creation until drop.
pub(super) struct ActiveConnection {
    id: ConnectionId,
}

impl ActiveConnection {
    pub(super) fn open() -> Self {
        ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
        crate::metrics::inc_connections();
        Self {
            id: ConnectionId::next(),
        }
    }

    pub(super) fn id(&self) -> ConnectionId { self.id }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        crate::metrics::dec_connections();
    }
}

/// Number of connections that have been built and not yet dropped.
#[must_use]
pub fn active_connection_count() -> u64 { ACTIVE_CONNECTIONS.load(Ordering::Relaxed) }
