//! Connection-owned table of live subscriptions keyed by [`Sid`].

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use dashmap::DashMap;

use super::{Sid, SubscriptionShared};

/// Live subscriptions of one connection.
///
/// The table holds the only long-lived strong reference to each subscription;
/// subscriptions point back at it weakly so they can remove themselves on
/// teardown.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    entries: DashMap<Sid, Arc<SubscriptionShared>>,
    next_sid: AtomicU64,
}

impl SubscriptionTable {
    /// Allocate the next subscription id. Ids start at 1 and are never reused.
    pub(crate) fn next_sid(&self) -> Sid { Sid::new(self.next_sid.fetch_add(1, Ordering::Relaxed) + 1) }

    pub(crate) fn insert(&self, shared: Arc<SubscriptionShared>) {
        self.entries.insert(shared.sid(), shared);
    }

    pub(crate) fn get(&self, sid: Sid) -> Option<Arc<SubscriptionShared>> {
        self.entries.get(&sid).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn remove(&self, sid: Sid) -> Option<Arc<SubscriptionShared>> {
        self.entries.remove(&sid).map(|(_, shared)| shared)
    }

    /// Snapshot every live subscription.
    ///
    /// Entries are cloned out so callers can tear them down without holding a
    /// shard lock; teardown removes them from the table itself.
    pub(crate) fn snapshot(&self) -> Vec<Arc<SubscriptionShared>> {
        self.entries.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub(crate) fn len(&self) -> usize { self.entries.len() }
}
