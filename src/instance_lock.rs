//! Per-instance mutual exclusion for dialog turns.
//!
//! Every instance id maps to one `tokio::sync::Mutex<()>` held in a
//! process-wide table. The same mutex backs the async and the blocking
//! acquire, so a thread parked in [`InstanceLocks::acquire_blocking`] and a
//! task awaiting [`InstanceLocks::acquire`] exclude each other.
//!
//! Entries are created on first use. [`InstanceLocks::prune`] drops entries
//! that nobody holds or waits on; it runs from a scheduled job.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

#[derive(Debug, Default)]
pub struct InstanceLocks {
    table: DashMap<i64, Arc<Mutex<()>>>,
}

/// Proof that the caller owns the turn slot of an instance. Released on drop.
#[derive(Debug)]
pub struct InstanceGuard {
    instance_id: i64,
    _guard: OwnedMutexGuard<()>,
}

impl InstanceGuard {
    pub fn instance_id(&self) -> i64 {
        self.instance_id
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        trace!("Released instance lock {}", self.instance_id);
    }
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, instance_id: i64) -> Arc<Mutex<()>> {
        // Clone the Arc out so no shard guard outlives this call.
        self.table.entry(instance_id).or_default().value().clone()
    }

    /// Wait until the instance is free, suspending the current task.
    pub async fn acquire(&self, instance_id: i64) -> InstanceGuard {
        let guard = self.entry(instance_id).lock_owned().await;
        trace!("Acquired instance lock {}", instance_id);
        InstanceGuard {
            instance_id,
            _guard: guard,
        }
    }

    /// Wait until the instance is free, blocking the current thread.
    ///
    /// Panics if called from within an async execution context.
    pub fn acquire_blocking(&self, instance_id: i64) -> InstanceGuard {
        let guard = self.entry(instance_id).blocking_lock_owned();
        trace!("Acquired instance lock {} (blocking)", instance_id);
        InstanceGuard {
            instance_id,
            _guard: guard,
        }
    }

    /// Remove entries that are neither held nor awaited. Returns how many were
    /// removed.
    ///
    /// Holders and waiters keep a clone of the entry's `Arc`, and new callers
    /// clone it while holding the shard lock, so a strong count of one means
    /// the table is the only owner.
    pub fn prune(&self) -> usize {
        let before = self.table.len();
        self.table.retain(|_, lock| Arc::strong_count(lock) > 1);
        before.saturating_sub(self.table.len())
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
