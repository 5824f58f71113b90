//! Per-domain advisory locks
//!
//! Auto-renew, suspension and privacy all read-modify-write the same domain
//! row and talk to the registry about it. Within one process they take the
//! domain's lock first, so two workflows never interleave on one domain.
//! Cross-process locking is not provided.
//!
//! Entries live only while a guard or a waiter references them; the last
//! guard to release removes its key from the table.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::DomainKey;

type LockTable = Arc<StdMutex<HashMap<DomainKey, Arc<Mutex<()>>>>>;

/// Lazily created mutex per domain key
///
/// Clones share the same lock table.
#[derive(Debug, Clone, Default)]
pub struct DomainLocks {
    locks: LockTable,
}

/// Held while a workflow operates on one domain
#[derive(Debug)]
pub struct DomainGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: DomainKey,
    locks: LockTable,
}

impl Drop for DomainGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the table itself still points at the mutex: nobody waits on it
        if let Some(lock) = table.get(&self.key)
            && Arc::strong_count(lock) == 1
        {
            table.remove(&self.key);
        }
    }
}

impl DomainLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for and take the lock for `key`
    pub async fn acquire(&self, key: &DomainKey) -> DomainGuard {
        let lock = self.lock_for(key);
        let guard = lock.lock_owned().await;
        self.wrap(key, guard)
    }

    /// Take the lock for `key` only if nobody holds it
    pub async fn try_acquire(&self, key: &DomainKey) -> Option<DomainGuard> {
        let lock = self.lock_for(key);
        match lock.try_lock_owned() {
            Ok(guard) => Some(self.wrap(key, guard)),
            Err(_) => None,
        }
    }

    /// Number of keys currently in the table
    pub fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn lock_for(&self, key: &DomainKey) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn wrap(&self, key: &DomainKey, guard: OwnedMutexGuard<()>) -> DomainGuard {
        DomainGuard {
            guard: Some(guard),
            key: key.clone(),
            locks: self.locks.clone(),
        }
    }
}
