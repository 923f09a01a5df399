//! Per-identifier mutual exclusion for check-then-act workflows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held while a workflow owns a resource identifier.
pub type KeyGuard = OwnedMutexGuard<()>;

/// A table of async mutexes keyed by resource identifier.
///
/// Entries are created on demand and pruned once no workflow holds or waits
/// on them.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    entries: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, lock| Arc::strong_count(lock) > 1);
        Arc::clone(entries.entry(key.to_owned()).or_default())
    }

    /// Waits until the identifier is free and takes it.
    pub async fn lock(&self, key: &str) -> KeyGuard {
        self.entry(key).lock_owned().await
    }

    /// Takes the identifier only when nobody else holds it.
    #[must_use]
    pub fn try_lock(&self, key: &str) -> Option<KeyGuard> {
        self.entry(key).try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn try_lock_refuses_a_held_key() {
        let locks = KeyedLocks::new();
        let guard = locks.lock("vol-1").await;
        assert!(locks.try_lock("vol-1").is_none());
        assert!(locks.try_lock("vol-2").is_some());
        drop(guard);
        assert!(locks.try_lock("vol-1").is_some());
    }
}
