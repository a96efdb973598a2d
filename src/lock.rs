//! Mutual exclusion for check-then-act sequences
//!
//! Every mutating registry operation acquires exactly one scope (the bounty
//! key) and holds the guard until it returns.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

/// Default number of stripes for [`StripedLocks`]
pub const DEFAULT_LOCK_STRIPES: usize = 64;

pub trait ScopeLocks: Send + Sync {
    /// Block until `scope` is exclusively held by the caller
    fn acquire(&self, scope: &str) -> MutexGuard<'_, ()>;
}

/// Fixed pool of mutexes selected by hashing the scope.
///
/// Distinct scopes may share a stripe, which only costs parallelism.
pub struct StripedLocks {
    stripes: Vec<Mutex<()>>,
}

impl StripedLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe_for(&self, scope: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        scope.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

impl Default for StripedLocks {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_STRIPES)
    }
}

impl ScopeLocks for StripedLocks {
    fn acquire(&self, scope: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_for(scope)].lock()
    }
}

/// One lock for every scope
#[derive(Default)]
pub struct GlobalLock {
    inner: Mutex<()>,
}

impl ScopeLocks for GlobalLock {
    fn acquire(&self, _scope: &str) -> MutexGuard<'_, ()> {
        self.inner.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_scope_same_stripe() {
        let locks = StripedLocks::new(8);
        assert_eq!(locks.stripe_for("VVS"), locks.stripe_for("VVS"));
    }

    #[test]
    fn test_scope_excludes_while_held() {
        let locks = StripedLocks::new(4);
        let guard = locks.acquire("VVS");
        assert!(locks.stripes[locks.stripe_for("VVS")].try_lock().is_none());
        drop(guard);
        assert!(locks.stripes[locks.stripe_for("VVS")].try_lock().is_some());
    }

    #[test]
    fn test_zero_stripes_clamped() {
        let locks = StripedLocks::new(0);
        assert_eq!(locks.stripes.len(), 1);
        let _guard = locks.acquire("anything");
    }

    #[test]
    fn test_global_lock_is_shared() {
        let lock = GlobalLock::default();
        let _guard = lock.acquire("a");
        assert!(lock.inner.try_lock().is_none());
    }
}
