//! In-process lock coordinator for single-node deployments

use super::{LockCoordinator, ResourceKey};
use crate::Result;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Lock table guarded by a mutex; waiters park on a condition variable.
///
/// Keys are tracked by name, so distinct keys never contend even when their
/// numeric ids collide.
#[derive(Debug, Default)]
pub struct LocalLockCoordinator {
    /// Names of currently held keys
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LocalLockCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `key` is currently held by anyone
    pub fn is_locked(&self, key: &ResourceKey) -> bool {
        self.held.lock().contains(key.name())
    }

    /// Number of held keys
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

impl LockCoordinator for LocalLockCoordinator {
    fn try_acquire(&self, key: &ResourceKey) -> Result<bool> {
        Ok(self.held.lock().insert(key.name().to_string()))
    }

    fn acquire_timeout(&self, key: &ResourceKey, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut held = self.held.lock();

        while held.contains(key.name()) {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut held, deadline).timed_out()
                        && held.contains(key.name())
                    {
                        return Ok(false);
                    }
                }
                None => self.released.wait(&mut held),
            }
        }

        held.insert(key.name().to_string());
        Ok(true)
    }

    fn release(&self, key: &ResourceKey) {
        let removed = self.held.lock().remove(key.name());
        if removed {
            self.released.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_acquire_and_release() {
        let coord = LocalLockCoordinator::new();
        let key = ResourceKey::from_name("k");

        assert!(coord.try_acquire(&key).unwrap());
        assert!(coord.is_locked(&key));
        assert!(!coord.try_acquire(&key).unwrap());

        coord.release(&key);
        assert!(!coord.is_locked(&key));
        assert_eq!(coord.held_count(), 0);
    }

    #[test]
    fn test_no_reentrancy() {
        let coord = LocalLockCoordinator::new();
        let key = ResourceKey::from_name("k");
        assert!(coord.try_acquire(&key).unwrap());
        assert!(!coord
            .acquire_timeout(&key, Some(Duration::from_millis(5)))
            .unwrap());
    }

    #[test]
    fn test_colliding_ids_do_not_contend() {
        let coord = LocalLockCoordinator::new();
        let a = ResourceKey::with_id("tenant-a", 42);
        let b = ResourceKey::with_id("tenant-b", 42);

        assert!(coord.try_acquire(&a).unwrap());
        assert!(coord.try_acquire(&b).unwrap());
        assert_eq!(coord.held_count(), 2);

        coord.release(&a);
        assert!(!coord.is_locked(&a));
        assert!(coord.is_locked(&b));
    }

    #[test]
    fn test_release_unheld_is_noop() {
        let coord = LocalLockCoordinator::new();
        coord.release(&ResourceKey::from_name("never"));
        assert_eq!(coord.held_count(), 0);
    }
}
