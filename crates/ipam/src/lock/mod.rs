//! Resource lock coordination
//!
//! Serializes allocate/release against the same parent resource. A lock is
//! held by a [`LockGuard`] owned by the enclosing transaction and released
//! when the guard drops (commit, rollback, or the transaction going away).
//!
//! Per key the only transitions are `Unlocked -> Locked` on acquire and
//! `Locked -> Unlocked` on release. There is one holder at a time and no
//! reentrancy.

mod local;

pub use local::LocalLockCoordinator;

use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Logical identifier of a lockable resource.
///
/// The name is `"{tenant}-{resource}"` (tenant empty when absent); the numeric
/// id is a 63-bit hash of the name, usable as a database advisory lock id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    name: String,
    id: u64,
}

impl ResourceKey {
    /// Key for a parent resource, scoped to its owning tenant
    pub fn new(tenant_id: Option<Uuid>, resource_id: Uuid) -> Self {
        let tenant = tenant_id.map(|t| t.to_string()).unwrap_or_default();
        Self::from_name(format!("{}-{}", tenant, resource_id))
    }

    /// Key from an arbitrary name
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        let id = lock_id(&name);
        Self { name, id }
    }

    #[cfg(test)]
    pub(crate) fn with_id(name: &str, id: u64) -> Self {
        Self {
            name: name.to_string(),
            id,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 63-bit lock id (MSB always clear)
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

fn lock_id(name: &str) -> u64 {
    let digest = Sha256::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes) & 0x7fff_ffff_ffff_ffff
}

/// What to do when a key is already held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LockWaitPolicy {
    /// Single non-blocking attempt
    FailFast,
    /// Wait for the holder, optionally bounded
    Block {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// Bounded non-blocking attempts with exponential backoff and jitter
    Retry {
        attempts: u32,
        delay_ms: u64,
        max_jitter_ms: u64,
    },
}

impl Default for LockWaitPolicy {
    fn default() -> Self {
        LockWaitPolicy::Retry {
            attempts: 3,
            delay_ms: 300,
            max_jitter_ms: 100,
        }
    }
}

/// Exclusive, transaction-scoped mutex keyed by [`ResourceKey`]
pub trait LockCoordinator: Send + Sync + fmt::Debug {
    /// Take the lock if free; `Ok(false)` if held
    fn try_acquire(&self, key: &ResourceKey) -> Result<bool>;

    /// Wait until the lock is free (or `timeout` elapses) and take it
    fn acquire_timeout(&self, key: &ResourceKey, timeout: Option<Duration>) -> Result<bool>;

    /// Release a held lock
    fn release(&self, key: &ResourceKey);
}

/// Held lock; released on drop
pub struct LockGuard {
    coordinator: Arc<dyn LockCoordinator>,
    key: ResourceKey,
}

impl LockGuard {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("key", &self.key).finish()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.coordinator.release(&self.key);
        tracing::debug!(lock = %self.key, "Released resource lock");
    }
}

/// Acquire `key` under `policy`.
///
/// Fails with [`Error::LockContention`] when the policy gives up.
pub fn acquire(
    coordinator: &Arc<dyn LockCoordinator>,
    key: &ResourceKey,
    policy: &LockWaitPolicy,
) -> Result<LockGuard> {
    let acquired = match *policy {
        LockWaitPolicy::FailFast => coordinator.try_acquire(key)?,
        LockWaitPolicy::Block { timeout_ms } => {
            coordinator.acquire_timeout(key, timeout_ms.map(Duration::from_millis))?
        }
        LockWaitPolicy::Retry {
            attempts,
            delay_ms,
            max_jitter_ms,
        } => retry_acquire(coordinator.as_ref(), key, attempts, delay_ms, max_jitter_ms)?,
    };

    if !acquired {
        tracing::warn!(lock = %key, policy = ?policy, "Resource lock is held elsewhere");
        return Err(Error::LockContention(key.name().to_string()));
    }

    tracing::debug!(lock = %key, lock_id = key.id(), "Acquired resource lock");
    Ok(LockGuard {
        coordinator: Arc::clone(coordinator),
        key: key.clone(),
    })
}

fn retry_acquire(
    coordinator: &dyn LockCoordinator,
    key: &ResourceKey,
    attempts: u32,
    delay_ms: u64,
    max_jitter_ms: u64,
) -> Result<bool> {
    let attempts = attempts.max(1);
    let mut rng = rand::thread_rng();

    for attempt in 0..attempts {
        if coordinator.try_acquire(key)? {
            return Ok(true);
        }
        if attempt + 1 < attempts {
            let backoff = delay_ms.saturating_mul(1u64 << attempt.min(16));
            let jitter = if max_jitter_ms > 0 {
                rng.gen_range(0..=max_jitter_ms)
            } else {
                0
            };
            tracing::debug!(lock = %key, attempt, backoff_ms = backoff + jitter, "Retrying lock");
            std::thread::sleep(Duration::from_millis(backoff + jitter));
        }
    }

    Ok(false)
}
