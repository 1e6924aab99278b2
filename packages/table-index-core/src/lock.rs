//! Exclusive leased locks on named resources.
//!
//! ```text
//! (free) ─── try_acquire() ──→ Held ─── release() ──→ (free)
//!                               │  ↺ renew()
//!                               └── lease expires ──→ (free)
//! ```
//!
//! Acquisition never blocks: a contended key reports
//! [`SyncError::LockUnavailable`] immediately. A holder that stops renewing
//! loses the lease once it expires, so a crashed worker cannot wedge a table.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::{Result, SyncError};

/// Proof of ownership of a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockHandle {
    /// Resource key (e.g. "table:syn123")
    pub key: String,
    /// Unique id of this lease grant
    pub lease_id: u64,
    /// Lease duration applied on acquire and on every renewal
    pub timeout: Duration,
}

/// Exclusive lock manager contract.
pub trait ExclusiveLockManager: Send + Sync {
    /// Grants the lease if no live lease exists for `key`.
    fn try_acquire(&self, key: &str, timeout: Duration) -> Result<LockHandle>;

    /// Extends the lease by its timeout. Fails with `LockLost` if the lease is gone.
    fn renew(&self, handle: &LockHandle) -> Result<()>;

    /// Releases the lease if `handle` still owns it.
    fn release(&self, handle: &LockHandle) -> Result<()>;

    /// Drops every lease. Returns the number of leases released.
    fn force_release_all(&self) -> Result<usize>;
}

#[derive(Debug)]
struct Lease {
    lease_id: u64,
    expires_at: Instant,
}

/// In-process lock manager.
#[derive(Debug, Default)]
pub struct InMemoryLockManager {
    leases: Mutex<HashMap<String, Lease>>,
    next_lease_id: AtomicU64,
}

impl InMemoryLockManager {
    /// Creates a lock manager with no leases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if a live lease exists for `key`.
    pub fn is_held(&self, key: &str) -> Result<bool> {
        let leases = self.leases.lock().map_err(|_| SyncError::LockPoisoned)?;
        Ok(leases
            .get(key)
            .is_some_and(|lease| lease.expires_at > Instant::now()))
    }
}

impl ExclusiveLockManager for InMemoryLockManager {
    fn try_acquire(&self, key: &str, timeout: Duration) -> Result<LockHandle> {
        let mut leases = self.leases.lock().map_err(|_| SyncError::LockPoisoned)?;
        let now = Instant::now();
        if let Some(existing) = leases.get(key) {
            if existing.expires_at > now {
                return Err(SyncError::LockUnavailable {
                    key: key.to_string(),
                });
            }
            tracing::debug!(key, lease_id = existing.lease_id, "Reclaiming expired lease");
        }

        let lease_id = self.next_lease_id.fetch_add(1, Ordering::SeqCst) + 1;
        leases.insert(
            key.to_string(),
            Lease {
                lease_id,
                expires_at: now + timeout,
            },
        );
        Ok(LockHandle {
            key: key.to_string(),
            lease_id,
            timeout,
        })
    }

    fn renew(&self, handle: &LockHandle) -> Result<()> {
        let mut leases = self.leases.lock().map_err(|_| SyncError::LockPoisoned)?;
        let now = Instant::now();
        match leases.get_mut(&handle.key) {
            Some(lease) if lease.lease_id == handle.lease_id && lease.expires_at > now => {
                lease.expires_at = now + handle.timeout;
                Ok(())
            }
            _ => Err(SyncError::LockLost {
                key: handle.key.clone(),
            }),
        }
    }

    fn release(&self, handle: &LockHandle) -> Result<()> {
        let mut leases = self.leases.lock().map_err(|_| SyncError::LockPoisoned)?;
        if leases
            .get(&handle.key)
            .is_some_and(|lease| lease.lease_id == handle.lease_id)
        {
            leases.remove(&handle.key);
        }
        Ok(())
    }

    fn force_release_all(&self) -> Result<usize> {
        let mut leases = self.leases.lock().map_err(|_| SyncError::LockPoisoned)?;
        let released = leases.len();
        leases.clear();
        Ok(released)
    }
}

/// Lease that is released when dropped.
pub struct LeaseGuard<'a> {
    manager: &'a dyn ExclusiveLockManager,
    handle: Option<LockHandle>,
}

impl<'a> LeaseGuard<'a> {
    /// Acquires `key` without blocking.
    pub fn try_acquire(
        manager: &'a dyn ExclusiveLockManager,
        key: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let handle = manager.try_acquire(key, timeout)?;
        Ok(Self {
            manager,
            handle: Some(handle),
        })
    }

    /// Returns the lease handle.
    pub fn handle(&self) -> Option<&LockHandle> {
        self.handle.as_ref()
    }

    /// Heartbeat: extends the lease.
    pub fn renew(&self) -> Result<()> {
        match &self.handle {
            Some(handle) => self.manager.renew(handle),
            None => Err(SyncError::LockLost {
                key: String::new(),
            }),
        }
    }

    /// Releases the lease now.
    pub fn release(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.manager.release(&handle),
            None => Ok(()),
        }
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.manager.release(&handle) {
                tracing::warn!(key = %handle.key, "Failed to release lease: {}", e);
            }
        }
    }
}

/// Identity of a caller of administrative operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub name: String,
    pub is_admin: bool,
}

/// Operator entry points for lock recovery.
#[derive(Clone)]
pub struct LockAdministration {
    manager: Arc<dyn ExclusiveLockManager>,
}

impl LockAdministration {
    /// Wraps a lock manager.
    pub fn new(manager: Arc<dyn ExclusiveLockManager>) -> Self {
        Self { manager }
    }

    /// Releases every lock. Only administrators may call this.
    pub fn release_all_locks_as_admin(&self, caller: &Caller) -> Result<usize> {
        if !caller.is_admin {
            return Err(SyncError::Unauthorized(format!(
                "'{}' is not an administrator",
                caller.name
            )));
        }
        let released = self.manager.force_release_all()?;
        tracing::warn!(caller = %caller.name, released, "Force released all locks");
        Ok(released)
    }
}
