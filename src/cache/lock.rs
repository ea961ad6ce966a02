//! TTL locks in the shared cache.
//!
//! A subject is locked while any sync routine works on it. Locks are
//! advisory and expire after their TTL, so a crashed run cannot block a
//! subject forever.
//!
//! Two acquisition modes:
//! - [`SubjectLocks::try_acquire`] is strict: any existing lock means busy.
//!   Entry points triggered from outside use it, which also stops a save
//!   that re-triggers an on-change sync from recursing.
//! - [`SubjectLocks::enter`] is re-entrant: if this instance already holds
//!   the subject's lock the caller proceeds with a guard that releases
//!   nothing.
//!
//! Each acquisition stores a fresh token as the cache value. Release only
//! deletes the key while it still holds that token, so a run that outlived
//! its TTL cannot drop a lock taken since by another invocation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::SharedCache;
use crate::error::{Error, Result};

/// Lock key of the exclusive bulk sync job.
pub const JOB_LOCK_KEY: &str = "crm-sync-job";

/// Shared-cache key of a subject lock.
#[must_use]
pub fn lock_key(subject_id: i64) -> String {
    format!("crm-sync-block.{subject_id}")
}

struct LockState {
    cache: Arc<dyn SharedCache>,
    held: Mutex<HashSet<String>>,
}

impl LockState {
    fn release(&self, key: &str, token: &str) {
        if let Ok(mut held) = self.held.lock() {
            held.remove(key);
        }
        match self.cache.delete_if(key, token) {
            Ok(true) => {}
            Ok(false) => tracing::debug!(key, "Lock expired or taken over before release"),
            Err(e) => tracing::warn!(key, error = %e, "Failed to release lock"),
        }
    }
}

/// Lock manager of one engine instance.
#[derive(Clone)]
pub struct SubjectLocks {
    state: Arc<LockState>,
    ttl: Duration,
}

impl SubjectLocks {
    #[must_use]
    pub fn new(cache: Arc<dyn SharedCache>, ttl: Duration) -> Self {
        Self {
            state: Arc::new(LockState {
                cache,
                held: Mutex::new(HashSet::new()),
            }),
            ttl,
        }
    }

    /// Strictly acquire the subject lock. `None` if anyone holds it.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockStore` if the cache fails.
    pub fn try_acquire(&self, subject_id: i64) -> Result<Option<LockGuard>> {
        self.try_acquire_key(&lock_key(subject_id))
    }

    /// Strictly acquire an arbitrary lock key.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockStore` if the cache fails.
    pub fn try_acquire_key(&self, key: &str) -> Result<Option<LockGuard>> {
        if self.holds_key(key)? {
            return Ok(None);
        }
        let token = uuid::Uuid::new_v4().to_string();
        if !self.state.cache.add(key, &token, self.ttl)? {
            return Ok(None);
        }
        self.held()?.insert(key.to_string());
        Ok(Some(LockGuard {
            state: Arc::clone(&self.state),
            key: key.to_string(),
            token: Some(token),
        }))
    }

    /// Re-entrantly acquire the subject lock. `None` if another invocation holds it.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockStore` if the cache fails.
    pub fn enter(&self, subject_id: i64) -> Result<Option<LockGuard>> {
        let key = lock_key(subject_id);
        if self.holds_key(&key)? {
            return Ok(Some(LockGuard {
                state: Arc::clone(&self.state),
                key,
                token: None,
            }));
        }
        self.try_acquire_key(&key)
    }

    /// Whether any invocation holds a live lock on the subject.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockStore` if the cache fails.
    pub fn is_locked(&self, subject_id: i64) -> Result<bool> {
        Ok(self.state.cache.get(&lock_key(subject_id))?.is_some())
    }

    /// Whether this instance holds the subject lock.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockStore` if the held set is poisoned.
    pub fn holds(&self, subject_id: i64) -> Result<bool> {
        self.holds_key(&lock_key(subject_id))
    }

    fn holds_key(&self, key: &str) -> Result<bool> {
        Ok(self.held()?.contains(key))
    }

    fn held(&self) -> Result<std::sync::MutexGuard<'_, HashSet<String>>> {
        self.state
            .held
            .lock()
            .map_err(|_| Error::LockStore("held lock set poisoned".into()))
    }
}

/// Releases its lock on drop when it acquired it.
pub struct LockGuard {
    state: Arc<LockState>,
    key: String,
    /// Set only on the guard that acquired the lock.
    token: Option<String>,
}

impl LockGuard {
    /// Whether dropping this guard releases the lock.
    #[must_use]
    pub const fn is_owner(&self) -> bool {
        self.token.is_some()
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(token) = &self.token {
            self.state.release(&self.key, token);
        }
    }
}
