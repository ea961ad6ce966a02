//! Shared cache and locks.
//!
//! The shared cache is the only state shared between sync invocations. It
//! holds TTL-bound lock markers: one per subject being synced and one for
//! the bulk job.

mod lock;
mod memory;

pub use lock::{lock_key, LockGuard, SubjectLocks, JOB_LOCK_KEY};
pub use memory::MemoryCache;

use std::time::Duration;

use crate::error::Result;

/// Key/value store with per-entry expiry, shared across invocations.
pub trait SharedCache: Send + Sync {
    /// Store `value` under `key` for `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Live value under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    fn delete(&self, key: &str) -> Result<()>;

    /// Delete `key` only while it still holds `value`. Returns whether it was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    fn delete_if(&self, key: &str, value: &str) -> Result<bool> {
        if self.get(key)?.as_deref() != Some(value) {
            return Ok(false);
        }
        self.delete(key)?;
        Ok(true)
    }

    /// Store `value` only if `key` holds no live value. Returns whether it was stored.
    ///
    /// Implementations should make this atomic; the default is check-then-set.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        if self.get(key)?.is_some() {
            return Ok(false);
        }
        self.set(key, value, ttl)?;
        Ok(true)
    }
}
