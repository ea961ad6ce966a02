//! In-process TTL cache.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::SharedCache;
use crate::error::{Error, Result};

/// Cache shared by engines inside one process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, (String, Instant)>>> {
        self.entries
            .lock()
            .map_err(|_| Error::LockStore("memory cache mutex poisoned".into()))
    }
}

impl SharedCache for MemoryCache {
    fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.entries()?
            .insert(key.to_string(), (value.to_string(), expiry(Instant::now(), ttl)));
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries()?;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn delete_if(&self, key: &str, value: &str) -> Result<bool> {
        let mut entries = self.entries()?;
        if entries.get(key).is_some_and(|(current, _)| current == value) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    fn add(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut entries = self.entries()?;
        let now = Instant::now();
        if entries.get(key).is_some_and(|(_, expires)| *expires > now) {
            return Ok(false);
        }
        entries.insert(key.to_string(), (value.to_string(), expiry(now, ttl)));
        Ok(true)
    }
}

/// Expiry instant, saturating at a century for oversized TTLs.
fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(FAR_FUTURE))
        .unwrap_or(now)
}

const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v"));
        cache.delete("k").unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::ZERO).unwrap();
        assert_eq!(cache.get("k").unwrap(), None);
    }

    #[test]
    fn test_add_only_when_absent() {
        let cache = MemoryCache::new();
        assert!(cache.add("k", "1", Duration::from_secs(60)).unwrap());
        assert!(!cache.add("k", "2", Duration::from_secs(60)).unwrap());
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("1"));

        cache.set("expired", "1", Duration::ZERO).unwrap();
        assert!(cache.add("expired", "2", Duration::from_secs(60)).unwrap());
    }

    #[test]
    fn test_oversized_ttl_saturates() {
        let cache = MemoryCache::new();
        assert!(cache.add("k", "1", Duration::MAX).unwrap());
        assert!(!cache.add("k", "2", Duration::from_secs(60)).unwrap());
        cache.set("k", "3", Duration::MAX).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("3"));
    }
}
