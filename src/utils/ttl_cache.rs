//! Generic read-mostly TTL cache keyed by a hashable identity.
//!
//! Backs the Profile Validator, Health Monitor, and Resource Supervisor
//! caches (spec §5: "read-mostly; writes are serialized per key"),
//! generalizing the donor's DashMap-keyed cache pattern
//! (`services/mysql_pool_manager.rs`) from connection pools to any
//! TTL-bounded value.

use crate::utils::clock::Clock;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

struct Entry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

pub struct TtlCache<K, V> {
    entries: DashMap<K, Entry<V>>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self { entries: DashMap::new(), ttl: chrono::Duration::seconds(ttl_secs as i64), clock }
    }

    /// Returns the cached value if present and unexpired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entry = self.entries.get(key)?;
        if entry.expires_at > now {
            Some(entry.value.clone())
        } else {
            None
        }
    }

    pub fn insert(&self, key: K, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries.insert(key, Entry { value, expires_at });
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::FixedClock;

    #[test]
    fn expires_after_ttl() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let cache: TtlCache<String, i32> = TtlCache::new(30, clock.clone());
        cache.insert("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));
        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(cache.get(&"a".to_string()), None);
    }
}
