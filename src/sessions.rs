use crate::crm::Crm;
use crate::store::StoreError;

/// Default number of concurrently cached sessions.
pub const SESSION_CAPACITY: usize = 8;

/// Bounded LRU of live `Crm` handles, keyed by credential + workbook.
///
/// Each entry owns a backend connection and a row cache, so an unbounded map
/// would grow with every distinct token seen. The least recently used session
/// is dropped once the capacity is reached; recreating one later is just a
/// re-open plus a cold cache.
pub struct SessionCache {
    capacity: usize,
    // most recently used last; linear scans are fine at this size
    entries: Vec<(String, Crm)>,
}

impl SessionCache {
    pub fn new(capacity: usize) -> SessionCache {
        SessionCache {
            capacity: capacity.max(1),
            entries: Vec::new(),
        }
    }

    pub fn key(token: &str, workbook: &str) -> String {
        format!("{token}::{workbook}")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Fetch the session for `key`, creating it with `open` on a miss. The
    /// returned handle is marked most recently used either way.
    pub fn get_or_open(
        &mut self,
        key: &str,
        open: impl FnOnce() -> Result<Crm, StoreError>,
    ) -> Result<&mut Crm, StoreError> {
        if let Some(pos) = self.entries.iter().position(|(k, _)| k == key) {
            let entry = self.entries.remove(pos);
            self.entries.push(entry);
        } else {
            let crm = open()?;
            if self.entries.len() == self.capacity {
                let (evicted, _) = self.entries.remove(0);
                log::debug!("evicting session {evicted}");
            }
            self.entries.push((key.to_string(), crm));
        }
        // just pushed or moved to the back
        let (_, crm) = self.entries.last_mut().ok_or_else(|| {
            StoreError::Remote("session cache unexpectedly empty".to_string())
        })?;
        Ok(crm)
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(SESSION_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::DEFAULT_WORKBOOK;
    use crate::local::LocalStore;
    use crate::store::TableBackend;

    fn open_session() -> Result<Crm, StoreError> {
        let store = LocalStore::new();
        let wb = store.create_workbook(DEFAULT_WORKBOOK)?;
        Ok(Crm::new(Box::new(store), wb))
    }

    #[test]
    fn test_miss_creates_and_hit_reuses() {
        let mut cache = SessionCache::new(2);
        cache.get_or_open("a", open_session).unwrap();
        assert_eq!(cache.len(), 1);
        // a hit must not invoke the opener
        cache
            .get_or_open("a", || {
                panic!("opener called on cache hit");
            })
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used() {
        let mut cache = SessionCache::new(2);
        cache.get_or_open("a", open_session).unwrap();
        cache.get_or_open("b", open_session).unwrap();
        // touch "a" so "b" becomes the eviction candidate
        cache.get_or_open("a", open_session).unwrap();
        cache.get_or_open("c", open_session).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.contains("a"));
        assert!(cache.contains("c"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut cache = SessionCache::new(0);
        cache.get_or_open("a", open_session).unwrap();
        assert_eq!(cache.len(), 1);
        cache.get_or_open("b", open_session).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.contains("b"));
    }

    #[test]
    fn test_key_format() {
        assert_eq!(SessionCache::key("tok", "wb"), "tok::wb");
    }
}
