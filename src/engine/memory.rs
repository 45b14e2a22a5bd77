use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use umarell_error::PersistResult;

use super::storage::Storage;

/// Byte store kept entirely in process memory.
///
/// Clones share the same map.
#[derive(Clone)]
pub struct InMemoryStore {
    pub data: Arc<DashMap<Arc<str>, Bytes>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for InMemoryStore {
    fn set(
        &self,
        key: &str,
        value: Bytes,
    ) -> PersistResult<()> {
        self.data.insert(Arc::from(key), value);
        Ok(())
    }

    fn get(
        &self,
        key: &str,
    ) -> PersistResult<Option<Bytes>> {
        Ok(self.data.get(key).map(|entry| entry.clone()))
    }

    fn del(
        &self,
        key: &str,
    ) -> PersistResult<bool> {
        Ok(self.data.remove(key).is_some())
    }

    fn keys(&self) -> PersistResult<Vec<String>> {
        Ok(self.data.iter().map(|e| e.key().to_string()).collect())
    }

    fn flushdb(&self) -> PersistResult<()> {
        self.data.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tests that setting a value and then getting it return the same value.
    #[test]
    fn test_set_and_get() {
        let store = InMemoryStore::new();
        store.set("kin", Bytes::from_static(b"dzadza")).unwrap();
        assert_eq!(
            store.get("kin").unwrap(),
            Some(Bytes::from_static(b"dzadza"))
        );
    }

    #[test]
    fn test_overwrite_value() {
        let store = InMemoryStore::new();
        store.set("k", Bytes::from_static(b"1")).unwrap();
        store.set("k", Bytes::from_static(b"2")).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(Bytes::from_static(b"2")));
        assert_eq!(store.len(), 1);
    }

    /// Deleting reports whether the key was there.
    #[test]
    fn test_delete() {
        let store = InMemoryStore::new();
        store.set("k", Bytes::from_static(b"v")).unwrap();
        assert!(store.del("k").unwrap());
        assert!(!store.del("k").unwrap());
        assert_eq!(store.get("k").unwrap(), None);
    }

    /// Clones see each other's writes.
    #[test]
    fn test_clones_share_data() {
        let a = InMemoryStore::new();
        let b = a.clone();
        a.set("shared", Bytes::from_static(b"x")).unwrap();
        assert!(b.get("shared").unwrap().is_some());
    }

    #[test]
    fn test_flushdb() {
        let store = InMemoryStore::new();
        store.set("a", Bytes::from_static(b"1")).unwrap();
        store.set("b", Bytes::from_static(b"2")).unwrap();
        store.flushdb().unwrap();
        assert!(store.is_empty());
        assert!(store.keys().unwrap().is_empty());
    }
}
