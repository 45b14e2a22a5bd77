use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tracing::trace;
use umarell_error::{PersistError, PersistResult};

use super::{StorageEngine, Tier};
use crate::{
    config::StorageConfig,
    engine::PersistenceStore,
    pubsub::{PersistedValue, Value},
};

/// Default [`PersistenceStore`]: a volatile map for the memory tier and a
/// [`StorageEngine`] holding JSON-encoded values for the durable tier.
pub struct TieredStore {
    volatile: DashMap<Arc<str>, Value>,
    durable: StorageEngine,
}

impl TieredStore {
    pub fn new(durable: StorageEngine) -> Self {
        Self {
            volatile: DashMap::new(),
            durable,
        }
    }

    /// Both tiers in memory; nothing outlives the process.
    pub fn in_memory() -> Self {
        Self::new(StorageEngine::default())
    }

    pub fn from_config(config: &StorageConfig) -> PersistResult<Self> {
        StorageEngine::initialize(config).map(Self::new)
    }

    pub fn durable(&self) -> &StorageEngine {
        &self.durable
    }
}

impl Default for TieredStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn encode(
    key: &str,
    value: &Value,
) -> PersistResult<Bytes> {
    let persisted = value.to_persisted(key)?;
    serde_json::to_vec(&persisted)
        .map(Bytes::from)
        .map_err(|e| PersistError::Encode {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

fn decode(
    key: &str,
    raw: &[u8],
) -> PersistResult<Value> {
    serde_json::from_slice::<PersistedValue>(raw)
        .map(Value::from)
        .map_err(|e| PersistError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

impl PersistenceStore for TieredStore {
    fn put(
        &self,
        key: &str,
        value: &Value,
        tier: Tier,
    ) -> PersistResult<()> {
        match tier {
            Tier::Memory => {
                self.volatile.insert(Arc::from(key), value.clone());
                Ok(())
            }
            Tier::Durable => {
                let raw = encode(key, value)?;
                trace!(key, bytes = raw.len(), "Writing durable value");
                self.durable.set(key, raw)
            }
        }
    }

    fn get(
        &self,
        key: &str,
        tier: Tier,
    ) -> PersistResult<Option<Value>> {
        match tier {
            Tier::Memory => Ok(self.volatile.get(key).map(|e| e.clone())),
            Tier::Durable => match self.durable.get(key)? {
                Some(raw) => decode(key, &raw).map(Some),
                None => Ok(None),
            },
        }
    }

    fn delete(
        &self,
        key: &str,
        tier: Tier,
    ) -> PersistResult<()> {
        match tier {
            Tier::Memory => {
                self.volatile.remove(key);
                Ok(())
            }
            Tier::Durable => self.durable.del(key).map(|_| ()),
        }
    }

    fn delete_all(
        &self,
        tier: Tier,
    ) -> PersistResult<()> {
        match tier {
            Tier::Memory => {
                self.volatile.clear();
                Ok(())
            }
            Tier::Durable => self.durable.flushdb(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    /// Tiers are independent key spaces.
    #[test]
    fn test_tiers_are_separate() {
        let store = TieredStore::in_memory();
        store.put("ch", &Value::from(1), Tier::Memory).unwrap();
        assert_eq!(store.get("ch", Tier::Memory).unwrap(), Some(Value::Int(1)));
        assert_eq!(store.get("ch", Tier::Durable).unwrap(), None);

        store.put("ch", &Value::from("d"), Tier::Durable).unwrap();
        store.delete("ch", Tier::Memory).unwrap();
        assert_eq!(store.get("ch", Tier::Memory).unwrap(), None);
        assert_eq!(
            store.get("ch", Tier::Durable).unwrap(),
            Some(Value::from("d"))
        );
    }

    /// The memory tier keeps opaque values, the durable tier rejects them.
    #[test]
    fn test_opaque_only_in_memory_tier() {
        let store = TieredStore::in_memory();
        let v = Value::opaque(vec![1u64, 2, 3]);
        store.put("frames", &v, Tier::Memory).unwrap();
        assert_eq!(store.get("frames", Tier::Memory).unwrap(), Some(v.clone()));

        let err = store.put("frames", &v, Tier::Durable).unwrap_err();
        assert!(matches!(err, PersistError::NotSerializable { .. }));
        assert_eq!(store.get("frames", Tier::Durable).unwrap(), None);
    }

    #[test]
    fn test_durable_json_round_trip() {
        let store = TieredStore::in_memory();
        let v = Value::Json(json!({"theme": "dark", "size": 12}));
        store.put("prefs", &v, Tier::Durable).unwrap();
        assert_eq!(store.get("prefs", Tier::Durable).unwrap(), Some(v));
    }

    /// Garbage in the durable backend surfaces as a decode error.
    #[test]
    fn test_decode_error_on_garbage() {
        let store = TieredStore::in_memory();
        store
            .durable()
            .set("bad", Bytes::from_static(b"not json"))
            .unwrap();
        let err = store.get("bad", Tier::Durable).unwrap_err();
        assert!(matches!(err, PersistError::Decode { .. }));
    }

    #[test]
    fn test_delete_all_per_tier() {
        let store = TieredStore::in_memory();
        store.put("a", &Value::Null, Tier::Memory).unwrap();
        store.put("b", &Value::Null, Tier::Durable).unwrap();
        store.delete_all(Tier::Memory).unwrap();
        assert_eq!(store.get("a", Tier::Memory).unwrap(), None);
        assert_eq!(store.get("b", Tier::Durable).unwrap(), Some(Value::Null));
        store.delete_all(Tier::Durable).unwrap();
        assert_eq!(store.get("b", Tier::Durable).unwrap(), None);
    }
}
