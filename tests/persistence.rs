use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use umarell::{
    Broker, InMemoryStore, PersistOption, PersistenceStore, StorageConfig, StorageEngine,
    SubscribeOption, Subscriber, Tier, TieredStore, Value,
};

fn replay(
    broker: &Broker,
    channel: &str,
) -> Vec<Value> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let sub = Subscriber::new();
    broker.subscribe_with(channel, &sub, SubscribeOption::ReadPrevious, move |v| {
        sink.lock().unwrap().push(v.clone())
    });
    let out = seen.lock().unwrap().clone();
    out
}

/// A durable value survives dropping the broker and reopening the log.
#[test]
fn test_durable_round_trip_across_restart() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::persistent(dir.path().join("bus.aof"));

    {
        let broker = Broker::from_config(&config).unwrap();
        let report = broker.publish_with("prefs", "dark", PersistOption::Durable);
        assert!(report.persisted);
    }

    let broker = Broker::from_config(&config).unwrap();
    assert_eq!(broker.last_value("prefs"), Some(Value::from("dark")));
    assert_eq!(replay(&broker, "prefs"), vec![Value::from("dark")]);
}

/// Memory-tier values do not outlive the store.
#[test]
fn test_memory_tier_is_volatile() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::persistent(dir.path().join("bus.aof"));

    {
        let broker = Broker::from_config(&config).unwrap();
        broker.publish_with("session", 7, PersistOption::Memory);
        assert_eq!(broker.last_value("session"), Some(Value::Int(7)));
    }

    let broker = Broker::from_config(&config).unwrap();
    assert_eq!(broker.last_value("session"), None);
    assert!(replay(&broker, "session").is_empty());
}

/// A memory-tier value is visible to a second broker sharing the store.
#[test]
fn test_memory_tier_shared_between_brokers() {
    let store: Arc<dyn PersistenceStore> = Arc::new(TieredStore::in_memory());
    Broker::new(store.clone()).publish_with("ticker", 1.5, PersistOption::Memory);

    let other = Broker::new(store);
    assert_eq!(replay(&other, "ticker"), vec![Value::Float(1.5)]);
}

/// An opaque value published durably is delivered, not persisted, and the
/// previous durable entry is cleared.
#[test]
fn test_not_serializable_degrades() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::persistent(dir.path().join("bus.aof"));

    {
        let broker = Broker::from_config(&config).unwrap();
        broker.publish_with("frame", "placeholder", PersistOption::Durable);

        let sub = Subscriber::new();
        let hits = Arc::new(Mutex::new(0));
        let h = hits.clone();
        broker.subscribe("frame", &sub, move |_| *h.lock().unwrap() += 1);

        let report = broker.publish_with("frame", Value::opaque(vec![0u8; 4]), PersistOption::Durable);
        assert!(!report.persisted);
        assert_eq!(report.delivered, 1);
        assert_eq!(*hits.lock().unwrap(), 1);
        assert_eq!(broker.metrics().snapshot().persistence_failures, 1);
    }

    let broker = Broker::from_config(&config).unwrap();
    assert_eq!(broker.last_value("frame"), None);
}

/// Flushing removes the durable entry for good.
#[test]
fn test_flush_deletes_durable_entry() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::persistent(dir.path().join("bus.aof"));

    {
        let broker = Broker::from_config(&config).unwrap();
        broker.publish_with("prefs", "dark", PersistOption::Durable);
        broker.flush("prefs");
    }
    assert_eq!(Broker::from_config(&config).unwrap().last_value("prefs"), None);
}

/// Flushing a channel that only exists in the store clears it too.
#[test]
fn test_flush_channel_known_only_to_store() {
    let store = Arc::new(TieredStore::in_memory());
    store
        .put("orphan", &Value::from("left over"), Tier::Durable)
        .unwrap();
    let broker = Broker::new(store.clone());

    assert_eq!(broker.last_value("orphan"), Some(Value::from("left over")));
    assert!(!broker.contains_channel("orphan"));

    broker.flush("orphan");
    assert_eq!(store.get("orphan", Tier::Durable).unwrap(), None);
}

/// Switching a channel from durable to no persistence drops the old entry,
/// so a restart does not resurrect an outdated value.
#[test]
fn test_switching_option_drops_stale_durable_value() {
    let dir = TempDir::new().unwrap();
    let config = StorageConfig::persistent(dir.path().join("bus.aof"));

    {
        let broker = Broker::from_config(&config).unwrap();
        broker.publish_with("mode", "old", PersistOption::Durable);
        broker.publish("mode", "new");
        assert_eq!(broker.last_value("mode"), Some(Value::from("new")));
    }
    assert_eq!(Broker::from_config(&config).unwrap().last_value("mode"), None);
}

/// The durable tier can sit on any `StorageEngine`.
#[test]
fn test_tiered_store_over_memory_engine() {
    let backend = InMemoryStore::new();
    let store = TieredStore::new(StorageEngine::InMemory(backend.clone()));
    store
        .put("json", &Value::Json(serde_json::json!({"a": [1, 2]})), Tier::Durable)
        .unwrap();
    assert_eq!(backend.len(), 1);
}
