use bytes::Bytes;
use umarell_error::PersistResult;

use crate::pubsub::Value;

/// Persistence tier a value is kept in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Lives as long as the store instance.
    Memory,
    /// Survives a process restart; only serializable values are accepted.
    Durable,
}

/// Contract the broker uses to remember the last value of a channel.
///
/// Keys are channel names. Memory-tier operations never fail; durable `put`
/// fails with `NotSerializable` for values without a serialized form.
pub trait PersistenceStore: Send + Sync {
    fn put(
        &self,
        key: &str,
        value: &Value,
        tier: Tier,
    ) -> PersistResult<()>;
    fn get(
        &self,
        key: &str,
        tier: Tier,
    ) -> PersistResult<Option<Value>>;
    fn delete(
        &self,
        key: &str,
        tier: Tier,
    ) -> PersistResult<()>;
    fn delete_all(
        &self,
        tier: Tier,
    ) -> PersistResult<()>;
}

/// Byte-level key-value backend behind the durable tier.
pub trait Storage: Send + Sync {
    fn set(
        &self,
        key: &str,
        value: Bytes,
    ) -> PersistResult<()>;
    fn get(
        &self,
        key: &str,
    ) -> PersistResult<Option<Bytes>>;
    /// Returns whether the key existed.
    fn del(
        &self,
        key: &str,
    ) -> PersistResult<bool>;
    fn keys(&self) -> PersistResult<Vec<String>>;
    fn flushdb(&self) -> PersistResult<()>;
}
