use std::{any::Any, fmt, sync::Arc};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use umarell_error::{PersistError, PersistResult};

/// A value published on a channel.
///
/// The serializable variants can be kept by the durable tier. `Opaque` carries
/// any `Send + Sync` Rust value and is delivered as is, but has no serialized
/// form: durable persistence of it degrades to no persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    Json(serde_json::Value),
    Opaque(OpaqueValue),
}

/// Shared, type-erased payload. Two opaque values are equal when they point at
/// the same allocation.
#[derive(Clone)]
pub struct OpaqueValue {
    inner: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

/// Policy for retaining a published value beyond the channel's own memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PersistOption {
    /// Only the channel keeps the value.
    #[default]
    None,
    /// Also kept in the volatile tier of the store.
    Memory,
    /// Also written to the durable tier; requires a serializable value.
    Durable,
}

/// Whether a new subscriber is handed the channel's last value right away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SubscribeOption {
    /// Only values published after the subscription are delivered.
    #[default]
    None,
    /// The last known value is delivered before `subscribe` returns.
    ReadPrevious,
}

/// Serialized shape of a [`Value`] as stored by the durable tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PersistedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Bytes),
    Json(serde_json::Value),
}

impl OpaqueValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for OpaqueValue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "Opaque<{}>", self.type_name)
    }
}

impl PartialEq for OpaqueValue {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Value {
    /// Wraps an arbitrary value.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Value::Opaque(OpaqueValue::new(value))
    }

    /// Serializes `value` into a `Json` value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Value::Json)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Opaque(opaque) => opaque.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Value::Json(j) => Some(j),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, or the Rust type behind an opaque value.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Json(_) => "json",
            Value::Opaque(opaque) => opaque.type_name(),
        }
    }

    /// Whether the durable tier can keep this value.
    ///
    /// Non-finite floats have no JSON representation and count as
    /// non-serializable.
    pub fn is_serializable(&self) -> bool {
        match self {
            Value::Opaque(_) => false,
            Value::Float(f) => f.is_finite(),
            _ => true,
        }
    }

    /// Converts into the stored shape, failing with `NotSerializable` for
    /// values the durable tier cannot keep. `key` only feeds the error.
    pub fn to_persisted(
        &self,
        key: &str,
    ) -> PersistResult<PersistedValue> {
        let persisted = match self {
            Value::Null => PersistedValue::Null,
            Value::Bool(b) => PersistedValue::Bool(*b),
            Value::Int(n) => PersistedValue::Int(*n),
            Value::Float(f) if f.is_finite() => PersistedValue::Float(*f),
            Value::Str(s) => PersistedValue::Str(s.clone()),
            Value::Bytes(b) => PersistedValue::Bytes(b.clone()),
            Value::Json(j) => PersistedValue::Json(j.clone()),
            Value::Float(_) | Value::Opaque(_) => {
                return Err(PersistError::not_serializable(key, self.type_name()))
            }
        };
        Ok(persisted)
    }
}

impl From<PersistedValue> for Value {
    fn from(value: PersistedValue) -> Self {
        match value {
            PersistedValue::Null => Value::Null,
            PersistedValue::Bool(b) => Value::Bool(b),
            PersistedValue::Int(n) => Value::Int(n),
            PersistedValue::Float(f) => Value::Float(f),
            PersistedValue::Str(s) => Value::Str(s),
            PersistedValue::Bytes(b) => Value::Bytes(b),
            PersistedValue::Json(j) => Value::Json(j),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Bytes> for Value {
    fn from(b: Bytes) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}
