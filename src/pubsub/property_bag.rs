use std::{
    collections::{BTreeMap, HashMap},
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::{Mutex, RwLock};
use umarell_error::ObserveError;

use super::{ChangeHandler, ListenerHandle, Observable, Value};

/// A set of named [`Value`] properties that notifies listeners on change.
///
/// Useful for hosts without their own object model:
///
/// ```
/// use std::sync::Arc;
/// use umarell::{Broker, PropertyBag, PropertyObserver, Subscriber, Value};
///
/// let observer = PropertyObserver::new(Arc::new(Broker::in_memory()));
/// let counter = Arc::new(PropertyBag::with_properties([("count", Value::Int(0))]));
/// let me = Subscriber::new();
///
/// observer
///     .observe(&counter, "count", &me, |value, property| {
///         println!("{property} = {value:?}");
///     })
///     .unwrap();
/// counter.set("count", 1);
/// ```
#[derive(Default)]
pub struct PropertyBag {
    values: RwLock<BTreeMap<String, Value>>,
    listeners: Mutex<HashMap<ListenerHandle, (String, ChangeHandler)>>,
    next_handle: AtomicU64,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_properties<I, K>(properties: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let bag = Self::new();
        {
            let mut values = bag.values.write();
            for (name, value) in properties {
                values.insert(name.into(), value);
            }
        }
        bag
    }

    /// Declares `name` without notifying anyone. Existing values are kept.
    pub fn define(
        &self,
        name: impl Into<String>,
        initial: impl Into<Value>,
    ) {
        self.values
            .write()
            .entry(name.into())
            .or_insert_with(|| initial.into());
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Option<Value> {
        self.values.read().get(name).cloned()
    }

    /// Stores `value` under `name`, defining the property if needed, then
    /// calls the property's listeners. Returns the previous value.
    pub fn set(
        &self,
        name: &str,
        value: impl Into<Value>,
    ) -> Option<Value> {
        let value = value.into();
        let previous = self
            .values
            .write()
            .insert(name.to_string(), value.clone());

        let handlers: Vec<ChangeHandler> = self
            .listeners
            .lock()
            .values()
            .filter(|(property, _)| property == name)
            .map(|(_, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(&value);
        }
        previous
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Observable for PropertyBag {
    fn add_listener(
        &self,
        property: &str,
        handler: ChangeHandler,
    ) -> Result<ListenerHandle, ObserveError> {
        if !self.values.read().contains_key(property) {
            return Err(ObserveError::unknown_property(property));
        }
        let handle = ListenerHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .insert(handle, (property.to_string(), handler));
        Ok(handle)
    }

    fn remove_listener(
        &self,
        handle: ListenerHandle,
    ) {
        self.listeners.lock().remove(&handle);
    }

    fn properties(&self) -> Vec<String> {
        self.values.read().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_set_notifies_matching_listeners() {
        let bag = PropertyBag::with_properties([("a", Value::Null), ("b", Value::Null)]);
        let hits = Arc::new(Mutex::new(Vec::new()));
        let h = hits.clone();
        bag.add_listener("a", Arc::new(move |v: &Value| h.lock().push(v.clone())))
            .unwrap();

        bag.set("b", 1);
        bag.set("a", 2);
        assert_eq!(*hits.lock(), vec![Value::Int(2)]);
    }

    #[test]
    fn test_unknown_property_rejected() {
        let bag = PropertyBag::new();
        let err = bag.add_listener("nope", Arc::new(|_: &Value| {})).unwrap_err();
        assert_eq!(err, ObserveError::unknown_property("nope"));
    }

    /// `define` keeps an existing value, `set` returns the previous one.
    #[test]
    fn test_define_and_set() {
        let bag = PropertyBag::new();
        bag.define("n", 1);
        bag.define("n", 2);
        assert_eq!(bag.get("n"), Some(Value::Int(1)));
        assert_eq!(bag.set("n", 3), Some(Value::Int(1)));
        assert_eq!(bag.properties(), vec!["n".to_string()]);
    }

    #[test]
    fn test_remove_listener() {
        let bag = PropertyBag::with_properties([("x", Value::Null)]);
        let handle = bag.add_listener("x", Arc::new(|_: &Value| {})).unwrap();
        assert_eq!(bag.listener_count(), 1);
        bag.remove_listener(handle);
        bag.remove_listener(handle);
        assert_eq!(bag.listener_count(), 0);
    }
}
