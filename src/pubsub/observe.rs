use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tracing::{debug, warn};
use umarell_error::ObserveError;

use super::{
    subscriber::WeakSubscriber, Broker, SubscribeOption, Subscriber, SubscriberId, Value,
};

/// Handler an [`Observable`] calls with the new value of a property.
pub type ChangeHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Callback of an observer: the new value and the property that changed.
pub type PropertyCallback = Arc<dyn Fn(&Value, &str) + Send + Sync>;

/// Identifies a listener installed on an [`Observable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(u64);

impl ListenerHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// An object whose named properties report their changes.
pub trait Observable: Send + Sync {
    /// Installs `handler`, to be called after every change of `property`.
    fn add_listener(
        &self,
        property: &str,
        handler: ChangeHandler,
    ) -> Result<ListenerHandle, ObserveError>;

    /// Removes a listener. Unknown handles are ignored.
    fn remove_listener(
        &self,
        handle: ListenerHandle,
    );

    /// Properties that can currently be observed.
    fn properties(&self) -> Vec<String>;
}

/// Which properties a multi-property `observe` call bound.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ObserveReport {
    pub observed: Vec<String>,
    pub failed: Vec<(String, ObserveError)>,
}

impl ObserveReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindingKey {
    object: usize,
    property: Arc<str>,
}

/// Listener installed on one (object, property) pair and the subscribers
/// relying on it.
struct Binding {
    channel: Arc<str>,
    object: Weak<dyn Observable>,
    handle: ListenerHandle,
    subscribers: HashMap<SubscriberId, WeakSubscriber>,
    /// Bumped on every join so a sweep can tell the binding changed under it.
    joins: u64,
    /// Joins whose broker subscription is not registered yet.
    pending: usize,
}

impl Binding {
    fn new(
        channel: Arc<str>,
        object: &Arc<dyn Observable>,
        handle: ListenerHandle,
    ) -> Self {
        Self {
            channel,
            object: Arc::downgrade(object),
            handle,
            subscribers: HashMap::new(),
            joins: 0,
            pending: 0,
        }
    }

    /// Records `subscriber`; its broker subscription follows outside the lock.
    fn admit(
        &mut self,
        subscriber: &Subscriber,
    ) {
        self.subscribers
            .insert(subscriber.id(), subscriber.downgrade());
        self.joins += 1;
        self.pending += 1;
    }

    /// Drops dead subscribers; `true` if the binding is no longer needed.
    fn is_stale(&mut self) -> bool {
        self.subscribers.retain(|_, s| s.is_alive());
        self.subscribers.is_empty() || self.object.strong_count() == 0
    }
}

/// Routes property changes of [`Observable`] objects through a broker.
///
/// Each observed (object, property) pair maps to a synthetic channel. The
/// first observer installs a listener that publishes every change to that
/// channel without persistence; the last one to leave removes it. Bindings
/// whose object or subscribers are gone are swept at the start of every call.
pub struct PropertyObserver {
    broker: Arc<Broker>,
    bindings: Mutex<HashMap<BindingKey, Binding>>,
}

/// Identity of an object, stable while any `Arc` or `Weak` to it exists.
fn object_id(object: &Arc<dyn Observable>) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Name of the channel carrying changes of `property` on the object at
/// `object`.
fn synthetic_channel(
    object: usize,
    property: &str,
) -> String {
    format!("__observed::{object:#x}.{property}")
}

impl PropertyObserver {
    pub fn new(broker: Arc<Broker>) -> Self {
        Self {
            broker,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub fn broker(&self) -> &Arc<Broker> {
        &self.broker
    }

    /// Channel that changes of `property` on `object` are published to.
    pub fn channel_name<O: Observable + 'static>(
        object: &Arc<O>,
        property: &str,
    ) -> String {
        let object: Arc<dyn Observable> = object.clone();
        synthetic_channel(object_id(&object), property)
    }

    /// Calls `on_change` with the new value and the property name after
    /// every change of `property` on `object`, until `subscriber` is dropped
    /// or stops observing.
    pub fn observe<O, F>(
        &self,
        object: &Arc<O>,
        property: &str,
        subscriber: &Subscriber,
        on_change: F,
    ) -> Result<(), ObserveError>
    where
        O: Observable + 'static,
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        self.sweep();
        let object: Arc<dyn Observable> = object.clone();
        self.bind(&object, property, subscriber, Arc::new(on_change))
    }

    /// Observes each of `properties` independently; one failing property
    /// does not prevent the others.
    pub fn observe_many<O, F>(
        &self,
        object: &Arc<O>,
        properties: &[&str],
        subscriber: &Subscriber,
        on_change: F,
    ) -> ObserveReport
    where
        O: Observable + 'static,
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        self.sweep();
        let object: Arc<dyn Observable> = object.clone();
        let callback: PropertyCallback = Arc::new(on_change);

        let mut report = ObserveReport::default();
        for property in properties {
            match self.bind(&object, property, subscriber, callback.clone()) {
                Ok(()) => report.observed.push(property.to_string()),
                Err(err) => {
                    debug!(property, error = %err, "Property not observed");
                    report.failed.push((property.to_string(), err));
                }
            }
        }
        report
    }

    /// Observes every property `object` exposes right now. Properties added
    /// later are not picked up.
    pub fn observe_all<O, F>(
        &self,
        object: &Arc<O>,
        subscriber: &Subscriber,
        on_change: F,
    ) -> ObserveReport
    where
        O: Observable + 'static,
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        let properties = object.properties();
        let names: Vec<&str> = properties.iter().map(String::as_str).collect();
        self.observe_many(object, &names, subscriber, on_change)
    }

    fn bind(
        &self,
        object: &Arc<dyn Observable>,
        property: &str,
        subscriber: &Subscriber,
        callback: PropertyCallback,
    ) -> Result<(), ObserveError> {
        if property.is_empty() {
            return Err(ObserveError::EmptyPropertyName);
        }
        let id = object_id(object);
        let key = BindingKey {
            object: id,
            property: Arc::from(property),
        };

        let channel = match self.join_binding(&key, object, subscriber) {
            Some(channel) => channel,
            None => self.install_binding(key.clone(), object, subscriber)?,
        };

        let property = key.property.clone();
        self.broker.subscribe_callback(
            &channel,
            subscriber,
            SubscribeOption::None,
            Arc::new(move |value: &Value| callback(value, &*property)),
        );
        if let Some(binding) = self.bindings.lock().get_mut(&key) {
            binding.pending = binding.pending.saturating_sub(1);
        }
        Ok(())
    }

    /// Adds `subscriber` to a live binding, returning its channel.
    fn join_binding(
        &self,
        key: &BindingKey,
        object: &Arc<dyn Observable>,
        subscriber: &Subscriber,
    ) -> Option<Arc<str>> {
        let mut bindings = self.bindings.lock();
        let binding = bindings.get_mut(key)?;
        let same_object = binding
            .object
            .upgrade()
            .is_some_and(|bound| Arc::ptr_eq(&bound, object));
        if !same_object {
            return None;
        }
        binding.admit(subscriber);
        Some(binding.channel.clone())
    }

    /// Installs a listener for `key`. The object is called without holding
    /// the bindings lock; if another thread bound the pair meanwhile, its
    /// binding wins and the extra listener is removed.
    fn install_binding(
        &self,
        key: BindingKey,
        object: &Arc<dyn Observable>,
        subscriber: &Subscriber,
    ) -> Result<Arc<str>, ObserveError> {
        let channel: Arc<str> = Arc::from(synthetic_channel(key.object, &key.property));

        let broker = Arc::downgrade(&self.broker);
        let target = channel.clone();
        let handler: ChangeHandler = Arc::new(move |value: &Value| {
            let Some(broker) = broker.upgrade() else {
                return;
            };
            let report = broker.publish(&target, value.clone());
            if report.delivered + report.failed == 0 && broker.subscriber_count(&target) == 0 {
                broker.flush(&target);
            }
        });
        let handle = object.add_listener(&key.property, handler)?;

        let mut bindings = self.bindings.lock();
        if let Some(existing) = bindings.get_mut(&key) {
            if existing.object.strong_count() > 0 {
                existing.admit(subscriber);
                let channel = existing.channel.clone();
                drop(bindings);
                object.remove_listener(handle);
                return Ok(channel);
            }
        }

        let mut binding = Binding::new(channel.clone(), object, handle);
        binding.admit(subscriber);
        let replaced = bindings.insert(key.clone(), binding);
        drop(bindings);

        if let Some(old) = replaced {
            self.teardown(old);
        }
        debug!(channel = %channel, property = %key.property, "Listener installed");
        Ok(channel)
    }

    /// Stops delivering changes of `property` on `object` to `subscriber`.
    /// Returns whether a binding existed for the subscriber.
    pub fn stop_observing<O: Observable + 'static>(
        &self,
        object: &Arc<O>,
        property: &str,
        subscriber: &Subscriber,
    ) -> bool {
        self.sweep();
        let object: Arc<dyn Observable> = object.clone();
        let key = BindingKey {
            object: object_id(&object),
            property: Arc::from(property),
        };
        self.unbind(&key, subscriber.id())
    }

    /// Stops every observation of `object` by `subscriber`. Returns the
    /// number of properties released.
    pub fn stop_observing_all<O: Observable + 'static>(
        &self,
        object: &Arc<O>,
        subscriber: &Subscriber,
    ) -> usize {
        self.sweep();
        let object: Arc<dyn Observable> = object.clone();
        let id = object_id(&object);
        let keys: Vec<BindingKey> = self
            .bindings
            .lock()
            .iter()
            .filter(|(key, binding)| {
                key.object == id && binding.subscribers.contains_key(&subscriber.id())
            })
            .map(|(key, _)| key.clone())
            .collect();

        keys.iter()
            .filter(|key| self.unbind(key, subscriber.id()))
            .count()
    }

    fn unbind(
        &self,
        key: &BindingKey,
        subscriber: SubscriberId,
    ) -> bool {
        let (channel, released) = {
            let mut bindings = self.bindings.lock();
            let Some(binding) = bindings.get_mut(key) else {
                return false;
            };
            if binding.subscribers.remove(&subscriber).is_none() {
                return false;
            }
            let channel = binding.channel.clone();
            let released = if binding.is_stale() {
                bindings.remove(key)
            } else {
                None
            };
            (channel, released)
        };

        self.broker.unsubscribe_id(&channel, subscriber);
        if let Some(binding) = released {
            self.teardown(binding);
        }
        true
    }

    /// Releases bindings whose object is gone, whose subscribers were all
    /// dropped, or whose channel lost every subscriber through the broker
    /// (`unsubscribe`, `unsubscribe_all`). Returns the number released.
    pub fn sweep(&self) -> usize {
        let (mut stale, settled) = {
            let mut bindings = self.bindings.lock();
            let keys: Vec<BindingKey> = bindings
                .iter_mut()
                .filter_map(|(key, binding)| binding.is_stale().then(|| key.clone()))
                .collect();
            let stale: Vec<Binding> = keys.iter().filter_map(|key| bindings.remove(key)).collect();
            let settled: Vec<(BindingKey, Arc<str>, u64)> = bindings
                .iter()
                .filter(|(_, binding)| binding.pending == 0)
                .map(|(key, binding)| (key.clone(), binding.channel.clone(), binding.joins))
                .collect();
            (stale, settled)
        };

        let orphaned: Vec<(BindingKey, u64)> = settled
            .into_iter()
            .filter(|(_, channel, _)| self.broker.subscriber_count(channel) == 0)
            .map(|(key, _, joins)| (key, joins))
            .collect();
        if !orphaned.is_empty() {
            let mut bindings = self.bindings.lock();
            for (key, joins) in orphaned {
                let unchanged = bindings
                    .get(&key)
                    .is_some_and(|binding| binding.pending == 0 && binding.joins == joins);
                if let Some(binding) = unchanged.then(|| bindings.remove(&key)).flatten() {
                    debug!(channel = %binding.channel, "Channel has no subscribers left");
                    stale.push(binding);
                }
            }
        }

        let count = stale.len();
        for binding in stale {
            self.teardown(binding);
        }
        count
    }

    fn teardown(
        &self,
        binding: Binding,
    ) {
        match binding.object.upgrade() {
            Some(object) => object.remove_listener(binding.handle),
            None => warn!(channel = %binding.channel, "Observed object dropped while still observed"),
        }
        for id in binding.subscribers.keys() {
            self.broker.unsubscribe_id(&binding.channel, *id);
        }
        self.broker.flush(&binding.channel);
        debug!(channel = %binding.channel, "Listener removed");
    }

    /// Number of installed listeners.
    pub fn binding_count(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn is_observing<O: Observable + 'static>(
        &self,
        object: &Arc<O>,
        property: &str,
    ) -> bool {
        let object: Arc<dyn Observable> = object.clone();
        let key = BindingKey {
            object: object_id(&object),
            property: Arc::from(property),
        };
        self.bindings.lock().contains_key(&key)
    }
}

impl Drop for PropertyObserver {
    fn drop(&mut self) {
        let bindings: Vec<Binding> = self.bindings.get_mut().drain().map(|(_, b)| b).collect();
        for binding in bindings {
            self.teardown(binding);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::pubsub::PropertyBag;

    fn setup() -> (PropertyObserver, Arc<PropertyBag>) {
        let observer = PropertyObserver::new(Arc::new(Broker::in_memory()));
        let bag = Arc::new(PropertyBag::with_properties([
            ("volume", Value::Int(3)),
            ("muted", Value::Bool(false)),
        ]));
        (observer, bag)
    }

    /// One listener per (object, property) however many subscribers.
    #[test]
    fn test_listener_shared_between_subscribers() {
        let (observer, bag) = setup();
        let a = Subscriber::new();
        let b = Subscriber::new();
        observer.observe(&bag, "volume", &a, |_, _| {}).unwrap();
        observer.observe(&bag, "volume", &b, |_, _| {}).unwrap();
        assert_eq!(bag.listener_count(), 1);
        assert_eq!(observer.binding_count(), 1);

        assert!(observer.stop_observing(&bag, "volume", &a));
        assert_eq!(bag.listener_count(), 1);
        assert!(observer.stop_observing(&bag, "volume", &b));
        assert_eq!(bag.listener_count(), 0);
        assert!(!observer.stop_observing(&bag, "volume", &b));
    }

    #[test]
    fn test_empty_property_is_rejected() {
        let (observer, bag) = setup();
        let sub = Subscriber::new();
        assert_eq!(
            observer.observe(&bag, "", &sub, |_, _| {}),
            Err(ObserveError::EmptyPropertyName)
        );
    }

    /// Dropping the only subscriber releases the listener on the next call.
    #[test]
    fn test_sweep_releases_dropped_subscribers() {
        let (observer, bag) = setup();
        let sub = Subscriber::new();
        observer.observe(&bag, "muted", &sub, |_, _| {}).unwrap();
        drop(sub);

        assert_eq!(observer.sweep(), 1);
        assert_eq!(bag.listener_count(), 0);
        assert!(!observer.is_observing(&bag, "muted"));
    }

    /// A binding whose channel lost its subscribers through the broker is
    /// released by the next sweep.
    #[test]
    fn test_sweep_releases_orphaned_channel() {
        let (observer, bag) = setup();
        let sub = Subscriber::new();
        observer.observe(&bag, "muted", &sub, |_, _| {}).unwrap();
        observer.broker().unsubscribe_all(&sub);

        bag.set("muted", true);
        let channel = PropertyObserver::channel_name(&bag, "muted");
        assert!(!observer.broker().contains_channel(&channel));

        assert_eq!(observer.sweep(), 1);
        assert_eq!(bag.listener_count(), 0);
        assert_eq!(observer.sweep(), 0);
    }

    /// The synthetic channel is flushed and removed with the binding.
    #[test]
    fn test_channel_removed_with_binding() {
        let (observer, bag) = setup();
        let sub = Subscriber::new();
        observer.observe(&bag, "volume", &sub, |_, _| {}).unwrap();
        bag.set("volume", 7);

        let channel = PropertyObserver::channel_name(&bag, "volume");
        assert_eq!(observer.broker().last_value(&channel), Some(Value::Int(7)));

        observer.stop_observing(&bag, "volume", &sub);
        assert!(!observer.broker().contains_channel(&channel));
        assert_eq!(observer.broker().last_value(&channel), None);
    }

    /// Observing again after a full release installs a fresh listener.
    #[test]
    fn test_rebind_after_release() {
        let (observer, bag) = setup();
        let sub = Subscriber::new();
        let calls = Arc::new(AtomicUsize::new(0));

        observer.observe(&bag, "volume", &sub, |_, _| {}).unwrap();
        observer.stop_observing(&bag, "volume", &sub);

        let c = calls.clone();
        observer
            .observe(&bag, "volume", &sub, move |_, _| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        bag.set("volume", 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(bag.listener_count(), 1);
    }

    #[test]
    fn test_channel_name_is_deterministic() {
        let (_, bag) = setup();
        let other = Arc::new(PropertyBag::new());
        let a = PropertyObserver::channel_name(&bag, "volume");
        assert_eq!(a, PropertyObserver::channel_name(&bag, "volume"));
        assert_ne!(a, PropertyObserver::channel_name(&other, "volume"));
        assert!(a.starts_with("__observed::0x"));
        assert!(a.ends_with(".volume"));
    }

    /// Dropping the observer removes every listener it installed.
    #[test]
    fn test_drop_removes_listeners() {
        let (observer, bag) = setup();
        let sub = Subscriber::new();
        let report = observer.observe_all(&bag, &sub, |_, _| {});
        assert_eq!(report.observed.len(), 2);
        assert_eq!(bag.listener_count(), 2);
        drop(observer);
        assert_eq!(bag.listener_count(), 0);
    }
}
