use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
};

use super::Value;

/// Callback invoked with every value delivered on a channel.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// Numeric identity of a [`Subscriber`], unique for the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Registration token identifying a consumer.
///
/// The broker only keeps a weak reference to the token. Once every clone of a
/// `Subscriber` is dropped its subscriptions stop firing and are pruned the
/// next time their channel is touched, so a consumer that embeds its token
/// never has to unsubscribe before going away.
///
/// ```
/// use umarell::{Broker, Subscriber};
///
/// let broker = Broker::in_memory();
/// let me = Subscriber::named("label");
/// broker.subscribe("greetings", &me, |v| println!("{v:?}"));
/// drop(me);
/// assert_eq!(broker.subscriber_count("greetings"), 0);
/// ```
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<Identity>,
}

struct Identity {
    id: SubscriberId,
    label: Option<String>,
}

impl Subscriber {
    pub fn new() -> Self {
        Self::with_label(None)
    }

    /// Creates a token carrying a label that shows up in logs.
    pub fn named(label: impl Into<String>) -> Self {
        Self::with_label(Some(label.into()))
    }

    fn with_label(label: Option<String>) -> Self {
        let id = SubscriberId(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(Identity { id, label }),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }

    pub(crate) fn downgrade(&self) -> WeakSubscriber {
        WeakSubscriber {
            id: self.inner.id,
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl Default for Subscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}

/// Non-owning handle to a subscriber's identity.
#[derive(Clone)]
pub(crate) struct WeakSubscriber {
    id: SubscriberId,
    inner: Weak<Identity>,
}

impl WeakSubscriber {
    pub(crate) fn id(&self) -> SubscriberId {
        self.id
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

/// One callback registered on one channel.
pub(crate) struct Subscription {
    subscriber: WeakSubscriber,
    callback: Callback,
    active: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(
        subscriber: &Subscriber,
        callback: Callback,
    ) -> Self {
        Self {
            subscriber: subscriber.downgrade(),
            callback,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) fn subscriber_id(&self) -> SubscriberId {
        self.subscriber.id()
    }

    /// A subscription fires only while it is registered and its subscriber is
    /// reachable.
    pub(crate) fn is_live(&self) -> bool {
        self.active.load(Ordering::Acquire) && self.subscriber.is_alive()
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn callback(&self) -> &Callback {
        &self.callback
    }
}
