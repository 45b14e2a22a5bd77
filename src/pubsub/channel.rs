use std::{
    any::Any,
    cell::RefCell,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, trace, warn};
use umarell_error::{DeliveryError, ErrorExt};

use super::{
    metrics::BrokerMetrics, subscriber::Subscription, PersistOption, SubscribeOption,
    SubscriberId, Value,
};
use crate::engine::{PersistenceStore, Tier};

/// Returned by channel operations once the channel has left the registry; the
/// caller looks the name up again.
pub(crate) struct Retired;

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Callbacks that returned normally.
    pub delivered: usize,
    /// Callbacks that panicked.
    pub failed: usize,
    /// Whether the value reached the requested tier.
    pub persisted: bool,
}

/// One named topic: its subscriptions and last published value.
///
/// All operations on a channel are serialized by a reentrant lock, so a
/// callback may publish to or (un)subscribe from the channel that is
/// currently delivering to it. The state cell is never borrowed while a
/// callback runs.
pub struct Channel {
    name: Arc<str>,
    state: ReentrantMutex<RefCell<ChannelState>>,
}

#[derive(Default)]
struct ChannelState {
    last_value: Option<Value>,
    option: PersistOption,
    /// Tier holding `last_value`, if any.
    persisted_in: Option<Tier>,
    /// Whether `persisted_in` is known to match the store. Entries left by an
    /// earlier process are unknown until the first write or flush.
    store_synced: bool,
    subscriptions: Vec<Arc<Subscription>>,
    recovery_done: bool,
    retired: bool,
}

impl ChannelState {
    fn prune(&mut self) -> usize {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.is_live());
        before - self.subscriptions.len()
    }

    fn is_idle(&self) -> bool {
        self.last_value.is_none() && self.subscriptions.iter().all(|s| !s.is_live())
    }
}

impl Channel {
    pub(crate) fn new(name: Arc<str>) -> Self {
        Self {
            name,
            state: ReentrantMutex::new(RefCell::new(ChannelState::default())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Live subscriptions, counting each registration of a subscriber.
    pub fn subscriber_count(&self) -> usize {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        state.prune();
        state.subscriptions.len()
    }

    /// Persistence option of the most recent publish.
    pub fn persist_option(&self) -> PersistOption {
        self.state.lock().borrow().option
    }

    pub fn is_retired(&self) -> bool {
        self.state.lock().borrow().retired
    }

    fn lock(&self) -> Result<ReentrantMutexGuard<'_, RefCell<ChannelState>>, Retired> {
        let guard = self.state.lock();
        let retired = guard.borrow().retired;
        if retired {
            Err(Retired)
        } else {
            Ok(guard)
        }
    }

    pub(crate) fn publish(
        &self,
        value: Value,
        option: PersistOption,
        store: &dyn PersistenceStore,
        metrics: &BrokerMetrics,
    ) -> Result<PublishReport, Retired> {
        let guard = self.lock()?;
        let (targets, persisted) = {
            let mut state = guard.borrow_mut();
            let pruned = state.prune();
            if pruned > 0 {
                trace!(channel = %self.name, pruned, "Pruned unreachable subscribers");
            }
            state.last_value = Some(value.clone());
            state.option = option;
            state.recovery_done = true;
            let persisted = self.persist(&mut state, &value, option, store, metrics);
            (state.subscriptions.clone(), persisted)
        };

        let (delivered, failed) = self.deliver(&targets, &value, metrics);
        trace!(channel = %self.name, delivered, failed, persisted, "Published");
        Ok(PublishReport {
            delivered,
            failed,
            persisted,
        })
    }

    /// Writes `value` to the requested tier and removes entries that would
    /// otherwise still hold an older value. A failed write degrades to no
    /// persistence.
    fn persist(
        &self,
        state: &mut ChannelState,
        value: &Value,
        option: PersistOption,
        store: &dyn PersistenceStore,
        metrics: &BrokerMetrics,
    ) -> bool {
        let target = match option {
            PersistOption::None => None,
            PersistOption::Memory => Some(Tier::Memory),
            PersistOption::Durable => Some(Tier::Durable),
        };

        let mut stored_in = None;
        if let Some(tier) = target {
            match store.put(&self.name, value, tier) {
                Ok(()) => stored_in = Some(tier),
                Err(err) => {
                    BrokerMetrics::incr(&metrics.persistence_failures);
                    warn!(
                        channel = %self.name,
                        ?tier,
                        status = %err.status_code(),
                        error = %err,
                        "Persistence failed, value delivered without it"
                    );
                }
            }
        }

        let mut synced = true;
        for tier in [Tier::Memory, Tier::Durable] {
            if stored_in == Some(tier) {
                continue;
            }
            if state.store_synced && state.persisted_in != Some(tier) {
                continue;
            }
            if let Err(err) = store.delete(&self.name, tier) {
                synced = false;
                warn!(channel = %self.name, ?tier, error = %err, "Failed to drop stale entry");
            }
        }

        state.persisted_in = stored_in;
        state.store_synced = synced;
        stored_in.is_some()
    }

    /// Invokes every still-live subscription with `value`. Panics are caught
    /// and counted; they never stop the fan-out.
    fn deliver(
        &self,
        targets: &[Arc<Subscription>],
        value: &Value,
        metrics: &BrokerMetrics,
    ) -> (usize, usize) {
        let mut delivered = 0;
        let mut failed = 0;

        for sub in targets {
            if !sub.is_live() {
                continue;
            }
            let callback = sub.callback();
            match panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    failed += 1;
                    let err = DeliveryError::CallbackFailure {
                        channel: self.name.to_string(),
                        subscriber: sub.subscriber_id().as_u64(),
                        reason: panic_reason(&*payload),
                    };
                    warn!(status = %err.status_code(), error = %err, "Callback failed");
                }
            }
        }

        BrokerMetrics::add(&metrics.delivered, delivered);
        BrokerMetrics::add(&metrics.callback_failures, failed);
        (delivered, failed)
    }

    pub(crate) fn subscribe(
        &self,
        subscription: Arc<Subscription>,
        option: SubscribeOption,
        store: &dyn PersistenceStore,
        metrics: &BrokerMetrics,
    ) -> Result<(), Retired> {
        let guard = self.lock()?;
        let replay = {
            let mut state = guard.borrow_mut();
            state.prune();
            state.subscriptions.push(subscription.clone());
            debug!(
                channel = %self.name,
                subscriber = %subscription.subscriber_id(),
                ?option,
                "Subscribed"
            );
            match option {
                SubscribeOption::None => None,
                SubscribeOption::ReadPrevious => {
                    self.recover(&mut state, store);
                    state.last_value.clone()
                }
            }
        };

        if let Some(value) = replay {
            BrokerMetrics::incr(&metrics.replays);
            self.deliver(std::slice::from_ref(&subscription), &value, metrics);
        }
        Ok(())
    }

    /// Loads the last value from the store if this channel has never had one
    /// in this process. Tried at most once.
    fn recover(
        &self,
        state: &mut ChannelState,
        store: &dyn PersistenceStore,
    ) {
        if state.last_value.is_some() || state.recovery_done {
            return;
        }
        state.recovery_done = true;
        if let Some((tier, value)) = load_from_store(&self.name, store) {
            debug!(channel = %self.name, ?tier, "Recovered last value from store");
            state.last_value = Some(value);
            state.persisted_in = Some(tier);
            state.option = match tier {
                Tier::Memory => PersistOption::Memory,
                Tier::Durable => PersistOption::Durable,
            };
        }
    }

    /// Removes every subscription of `id`; returns how many there were.
    pub(crate) fn unsubscribe(
        &self,
        id: SubscriberId,
    ) -> Result<usize, Retired> {
        let guard = self.lock()?;
        let mut state = guard.borrow_mut();
        let mut removed = 0;
        state.subscriptions.retain(|s| {
            if s.subscriber_id() == id {
                s.deactivate();
                removed += 1;
                false
            } else {
                s.is_live()
            }
        });
        if removed > 0 {
            debug!(channel = %self.name, subscriber = %id, removed, "Unsubscribed");
        }
        Ok(removed)
    }

    pub(crate) fn is_subscribed(
        &self,
        id: SubscriberId,
    ) -> Result<bool, Retired> {
        let guard = self.lock()?;
        let state = guard.borrow();
        Ok(state
            .subscriptions
            .iter()
            .any(|s| s.subscriber_id() == id && s.is_live()))
    }

    pub(crate) fn last_value(
        &self,
        store: &dyn PersistenceStore,
    ) -> Result<Option<Value>, Retired> {
        let guard = self.lock()?;
        let mut state = guard.borrow_mut();
        self.recover(&mut state, store);
        Ok(state.last_value.clone())
    }

    /// Forgets the last value and deletes it from both tiers. Subscribers
    /// stay.
    pub(crate) fn flush(
        &self,
        store: &dyn PersistenceStore,
    ) -> Result<(), Retired> {
        let guard = self.lock()?;
        let mut state = guard.borrow_mut();
        state.prune();
        state.last_value = None;
        state.option = PersistOption::None;
        state.recovery_done = true;

        let mut synced = true;
        for tier in [Tier::Memory, Tier::Durable] {
            if let Err(err) = store.delete(&self.name, tier) {
                synced = false;
                warn!(channel = %self.name, ?tier, error = %err, "Failed to delete persisted value");
            }
        }
        state.persisted_in = None;
        state.store_synced = synced;
        debug!(channel = %self.name, "Flushed");
        Ok(())
    }

    /// Marks the channel retired when it has neither live subscribers nor a
    /// value. Never blocks: a channel that is in use is left alone.
    pub(crate) fn try_retire_if_idle(&self) -> bool {
        let Some(guard) = self.state.try_lock() else {
            return false;
        };
        let Ok(mut state) = guard.try_borrow_mut() else {
            return false;
        };
        if state.retired {
            return true;
        }
        if !state.is_idle() {
            return false;
        }
        state.subscriptions.clear();
        state.retired = true;
        true
    }
}

/// Reads a channel's value from the store, memory tier first.
pub(crate) fn load_from_store(
    name: &str,
    store: &dyn PersistenceStore,
) -> Option<(Tier, Value)> {
    for tier in [Tier::Memory, Tier::Durable] {
        match store.get(name, tier) {
            Ok(Some(value)) => return Some((tier, value)),
            Ok(None) => {}
            Err(err) => {
                warn!(channel = name, ?tier, error = %err, "Failed to read persisted value")
            }
        }
    }
    None
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}
