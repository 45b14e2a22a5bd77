use std::{fmt, sync::Arc};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use tracing::{debug, info, warn};
use umarell_error::PersistResult;

use super::{
    channel::{load_from_store, Channel, PublishReport, Retired},
    intern,
    metrics::BrokerMetrics,
    subscriber::Subscription,
    Callback, PersistOption, SubscribeOption, Subscriber, SubscriberId, Value,
};
use crate::{
    config::StorageConfig,
    engine::{PersistenceStore, Tier, TieredStore},
};

static SHARED: OnceCell<Arc<Broker>> = OnceCell::new();

/// Брокер Pub/Sub сообщений внутри процесса.
///
/// Поддерживает:
/// - именованные каналы, создаваемые по требованию и удаляемые, когда в них
///   нет ни значения, ни живого подписчика
/// - синхронную доставку в порядке публикации внутри канала
/// - сохранение последнего значения в памяти или в durable-хранилище
/// - повторную выдачу последнего значения новым подписчикам
///
/// `Broker` разделяется между потоками как `Arc<Broker>`; все методы
/// принимают `&self`.
pub struct Broker {
    channels: DashMap<Arc<str>, Arc<Channel>>,
    store: Arc<dyn PersistenceStore>,
    metrics: BrokerMetrics,
}

impl Broker {
    pub fn new(store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            channels: DashMap::new(),
            store,
            metrics: BrokerMetrics::default(),
        }
    }

    /// Брокер, у которого и durable-уровень живёт в памяти.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(TieredStore::in_memory()))
    }

    /// Брокер с durable-хранилищем, описанным в `config`.
    pub fn from_config(config: &StorageConfig) -> PersistResult<Self> {
        let store = TieredStore::from_config(config)?;
        info!(storage = ?config.storage_type, "Broker created");
        Ok(Self::new(Arc::new(store)))
    }

    /// Общий брокер процесса. Создаётся в памяти при первом обращении, если
    /// раньше не был установлен другой.
    pub fn shared() -> Arc<Broker> {
        SHARED
            .get_or_init(|| Arc::new(Broker::in_memory()))
            .clone()
    }

    /// Делает `broker` общим для процесса. Если общий уже есть, возвращает
    /// переданный брокер обратно.
    pub fn install_shared(broker: Arc<Broker>) -> Result<(), Arc<Broker>> {
        SHARED.set(broker)
    }

    pub fn metrics(&self) -> &BrokerMetrics {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<dyn PersistenceStore> {
        &self.store
    }

    /// Возвращает канал `name`, создавая его при отсутствии.
    pub fn get_or_create(
        &self,
        name: &str,
    ) -> Arc<Channel> {
        if let Some(channel) = self.channels.get(name) {
            return channel.value().clone();
        }
        let key = intern::intern_channel(name);
        self.channels
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(channel = %key, "Channel created");
                Arc::new(Channel::new(key.clone()))
            })
            .value()
            .clone()
    }

    /// Выполняет `op` над каналом, создавая его при необходимости. Канал,
    /// выведенный из реестра между поиском и блокировкой, ищется заново.
    fn with_channel<T>(
        &self,
        name: &str,
        mut op: impl FnMut(&Channel) -> Result<T, Retired>,
    ) -> T {
        loop {
            let channel = self.get_or_create(name);
            if let Ok(out) = op(&channel) {
                return out;
            }
        }
    }

    /// Как `with_channel`, но ничего не создаёт; `None`, если канала нет.
    fn with_existing<T>(
        &self,
        name: &str,
        mut op: impl FnMut(&Channel) -> Result<T, Retired>,
    ) -> Option<T> {
        loop {
            let channel = self.channels.get(name)?.value().clone();
            if let Ok(out) = op(&channel) {
                return Some(out);
            }
        }
    }

    /// Публикация без сохранения.
    pub fn publish(
        &self,
        channel: &str,
        value: impl Into<Value>,
    ) -> PublishReport {
        self.publish_with(channel, value, PersistOption::None)
    }

    /// Обновляет последнее значение канала, сохраняет его по запросу и
    /// доставляет всем живым подписчикам до возврата.
    pub fn publish_with(
        &self,
        channel: &str,
        value: impl Into<Value>,
        option: PersistOption,
    ) -> PublishReport {
        let value = value.into();
        BrokerMetrics::incr(&self.metrics.published);
        self.with_channel(channel, |ch| {
            ch.publish(value.clone(), option, self.store.as_ref(), &self.metrics)
        })
    }

    /// Регистрирует `callback` для значений, опубликованных после вызова.
    pub fn subscribe<F>(
        &self,
        channel: &str,
        subscriber: &Subscriber,
        callback: F,
    ) where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_with(channel, subscriber, SubscribeOption::None, callback)
    }

    /// Регистрирует `callback`; с [`SubscribeOption::ReadPrevious`] последнее
    /// известное значение доставляется до возврата.
    ///
    /// Повторная подписка того же подписчика регистрирует второй callback.
    pub fn subscribe_with<F>(
        &self,
        channel: &str,
        subscriber: &Subscriber,
        option: SubscribeOption,
        callback: F,
    ) where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.subscribe_callback(channel, subscriber, option, Arc::new(callback))
    }

    pub(crate) fn subscribe_callback(
        &self,
        channel: &str,
        subscriber: &Subscriber,
        option: SubscribeOption,
        callback: Callback,
    ) {
        let subscription = Arc::new(Subscription::new(subscriber, callback));
        self.with_channel(channel, |ch| {
            ch.subscribe(
                subscription.clone(),
                option,
                self.store.as_ref(),
                &self.metrics,
            )
        })
    }

    /// Удаляет все подписки `subscriber` на `channel`. Возвращает их число;
    /// для неизвестного канала и повторного вызова — 0.
    pub fn unsubscribe(
        &self,
        channel: &str,
        subscriber: &Subscriber,
    ) -> usize {
        self.unsubscribe_id(channel, subscriber.id())
    }

    pub(crate) fn unsubscribe_id(
        &self,
        channel: &str,
        id: SubscriberId,
    ) -> usize {
        let removed = self
            .with_existing(channel, |ch| ch.unsubscribe(id))
            .unwrap_or(0);
        self.collect_channel(channel);
        removed
    }

    /// Отписывает `subscriber` от всех каналов.
    pub fn unsubscribe_all(
        &self,
        subscriber: &Subscriber,
    ) -> usize {
        let id = subscriber.id();
        let channels: Vec<Arc<Channel>> = self.channels.iter().map(|e| e.value().clone()).collect();

        let mut removed = 0;
        for channel in channels {
            if let Ok(n) = channel.unsubscribe(id) {
                if n > 0 {
                    removed += n;
                    self.collect_channel(channel.name());
                }
            }
        }
        debug!(subscriber = %id, removed, "Unsubscribed everywhere");
        removed
    }

    /// Последнее значение `channel`: опубликованное в этом процессе, иначе
    /// прочитанное из хранилища (сначала уровень памяти).
    pub fn last_value(
        &self,
        channel: &str,
    ) -> Option<Value> {
        match self.with_existing(channel, |ch| ch.last_value(self.store.as_ref())) {
            Some(value) => value,
            None => load_from_store(channel, self.store.as_ref()).map(|(_, v)| v),
        }
    }

    /// Сбрасывает последнее значение канала и его сохранённые записи.
    /// Подписчики остаются.
    pub fn flush(
        &self,
        channel: &str,
    ) {
        let flushed = self
            .with_existing(channel, |ch| ch.flush(self.store.as_ref()))
            .is_some();
        if !flushed {
            for tier in [Tier::Memory, Tier::Durable] {
                if let Err(err) = self.store.delete(channel, tier) {
                    warn!(channel, ?tier, error = %err, "Failed to delete persisted value");
                }
            }
        }
        self.collect_channel(channel);
    }

    /// Сбрасывает все каналы и очищает оба уровня, включая записи каналов,
    /// не загруженных в этом процессе.
    pub fn flush_all(&self) {
        for tier in [Tier::Memory, Tier::Durable] {
            if let Err(err) = self.store.delete_all(tier) {
                warn!(?tier, error = %err, "Failed to clear tier");
            }
        }
        let channels: Vec<Arc<Channel>> = self.channels.iter().map(|e| e.value().clone()).collect();
        for channel in &channels {
            channel.flush(self.store.as_ref()).ok();
        }
        drop(channels);
        let collected = self.collect_garbage();
        info!(collected, "Flushed all channels");
    }

    /// Число живых подписок на `channel`.
    pub fn subscriber_count(
        &self,
        channel: &str,
    ) -> usize {
        self.channels
            .get(channel)
            .map(|e| e.value().clone())
            .map_or(0, |ch| ch.subscriber_count())
    }

    pub fn is_subscribed(
        &self,
        channel: &str,
        subscriber: &Subscriber,
    ) -> bool {
        self.with_existing(channel, |ch| ch.is_subscribed(subscriber.id()))
            .unwrap_or(false)
    }

    /// Имена каналов в реестре, отсортированные.
    pub fn active_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.iter().map(|e| e.key().to_string()).collect();
        names.sort();
        names
    }

    pub fn contains_channel(
        &self,
        channel: &str,
    ) -> bool {
        self.channels.contains_key(channel)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Удаляет все каналы без значения и живых подписчиков. Возвращает число
    /// удалённых.
    pub fn collect_garbage(&self) -> usize {
        let removed = {
            let names: Vec<Arc<str>> = self.channels.iter().map(|e| e.key().clone()).collect();
            names.iter().filter(|name| self.collect_channel(name)).count()
        };
        if removed > 0 {
            let released = intern::release_unused();
            debug!(removed, released, "Garbage collected channels");
        }
        removed
    }

    /// Удаляет `name` из реестра, если канал простаивает, и освобождает
    /// interned-имя, когда его больше никто не держит. Не ждёт блокировку
    /// канала, удерживая шард карты.
    fn collect_channel(
        &self,
        name: &str,
    ) -> bool {
        let Some(entry) = self
            .channels
            .remove_if(name, |_, ch| ch.try_retire_if_idle())
        else {
            return false;
        };
        drop(entry);
        BrokerMetrics::incr(&self.metrics.channels_collected);
        let released = intern::release(name);
        debug!(channel = name, released, "Channel removed");
        true
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl fmt::Debug for Broker {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("Broker")
            .field("channels", &self.channels.len())
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}
