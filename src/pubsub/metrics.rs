use std::sync::atomic::{AtomicU64, Ordering};

/// Счётчики [`Broker`](super::Broker).
#[derive(Debug, Default)]
pub struct BrokerMetrics {
    pub published: AtomicU64,
    pub delivered: AtomicU64,
    pub callback_failures: AtomicU64,
    pub persistence_failures: AtomicU64,
    pub replays: AtomicU64,
    pub channels_collected: AtomicU64,
}

/// Снимок [`BrokerMetrics`] на момент вызова.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub published: u64,
    pub delivered: u64,
    pub callback_failures: u64,
    pub persistence_failures: u64,
    pub replays: u64,
    pub channels_collected: u64,
}

impl BrokerMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            callback_failures: self.callback_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            channels_collected: self.channels_collected.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn add(
        counter: &AtomicU64,
        n: usize,
    ) {
        if n > 0 {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let m = BrokerMetrics::default();
        BrokerMetrics::incr(&m.published);
        BrokerMetrics::add(&m.delivered, 3);
        BrokerMetrics::add(&m.replays, 0);
        let snap = m.snapshot();
        assert_eq!(snap.published, 1);
        assert_eq!(snap.delivered, 3);
        assert_eq!(snap.replays, 0);
    }
}
