use std::{
    path::Path,
    sync::atomic::{AtomicUsize, Ordering},
    sync::Arc,
};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use umarell_error::PersistResult;

use super::{
    aof::{AofLog, AofOp, SyncPolicy},
    storage::Storage,
};

/// Stale records tolerated before the log is considered for compaction.
const COMPACT_MIN_STALE: usize = 1024;

/// File-backed byte store.
///
/// Every mutation is appended to an [`AofLog`] and mirrored into an in-memory
/// index that serves reads. Opening an existing file replays it; a torn
/// trailing record left by a crash is dropped.
pub struct InPersistentStore {
    index: DashMap<Arc<str>, Bytes>,
    log: Mutex<AofLog>,
    stale: AtomicUsize,
}

impl InPersistentStore {
    pub fn open<P: AsRef<Path>>(
        path: P,
        policy: SyncPolicy,
    ) -> PersistResult<Self> {
        let mut log = AofLog::open(path, policy)?;
        let index: DashMap<Arc<str>, Bytes> = DashMap::new();
        let mut stale = 0usize;

        let outcome = log.replay(|op, key, val| {
            let key: Arc<str> = Arc::from(String::from_utf8_lossy(&key).as_ref());
            match (op, val) {
                (AofOp::Set, Some(val)) => {
                    if index.insert(key, Bytes::from(val)).is_some() {
                        stale += 1;
                    }
                }
                _ => {
                    index.remove(&key);
                    stale += 1;
                }
            }
        })?;

        if outcome.truncated {
            warn!(
                path = %log.path().display(),
                valid_len = outcome.valid_len,
                "Dropping torn record at the end of the log"
            );
            log.truncate(outcome.valid_len)?;
        }
        info!(
            path = %log.path().display(),
            records = outcome.records,
            keys = index.len(),
            "Durable store opened"
        );

        Ok(Self {
            index,
            log: Mutex::new(log),
            stale: AtomicUsize::new(stale),
        })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Rewrites the log so it holds only the live pairs.
    pub fn compact(&self) -> PersistResult<()> {
        let mut log = self.log.lock();
        self.compact_locked(&mut log)
    }

    fn compact_locked(
        &self,
        log: &mut AofLog,
    ) -> PersistResult<()> {
        let live: Vec<(Vec<u8>, Vec<u8>)> = self
            .index
            .iter()
            .map(|e| (e.key().as_bytes().to_vec(), e.value().to_vec()))
            .collect();
        log.rewrite(live)?;
        self.stale.store(0, Ordering::Relaxed);
        debug!(keys = self.index.len(), "Log compacted");
        Ok(())
    }

    /// Compacts once stale records dominate. The triggering write is already
    /// in the log, so a failed rewrite is only logged and retried later.
    fn maybe_compact(
        &self,
        log: &mut AofLog,
    ) {
        let stale = self.stale.load(Ordering::Relaxed);
        if stale >= COMPACT_MIN_STALE && stale > self.index.len() * 2 {
            if let Err(err) = self.compact_locked(log) {
                warn!(stale, error = %err, "Log compaction failed");
            }
        }
    }
}

impl Storage for InPersistentStore {
    fn set(
        &self,
        key: &str,
        value: Bytes,
    ) -> PersistResult<()> {
        let mut log = self.log.lock();
        log.append_set(key.as_bytes(), &value)?;
        if self.index.insert(Arc::from(key), value).is_some() {
            self.stale.fetch_add(1, Ordering::Relaxed);
        }
        self.maybe_compact(&mut log);
        Ok(())
    }

    fn get(
        &self,
        key: &str,
    ) -> PersistResult<Option<Bytes>> {
        Ok(self.index.get(key).map(|entry| entry.clone()))
    }

    fn del(
        &self,
        key: &str,
    ) -> PersistResult<bool> {
        let mut log = self.log.lock();
        if !self.index.contains_key(key) {
            return Ok(false);
        }
        log.append_del(key.as_bytes())?;
        self.index.remove(key);
        self.stale.fetch_add(1, Ordering::Relaxed);
        self.maybe_compact(&mut log);
        Ok(true)
    }

    fn keys(&self) -> PersistResult<Vec<String>> {
        Ok(self.index.iter().map(|e| e.key().to_string()).collect())
    }

    fn flushdb(&self) -> PersistResult<()> {
        let mut log = self.log.lock();
        log.rewrite(std::iter::empty())?;
        self.index.clear();
        self.stale.store(0, Ordering::Relaxed);
        Ok(())
    }
}
