use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use sled::{Db, Tree};
use tracing::debug;

use crate::adapter::{DedupError, DedupStore};

const TREE: &str = "coordination-dedup";

impl From<sled::Error> for DedupError {
    fn from(err: sled::Error) -> Self {
        DedupError::Backend(err.to_string())
    }
}

/// Dedup ledger in a sled tree. Keys map to the time (ms) they were
/// marked; entries older than `ttl` read as unseen and are pruned.
///
/// The entry count is kept in memory, seeded from the tree on open. Once it
/// passes `max_entries`, one pruning pass drops expired entries and then the
/// oldest ones down to the low-water mark, so later marks skip the scan.
#[derive(Clone)]
pub struct SledDedup {
    db: Db,
    tree: Tree,
    ttl: Duration,
    max_entries: usize,
    low_water: usize,
    entries: Arc<AtomicUsize>,
    pruning: Arc<Mutex<()>>,
}

impl SledDedup {
    pub fn open(path: &str, ttl: Duration, max_entries: usize) -> Result<Self, DedupError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(TREE)?;
        let max_entries = max_entries.max(1);
        let entries = Arc::new(AtomicUsize::new(tree.len()));
        Ok(Self {
            db,
            tree,
            ttl,
            max_entries,
            low_water: max_entries - max_entries / 10,
            entries,
            pruning: Arc::new(Mutex::new(())),
        })
    }

    pub fn flush(&self) -> Result<(), DedupError> {
        self.db.flush()?;
        Ok(())
    }

    fn expiry_cutoff(&self) -> i64 {
        Utc::now().timestamp_millis() - self.ttl.as_millis().min(i64::MAX as u128) as i64
    }

    fn forget_one(&self) {
        let _ = self
            .entries
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }

    fn prune(&self) -> Result<(), DedupError> {
        // another caller is already pruning
        let Some(_guard) = self.pruning.try_lock() else {
            return Ok(());
        };
        let cutoff = self.expiry_cutoff();
        let mut live = Vec::new();
        let mut expired = 0usize;

        for entry in self.tree.iter() {
            let (key, value) = entry?;
            match decode_millis(&value) {
                Some(marked) if marked >= cutoff => live.push((marked, key)),
                _ => {
                    self.tree.remove(&key)?;
                    expired += 1;
                }
            }
        }

        let excess = live.len().saturating_sub(self.low_water);
        if excess > 0 {
            live.sort_by_key(|(marked, _)| *marked);
            for (_, key) in live.into_iter().take(excess) {
                self.tree.remove(key)?;
            }
        }
        self.entries.store(self.tree.len(), Ordering::Release);
        debug!(expired, evicted = excess, "dedup ledger pruned");
        Ok(())
    }
}

fn decode_millis(value: &[u8]) -> Option<i64> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    Some(i64::from_be_bytes(bytes))
}

impl DedupStore for SledDedup {
    fn seen(&self, key: &str) -> Result<bool, DedupError> {
        let Some(value) = self.tree.get(key.as_bytes())? else {
            return Ok(false);
        };
        match decode_millis(&value) {
            Some(marked) if marked >= self.expiry_cutoff() => Ok(true),
            _ => {
                if self.tree.remove(key.as_bytes())?.is_some() {
                    self.forget_one();
                }
                Ok(false)
            }
        }
    }

    fn mark(&self, key: &str) -> Result<(), DedupError> {
        let now = Utc::now().timestamp_millis();
        let previous = self.tree.insert(key.as_bytes(), now.to_be_bytes().to_vec())?;
        if previous.is_none() && self.entries.fetch_add(1, Ordering::AcqRel) + 1 > self.max_entries {
            self.prune()?;
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for SledDedup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledDedup")
            .field("db", &"sled::Db")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("entries", &self.len())
            .finish()
    }
}
