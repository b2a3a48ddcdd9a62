use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DedupError {
    #[error("dedup backend error: {0}")]
    Backend(String),
}

/// Remembers which coordination keys have already been acted on.
///
/// Bounded: entries fall out after a retention window or when capacity is
/// reached, whichever comes first.
pub trait DedupStore: Send + Sync + 'static {
    fn seen(&self, key: &str) -> Result<bool, DedupError>;

    fn mark(&self, key: &str) -> Result<(), DedupError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct MemoryDedup {
    entries: Mutex<LruCache<String, Instant>>,
    ttl: Duration,
}

impl MemoryDedup {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }
}

impl Default for MemoryDedup {
    fn default() -> Self {
        Self::new(10_000, Duration::from_secs(24 * 60 * 60))
    }
}

impl DedupStore for MemoryDedup {
    fn seen(&self, key: &str) -> Result<bool, DedupError> {
        let mut entries = self.entries.lock();
        match entries.peek(key) {
            Some(marked) if marked.elapsed() < self.ttl => Ok(true),
            Some(_) => {
                entries.pop(key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    fn mark(&self, key: &str) -> Result<(), DedupError> {
        self.entries.lock().put(key.to_string(), Instant::now());
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
