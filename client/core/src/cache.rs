//! Bounded Read Chunk Cache
//!
//! A thread-safe, insertion-ordered map from channel to the most recent
//! [`ReadChunk`] seen on that channel, holding at most `size` entries.
//!
//! # Policy
//!
//! - **Same read** (`read_number` unchanged): the entry is replaced or, with
//!   [`SameReadPolicy::Accumulate`], its payload is extended. Counted in
//!   `replaced`.
//! - **Different read**: the entry is replaced. Counted in `missed`.
//! - Either way the channel moves to the most-recent end of the order.
//! - **Over capacity**: the oldest entries are evicted, FIFO by touch order,
//!   each eviction counted in `missed`.
//!
//! Every operation takes one short critical section; [`ReadCache::pop_batch`]
//! never blocks waiting for data and returns an empty batch when there is
//! nothing cached.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::chunk::ReadChunk;

/// Default number of channels cached
pub const DEFAULT_CACHE_SIZE: usize = 512;

/// Errors from cache operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The cache cannot be built with these parameters
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),
    /// No entry for the channel
    #[error("no cached chunk for channel {0}")]
    NotFound(u32),
}

/// What to do when a chunk arrives for a read that is already cached
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameReadPolicy {
    /// Keep only the newest chunk (default)
    #[default]
    Replace,
    /// Append the new payload to the cached chunk
    Accumulate,
}

impl SameReadPolicy {
    /// Name used in log lines
    #[must_use]
    pub fn cache_name(self) -> &'static str {
        match self {
            Self::Replace => "ReadCache",
            Self::Accumulate => "AccumulatingCache",
        }
    }
}

/// Snapshot of cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Entries lost to a different read or to eviction
    pub missed: u64,
    /// Entries replaced or extended by a chunk of the same read
    pub replaced: u64,
}

#[derive(Debug)]
struct Entry {
    seq: u64,
    chunk: ReadChunk,
}

/// Lock-protected state
#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<u32, Entry>,
    /// Touch order: sequence number -> channel
    order: BTreeMap<u64, u32>,
    next_seq: u64,
}

impl CacheInner {
    fn touch(&mut self, channel_id: u32) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, channel_id);
        seq
    }

    fn pop(&mut self, newest_first: bool) -> Option<(u32, ReadChunk)> {
        let (_, channel_id) = if newest_first {
            self.order.pop_last()?
        } else {
            self.order.pop_first()?
        };
        self.entries
            .remove(&channel_id)
            .map(|entry| (channel_id, entry.chunk))
    }
}

/// Thread-safe bounded cache of the latest chunk per channel
#[derive(Debug)]
pub struct ReadCache {
    size: usize,
    policy: SameReadPolicy,
    inner: Mutex<CacheInner>,
    missed: AtomicU64,
    replaced: AtomicU64,
}

impl ReadCache {
    /// Create a cache holding at most `size` channels
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfiguration`] if `size < 1`.
    pub fn new(size: usize, policy: SameReadPolicy) -> Result<Self, CacheError> {
        if size < 1 {
            return Err(CacheError::InvalidConfiguration(
                "'size' must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            size,
            policy,
            inner: Mutex::new(CacheInner::default()),
            missed: AtomicU64::new(0),
            replaced: AtomicU64::new(0),
        })
    }

    /// Maximum number of entries
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Policy applied to same-read chunks
    #[must_use]
    pub fn policy(&self) -> SameReadPolicy {
        self.policy
    }

    /// Insert the latest chunk for a channel, evicting the oldest entries if
    /// the cache grows past capacity
    pub fn put(&self, channel_id: u32, chunk: ReadChunk) {
        let mut inner = self.inner.lock();

        let previous = inner.entries.remove(&channel_id);
        let chunk = match previous {
            Some(Entry { seq, chunk: mut cached }) => {
                inner.order.remove(&seq);
                if cached.is_same_read(&chunk) {
                    self.replaced.fetch_add(1, Ordering::Relaxed);
                    match self.policy {
                        SameReadPolicy::Replace => chunk,
                        SameReadPolicy::Accumulate => {
                            cached.raw_payload.extend_from_slice(&chunk.raw_payload);
                            cached.chunk_length += chunk.chunk_length;
                            cached
                        }
                    }
                } else {
                    self.missed.fetch_add(1, Ordering::Relaxed);
                    chunk
                }
            }
            None => chunk,
        };

        let seq = inner.touch(channel_id);
        inner.entries.insert(channel_id, Entry { seq, chunk });

        while inner.entries.len() > self.size {
            if inner.pop(false).is_none() {
                break;
            }
            self.missed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Clone of the cached chunk for a channel
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] if the channel has no entry.
    pub fn get(&self, channel_id: u32) -> Result<ReadChunk, CacheError> {
        self.inner
            .lock()
            .entries
            .get(&channel_id)
            .map(|entry| entry.chunk.clone())
            .ok_or(CacheError::NotFound(channel_id))
    }

    /// Remove and return the cached chunk for a channel
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::NotFound`] if the channel has no entry.
    pub fn delete(&self, channel_id: u32) -> Result<ReadChunk, CacheError> {
        let mut inner = self.inner.lock();
        let entry = inner
            .entries
            .remove(&channel_id)
            .ok_or(CacheError::NotFound(channel_id))?;
        inner.order.remove(&entry.seq);
        Ok(entry.chunk)
    }

    /// Remove up to `max_items` entries, newest or oldest first
    ///
    /// Returns fewer entries (possibly none) when the cache holds fewer.
    pub fn pop_batch(&self, max_items: usize, newest_first: bool) -> Vec<(u32, ReadChunk)> {
        let mut inner = self.inner.lock();
        let count = max_items.min(inner.entries.len());
        let mut batch = Vec::with_capacity(count);
        for _ in 0..count {
            match inner.pop(newest_first) {
                Some(item) => batch.push(item),
                None => break,
            }
        }
        batch
    }

    /// Channels currently cached, oldest first
    #[must_use]
    pub fn channels(&self) -> Vec<u32> {
        self.inner.lock().order.values().copied().collect()
    }

    /// Whether a channel has an entry
    #[must_use]
    pub fn contains(&self, channel_id: u32) -> bool {
        self.inner.lock().entries.contains_key(&channel_id)
    }

    /// Number of cached entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Entries lost to a different read or to eviction
    #[must_use]
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    /// Entries replaced or extended by a chunk of the same read
    #[must_use]
    pub fn replaced(&self) -> u64 {
        self.replaced.load(Ordering::Relaxed)
    }

    /// Snapshot of both counters
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            missed: self.missed(),
            replaced: self.replaced(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn chunk(channel: u32, number: u32) -> ReadChunk {
        ReadChunk::new(channel, number, format!("read-{channel}-{number}"))
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let result = ReadCache::new(0, SameReadPolicy::Replace);
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_construction_and_membership() {
        let cache = ReadCache::new(3, SameReadPolicy::Accumulate).unwrap();
        assert_eq!(cache.capacity(), 3);
        assert_eq!(cache.policy(), SameReadPolicy::Accumulate);
        assert!(!cache.contains(1));

        cache.put(1, chunk(1, 1));
        assert!(cache.contains(1));
        cache.delete(1).unwrap();
        assert!(!cache.contains(1));
    }

    #[test]
    fn test_eviction_keeps_most_recent_channels() {
        let cache = ReadCache::new(3, SameReadPolicy::Replace).unwrap();
        for channel in 1..=4 {
            cache.put(channel, chunk(channel, 1));
        }

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.missed(), 1);
        assert_eq!(cache.replaced(), 0);
        assert_eq!(cache.channels(), vec![2, 3, 4]);
    }

    #[test]
    fn test_overflow_by_k_counts_k_misses() {
        let size = 5;
        let extra = 7;
        let cache = ReadCache::new(size, SameReadPolicy::Replace).unwrap();
        for channel in 0..(size + extra) as u32 {
            cache.put(channel, chunk(channel, 1));
            assert!(cache.len() <= size);
        }

        assert_eq!(cache.missed(), extra as u64);
        assert_eq!(cache.channels(), (extra as u32..(size + extra) as u32).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_read_counts_replaced() {
        let cache = ReadCache::new(1, SameReadPolicy::Replace).unwrap();
        cache.put(1, chunk(1, 1));
        cache.put(1, chunk(1, 1).with_payload(vec![9]));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats(), CacheStats { missed: 0, replaced: 1 });
        assert_eq!(cache.get(1).unwrap().raw_payload, vec![9]);
    }

    #[test]
    fn test_different_read_counts_missed() {
        let cache = ReadCache::new(4, SameReadPolicy::Replace).unwrap();
        cache.put(1, chunk(1, 1));
        cache.put(1, chunk(1, 2));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats(), CacheStats { missed: 1, replaced: 0 });
        assert_eq!(cache.get(1).unwrap().read_number, 2);
    }

    #[test]
    fn test_overwrite_moves_channel_to_newest() {
        let cache = ReadCache::new(3, SameReadPolicy::Replace).unwrap();
        cache.put(1, chunk(1, 1));
        cache.put(2, chunk(2, 1));
        cache.put(3, chunk(3, 1));
        cache.put(1, chunk(1, 1));
        cache.put(4, chunk(4, 1));

        // Channel 2 is now the oldest and gets evicted
        assert_eq!(cache.channels(), vec![3, 1, 4]);
    }

    #[test]
    fn test_pop_batch_newest_first() {
        let cache = ReadCache::new(10, SameReadPolicy::Replace).unwrap();
        for channel in 1..=5 {
            cache.put(channel, chunk(channel, 1));
        }

        let batch = cache.pop_batch(3, true);
        let channels: Vec<u32> = batch.iter().map(|(c, _)| *c).collect();
        assert_eq!(channels, vec![5, 4, 3]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.channels(), vec![1, 2]);
    }

    #[test]
    fn test_pop_batch_oldest_first() {
        let cache = ReadCache::new(10, SameReadPolicy::Replace).unwrap();
        for channel in 1..=3 {
            cache.put(channel, chunk(channel, 1));
        }

        let channels: Vec<u32> = cache.pop_batch(10, false).into_iter().map(|(c, _)| c).collect();
        assert_eq!(channels, vec![1, 2, 3]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_pop_batch_on_empty_cache() {
        let cache = ReadCache::new(2, SameReadPolicy::Replace).unwrap();
        assert!(cache.pop_batch(5, true).is_empty());
        assert!(cache.pop_batch(0, false).is_empty());
    }

    #[test]
    fn test_get_and_delete_missing_channel() {
        let cache = ReadCache::new(2, SameReadPolicy::Replace).unwrap();
        assert_eq!(cache.get(7), Err(CacheError::NotFound(7)));
        assert_eq!(cache.delete(7), Err(CacheError::NotFound(7)));
    }

    #[test]
    fn test_delete_removes_from_order() {
        let cache = ReadCache::new(2, SameReadPolicy::Replace).unwrap();
        cache.put(1, chunk(1, 1));
        cache.put(2, chunk(2, 1));
        let removed = cache.delete(1).unwrap();
        assert_eq!(removed.channel_id, 1);

        cache.put(3, chunk(3, 1));
        // Room was made by the delete, nothing evicted
        assert_eq!(cache.missed(), 0);
        assert_eq!(cache.channels(), vec![2, 3]);
    }

    #[test]
    fn test_accumulate_concatenates_payload() {
        let cache = ReadCache::new(4, SameReadPolicy::Accumulate).unwrap();
        cache.put(1, chunk(1, 1).with_payload(vec![1, 2]).with_samples(0, 2));
        cache.put(1, chunk(1, 1).with_payload(vec![3]).with_samples(2, 1));

        let cached = cache.get(1).unwrap();
        assert_eq!(cached.raw_payload, vec![1, 2, 3]);
        assert_eq!(cached.chunk_length, 3);
        assert_eq!(cached.start_offset, 0);
        assert_eq!(cache.stats(), CacheStats { missed: 0, replaced: 1 });
    }

    #[test]
    fn test_accumulate_new_read_replaces() {
        let cache = ReadCache::new(4, SameReadPolicy::Accumulate).unwrap();
        cache.put(1, chunk(1, 1).with_payload(vec![1, 2]));
        cache.put(1, chunk(1, 2).with_payload(vec![3]));

        assert_eq!(cache.get(1).unwrap().raw_payload, vec![3]);
        assert_eq!(cache.stats(), CacheStats { missed: 1, replaced: 0 });
    }

    #[test]
    fn test_accumulate_touch_affects_eviction() {
        let cache = ReadCache::new(2, SameReadPolicy::Accumulate).unwrap();
        cache.put(1, chunk(1, 1));
        cache.put(2, chunk(2, 1));
        cache.put(1, chunk(1, 1));
        cache.put(3, chunk(3, 1));

        assert_eq!(cache.channels(), vec![1, 3]);
        assert_eq!(cache.stats(), CacheStats { missed: 1, replaced: 1 });
    }

    #[test]
    fn test_concurrent_put_and_pop_account_for_every_chunk() {
        const PUTS: u32 = 20_000;
        let cache = Arc::new(ReadCache::new(16, SameReadPolicy::Replace).unwrap());

        let producer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                for i in 0..PUTS {
                    let channel = i % 64;
                    cache.put(channel, chunk(channel, i / 128));
                }
            })
        };

        let consumer = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                let mut popped = 0u64;
                let mut idle_rounds = 0;
                while idle_rounds < 1_000 {
                    let batch = cache.pop_batch(4, true);
                    if batch.is_empty() {
                        idle_rounds += 1;
                        std::thread::yield_now();
                    } else {
                        idle_rounds = 0;
                        popped += batch.len() as u64;
                    }
                }
                popped
            })
        };

        producer.join().unwrap();
        let popped = consumer.join().unwrap();

        let stats = cache.stats();
        assert_eq!(
            u64::from(PUTS),
            popped + stats.missed + stats.replaced + cache.len() as u64
        );
    }
}
