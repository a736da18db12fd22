//! Process-local, bounded, LRU-evicted rolling sample of recent memory
//! embeddings used as DR context when the caller doesn't supply one
//! explicitly. One bucket per scoping key (e.g. a user id, or a fixed
//! global key), read-mostly.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

const DEFAULT_BUCKET_CAPACITY: usize = 50;
const DEFAULT_BUCKET_COUNT: usize = 1024;

pub struct RollingContextCache {
    buckets: Mutex<LruCache<String, Vec<Vec<f32>>>>,
    per_bucket_capacity: usize,
}

impl Default for RollingContextCache {
    fn default() -> Self {
        Self::new(DEFAULT_BUCKET_COUNT, DEFAULT_BUCKET_CAPACITY)
    }
}

impl RollingContextCache {
    pub fn new(bucket_count: usize, per_bucket_capacity: usize) -> Self {
        Self {
            buckets: Mutex::new(LruCache::new(NonZeroUsize::new(bucket_count.max(1)).unwrap())),
            per_bucket_capacity: per_bucket_capacity.max(1),
        }
    }

    /// Record an embedding as having been seen under `key`. Oldest entries
    /// are dropped once a bucket exceeds its capacity.
    pub fn push(&self, key: &str, embedding: Vec<f32>) {
        let mut guard = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = guard.get_or_insert_mut(key.to_string(), Vec::new);
        bucket.push(embedding);
        if bucket.len() > self.per_bucket_capacity {
            let drop_n = bucket.len() - self.per_bucket_capacity;
            bucket.drain(0..drop_n);
        }
    }

    /// Snapshot of the current rolling sample for `key`, oldest first.
    pub fn sample(&self, key: &str) -> Vec<Vec<f32>> {
        let mut guard = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(key).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caps_per_bucket_and_keeps_most_recent() {
        let cache = RollingContextCache::new(4, 2);
        cache.push("u1", vec![1.0]);
        cache.push("u1", vec![2.0]);
        cache.push("u1", vec![3.0]);
        let sample = cache.sample("u1");
        assert_eq!(sample, vec![vec![2.0], vec![3.0]]);
    }

    #[test]
    fn unknown_key_returns_empty() {
        let cache = RollingContextCache::default();
        assert!(cache.sample("missing").is_empty());
    }
}
