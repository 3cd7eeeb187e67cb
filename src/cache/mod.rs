//! In-memory metadata cache.
//!
//! Grounding a dataset costs one metadata call plus one probe per STRING
//! field, so the result is shared across requests until it expires.
//!
//! # Design
//!
//! - Read-only values behind `Arc`, never mutated after insert
//! - TTL checked on read, expired entries are evicted lazily
//! - Keyed by service endpoint and dataset id
//!
//! # Key Format
//!
//! ```text
//! {endpoint}:metadata:{dataset_id}   -> DatasetMetadata
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::metadata::DatasetMetadata;

struct CacheEntry {
    inserted_at: Instant,
    metadata: Arc<DatasetMetadata>,
}

/// Concurrent TTL cache of grounded dataset metadata.
pub struct MetadataCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    fn key(endpoint: &str, dataset_id: &str) -> String {
        format!("{}:metadata:{}", endpoint, dataset_id)
    }

    /// Get cached metadata if present and fresh.
    pub fn get(&self, endpoint: &str, dataset_id: &str) -> Option<Arc<DatasetMetadata>> {
        let key = Self::key(endpoint, dataset_id);
        let fresh = self.entries.get(&key).and_then(|entry| {
            (entry.inserted_at.elapsed() < self.ttl).then(|| Arc::clone(&entry.metadata))
        });

        if fresh.is_none() {
            self.entries
                .remove_if(&key, |_, entry| entry.inserted_at.elapsed() >= self.ttl);
        }
        fresh
    }

    pub fn insert(&self, endpoint: &str, metadata: Arc<DatasetMetadata>) {
        let key = Self::key(endpoint, &metadata.dataset_id);
        self.entries.insert(
            key,
            CacheEntry {
                inserted_at: Instant::now(),
                metadata,
            },
        );
    }

    /// Drop one dataset, e.g. after the service reports a stale field.
    pub fn invalidate(&self, endpoint: &str, dataset_id: &str) {
        self.entries.remove(&Self::key(endpoint, dataset_id));
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
