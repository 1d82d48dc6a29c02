//! Time-bounded per-source schema cache.
//!
//! Holds table lists, column lists, and small row samples keyed by data
//! source id. Entries expire after a fixed TTL, checked when read; nothing
//! sweeps the map in the background. A miss (absent or stale) is never an
//! error, only a signal to recompute from the store.
//!
//! `put` replaces the whole entry. Callers that want to add one table's
//! sample while keeping the rest read the entry, merge, and put it back.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::models::Record;

/// Default time-to-live for an entry.
pub const DEFAULT_TTL_SECS: i64 = 300;

/// Largest row-sample request that is served from / stored in the cache.
pub const SAMPLE_CACHE_LIMIT: i64 = 10;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaEntry {
    pub tables: Vec<String>,
    pub columns: HashMap<String, Vec<String>>,
    pub samples: HashMap<String, Vec<Record>>,
}

#[derive(Debug, Clone)]
struct Stamped {
    entry: SchemaEntry,
    cached_at: DateTime<Utc>,
}

/// Reader/writer-locked map of [`SchemaEntry`] by data source id.
#[derive(Debug)]
pub struct SchemaCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Stamped>>,
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_TTL_SECS))
    }
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `id`, if any.
    pub fn get(&self, id: &str) -> Option<SchemaEntry> {
        self.get_at(id, Utc::now())
    }

    /// As [`get`](Self::get), evaluating staleness at `now`.
    pub fn get_at(&self, id: &str, now: DateTime<Utc>) -> Option<SchemaEntry> {
        let entries = self.entries.read();
        let stamped = entries.get(id)?;
        if now - stamped.cached_at > self.ttl {
            return None;
        }
        Some(stamped.entry.clone())
    }

    /// Store `entry` for `id`, replacing any previous entry.
    pub fn put(&self, id: &str, entry: SchemaEntry) {
        self.put_at(id, entry, Utc::now());
    }

    pub fn put_at(&self, id: &str, entry: SchemaEntry, now: DateTime<Utc>) {
        self.entries.write().insert(
            id.to_string(),
            Stamped {
                entry,
                cached_at: now,
            },
        );
    }

    pub fn invalidate(&self, id: &str) {
        self.entries.write().remove(id);
    }

    pub fn invalidate_all(&self) {
        self.entries.write().clear();
    }

    /// Fresh entry for `id`, or an empty one to merge into.
    pub fn get_or_default(&self, id: &str) -> SchemaEntry {
        self.get(id).unwrap_or_default()
    }
}
