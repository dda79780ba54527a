use std::{
    collections::BTreeMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::types::{SensorReading, SourceId};

struct CacheEntry {
    reading: SensorReading,
    stored_at: Instant,
}

/// Latest reading per source, bounded by entry count and age.
///
/// When full, the entry updated longest ago is evicted first.
pub struct ReadingCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<BTreeMap<SourceId, CacheEntry>>,
}

impl ReadingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn insert(&self, reading: SensorReading) {
        self.insert_at(reading, Instant::now());
    }

    pub(crate) fn insert_at(&self, reading: SensorReading, now: Instant) {
        let mut entries = self.entries.lock().expect("lock poisoned");
        purge_expired(&mut entries, self.ttl, now);

        entries.insert(
            reading.source_id.clone(),
            CacheEntry {
                reading,
                stored_at: now,
            },
        );

        while entries.len() > self.capacity {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.stored_at)
                .map(|(source_id, _)| source_id.clone())
            else {
                break;
            };
            entries.remove(&oldest);
            tracing::debug!(target: "sensors", source_id = %oldest, "reading_cache_evicted");
        }
    }

    pub fn get(&self, source_id: &str) -> Option<SensorReading> {
        self.get_at(source_id, Instant::now())
    }

    pub(crate) fn get_at(&self, source_id: &str, now: Instant) -> Option<SensorReading> {
        let entries = self.entries.lock().expect("lock poisoned");
        entries
            .get(source_id)
            .filter(|entry| now.saturating_duration_since(entry.stored_at) < self.ttl)
            .map(|entry| entry.reading.clone())
    }

    pub fn snapshot(&self) -> BTreeMap<SourceId, SensorReading> {
        self.snapshot_at(Instant::now())
    }

    pub(crate) fn snapshot_at(&self, now: Instant) -> BTreeMap<SourceId, SensorReading> {
        let mut entries = self.entries.lock().expect("lock poisoned");
        purge_expired(&mut entries, self.ttl, now);
        entries
            .iter()
            .map(|(source_id, entry)| (source_id.clone(), entry.reading.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn purge_expired(entries: &mut BTreeMap<SourceId, CacheEntry>, ttl: Duration, now: Instant) {
    entries.retain(|_, entry| now.saturating_duration_since(entry.stored_at) < ttl);
}
