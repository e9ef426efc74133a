use playledger_models::EntityType;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Receives the mapper's per-decision counters, keyed by `(type, reason)`.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, entity_type: EntityType, reason: &str);
}

/// Counter sink that keeps everything in memory, e.g. `movie_added -> 3`.
#[derive(Debug, Default)]
pub struct InMemoryCounters {
    counts: Mutex<BTreeMap<String, u64>>,
}

impl InMemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_type: EntityType, reason: &str) -> u64 {
        let key = Self::key(entity_type, reason);
        self.counts
            .lock()
            .map(|counts| counts.get(&key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// All non-zero counters in key order.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts.lock().map(|counts| counts.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut counts) = self.counts.lock() {
            counts.clear();
        }
    }

    fn key(entity_type: EntityType, reason: &str) -> String {
        format!("{}_{}", entity_type.as_str(), reason)
    }
}

impl MetricsSink for InMemoryCounters {
    fn increment(&self, entity_type: EntityType, reason: &str) {
        if let Ok(mut counts) = self.counts.lock() {
            *counts.entry(Self::key(entity_type, reason)).or_insert(0) += 1;
        }
    }
}

/// Sink that drops every count.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _entity_type: EntityType, _reason: &str) {}
}
