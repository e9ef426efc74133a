pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use playledger_models::{Entity, EntityType, GuidRegistry};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};
use crate::error::StorageError;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Durable persistence consumed by the mapper.
///
/// Implementations own their transaction semantics; the mapper only assembles
/// batches and reads lazily on index misses.
pub trait StorageAdapter: Send + Sync {
    /// Find the stored record sharing any pointer with `entity`.
    fn get(&self, entity: &Entity) -> Result<Option<Entity>, StorageError>;

    /// All records, or only those updated strictly after `since`.
    fn get_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Entity>, StorageError>;

    /// Insert records without an id and replace records with one.
    fn commit(&self, entities: &[Entity]) -> Result<CommitSummary, StorageError>;

    fn remove(&self, entity: &Entity) -> Result<bool, StorageError>;

    fn ensure_index(&self, opts: &IndexOptions) -> Result<IndexReport, StorageError>;

    fn maintenance(&self) -> Result<MaintenanceReport, StorageError>;
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct TypeSummary {
    pub added: u64,
    pub updated: u64,
    pub failed: u64,
}

/// Per-type outcome of a commit. Every entity type is always present.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CommitSummary(BTreeMap<EntityType, TypeSummary>);

impl CommitSummary {
    pub fn get(&self, entity_type: EntityType) -> TypeSummary {
        self.0.get(&entity_type).copied().unwrap_or_default()
    }

    pub fn record_added(&mut self, entity_type: EntityType) {
        self.0.entry(entity_type).or_default().added += 1;
    }

    pub fn record_updated(&mut self, entity_type: EntityType) {
        self.0.entry(entity_type).or_default().updated += 1;
    }

    pub fn record_failed(&mut self, entity_type: EntityType) {
        self.0.entry(entity_type).or_default().failed += 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityType, TypeSummary)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn total(&self) -> TypeSummary {
        self.0.values().fold(TypeSummary::default(), |acc, s| TypeSummary {
            added: acc.added + s.added,
            updated: acc.updated + s.updated,
            failed: acc.failed + s.failed,
        })
    }
}

impl Default for CommitSummary {
    fn default() -> Self {
        Self(EntityType::ALL.into_iter().map(|t| (t, TypeSummary::default())).collect())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexOptions {
    /// Report only, change nothing
    pub dry_run: bool,
    /// Drop the index and rebuild it even when it looks healthy
    pub force_reindex: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct IndexReport {
    pub keys: usize,
    pub missing: usize,
    pub stale: usize,
    pub rebuilt: bool,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub records: usize,
    pub removed_unidentifiable: usize,
}

/// Record set with a pointer index, shared by the bundled adapters.
#[derive(Debug, Clone)]
pub(crate) struct RecordSet {
    records: BTreeMap<u64, Entity>,
    index: HashMap<String, u64>,
    next_id: u64,
}

impl Default for RecordSet {
    /// Storage ids start at 1.
    fn default() -> Self {
        Self {
            records: BTreeMap::new(),
            index: HashMap::new(),
            next_id: 1,
        }
    }
}

impl RecordSet {
    pub(crate) fn from_records(records: Vec<Entity>, next_id: u64) -> Self {
        let mut set = Self {
            records: BTreeMap::new(),
            index: HashMap::new(),
            next_id,
        };

        for record in records {
            if let Some(id) = record.id() {
                set.next_id = set.next_id.max(id + 1);
                set.records.insert(id, record);
            } else {
                warn!("Skipping stored record without id: {}", record.display_name());
            }
        }

        set.index = set.expected_index();
        set.next_id = set.next_id.max(1);
        set
    }

    pub(crate) fn records(&self) -> impl Iterator<Item = &Entity> {
        self.records.values()
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn find(&self, entity: &Entity) -> Option<&Entity> {
        GuidRegistry::STANDARD
            .pointers(entity)
            .iter()
            .find_map(|pointer| self.index.get(pointer))
            .and_then(|id| self.records.get(id))
    }

    pub(crate) fn since(&self, since: Option<DateTime<Utc>>) -> Vec<Entity> {
        let cutoff = since.map(|date| date.timestamp());
        self.records
            .values()
            .filter(|record| cutoff.map_or(true, |cutoff| record.updated > cutoff))
            .cloned()
            .collect()
    }

    pub(crate) fn commit(&mut self, entities: &[Entity]) -> CommitSummary {
        let mut summary = CommitSummary::default();

        for entity in entities {
            let entity_type = entity.entity_type;
            let existing_id = entity.id().or_else(|| self.find(entity).and_then(Entity::id));

            match existing_id {
                Some(id) if self.records.contains_key(&id) => {
                    let mut record = entity.clone();
                    if let Err(e) = record.assign_id(id) {
                        warn!("Failed to update {}: {}", entity.display_name(), e);
                        summary.record_failed(entity_type);
                        continue;
                    }
                    if entity.id().is_none() {
                        debug!("Record {} already stored as #{}; updating it", entity.display_name(), id);
                    }
                    let pointers = GuidRegistry::STANDARD.pointers(&record);
                    if let Some(previous) = self.records.insert(id, record) {
                        self.unindex(&previous, id);
                    }
                    self.index_pointers(pointers, id);
                    summary.record_updated(entity_type);
                }
                Some(id) => {
                    warn!("Cannot update {}: record #{} does not exist", entity.display_name(), id);
                    summary.record_failed(entity_type);
                }
                None => {
                    let id = self.next_id;
                    let mut record = entity.clone();
                    if let Err(e) = record.assign_id(id) {
                        warn!("Failed to insert {}: {}", entity.display_name(), e);
                        summary.record_failed(entity_type);
                        continue;
                    }
                    self.next_id += 1;
                    self.index_record(&record, id);
                    self.records.insert(id, record);
                    summary.record_added(entity_type);
                }
            }
        }

        summary
    }

    pub(crate) fn remove(&mut self, entity: &Entity) -> bool {
        let id = entity.id().or_else(|| self.find(entity).and_then(Entity::id));

        match id.and_then(|id| self.records.remove(&id).map(|record| (id, record))) {
            Some((id, record)) => {
                self.unindex(&record, id);
                true
            }
            None => false,
        }
    }

    pub(crate) fn ensure_index(&mut self, opts: &IndexOptions) -> IndexReport {
        let expected = self.expected_index();

        let missing = expected
            .iter()
            .filter(|(key, id)| self.index.get(*key) != Some(*id))
            .count();
        let stale = self.index.keys().filter(|key| !expected.contains_key(*key)).count();

        let mut report = IndexReport {
            keys: expected.len(),
            missing,
            stale,
            rebuilt: false,
        };

        if !opts.dry_run && (opts.force_reindex || missing > 0 || stale > 0) {
            self.index = expected;
            report.rebuilt = true;
        }

        report
    }

    pub(crate) fn maintenance(&mut self) -> MaintenanceReport {
        let registry = GuidRegistry::STANDARD;
        let before = self.records.len();

        self.records.retain(|_, record| {
            let keep = registry.is_identifiable(record);
            if !keep {
                warn!("Dropping stored record without identity: {}", record.display_name());
            }
            keep
        });
        self.index = self.expected_index();

        MaintenanceReport {
            records: self.records.len(),
            removed_unidentifiable: before - self.records.len(),
        }
    }

    fn expected_index(&self) -> HashMap<String, u64> {
        let mut index = HashMap::new();
        for (id, record) in &self.records {
            for pointer in GuidRegistry::STANDARD.pointers(record) {
                index.entry(pointer).or_insert(*id);
            }
        }
        index
    }

    fn index_record(&mut self, record: &Entity, id: u64) {
        self.index_pointers(GuidRegistry::STANDARD.pointers(record), id);
    }

    fn index_pointers(&mut self, pointers: Vec<String>, id: u64) {
        for pointer in pointers {
            self.index.insert(pointer, id);
        }
    }

    /// Drop the index keys `record` held for `id`. Keys now owned by another
    /// record are left alone.
    fn unindex(&mut self, record: &Entity, id: u64) {
        for pointer in GuidRegistry::STANDARD.pointers(record) {
            if self.index.get(&pointer) == Some(&id) {
                self.index.remove(&pointer);
            }
        }
    }
}
