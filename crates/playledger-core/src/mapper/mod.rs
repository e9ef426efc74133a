use chrono::{DateTime, Utc};
use playledger_models::{Entity, GuidRegistry, TrackedFields};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use crate::error::StorageError;
use crate::metrics::MetricsSink;
use crate::storage::{CommitSummary, StorageAdapter};

/// Per-run mapper behaviour.
#[derive(Debug, Clone, Default)]
pub struct MapperOptions {
    /// Summarise the pending set on commit instead of writing it
    pub dry_run: bool,
    /// Log the field-level diff of every update
    pub trace: bool,
    /// Fields compared to decide whether a merge changed a record
    pub tracked_fields: TrackedFields,
}

/// Options for a single `add` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Insert records that were never watched
    pub import_unwatched: bool,
    /// Last successful sync; older observations only contribute guids
    pub after: Option<DateTime<Utc>>,
}

/// What `add` decided. The reason doubles as the counter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Updated,
    IgnoredNotWatched,
    IgnoredNotPlayedSinceLastSync,
    IgnoredNoChange,
    FailedNoGuid,
}

impl AddOutcome {
    pub fn reason(&self) -> &'static str {
        match self {
            AddOutcome::Added => "added",
            AddOutcome::Updated => "updated",
            AddOutcome::IgnoredNotWatched => "ignored_not_watched",
            AddOutcome::IgnoredNotPlayedSinceLastSync => "ignored_not_played_since_last_sync",
            AddOutcome::IgnoredNoChange => "ignored_no_change",
            AddOutcome::FailedNoGuid => "failed_no_guid",
        }
    }

    /// Did the call put something into the pending-write set?
    pub fn is_pending(&self) -> bool {
        matches!(self, AddOutcome::Added | AddOutcome::Updated)
    }
}

impl fmt::Display for AddOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

/// In-memory reconciliation engine.
///
/// Holds the working set of records, a pointer index over every record's
/// canonical guids and the set of records pending a write. One instance is
/// owned by one sync job; it is not meant to be shared between callers.
///
/// Lookups walk an entity's pointers in registry priority order, so the
/// first indexed namespace decides which record an observation belongs to.
pub struct ReconciliationMapper {
    storage: Arc<dyn StorageAdapter>,
    metrics: Arc<dyn MetricsSink>,
    registry: GuidRegistry,
    options: MapperOptions,

    objects: BTreeMap<usize, Entity>,
    next_pointer: usize,
    guid_index: HashMap<String, usize>,
    /// Storage id -> pointer, for records that came from storage
    stored: HashMap<u64, usize>,
    changed: BTreeSet<usize>,
    tombstones: HashSet<String>,
    fully_loaded: bool,
}

impl ReconciliationMapper {
    pub fn new(storage: Arc<dyn StorageAdapter>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            storage,
            metrics,
            registry: GuidRegistry::STANDARD,
            options: MapperOptions::default(),
            objects: BTreeMap::new(),
            next_pointer: 0,
            guid_index: HashMap::new(),
            stored: HashMap::new(),
            changed: BTreeSet::new(),
            tombstones: HashSet::new(),
            fully_loaded: false,
        }
    }

    pub fn with_options(mut self, options: MapperOptions) -> Self {
        self.options = options;
        self
    }

    pub fn set_options(&mut self, options: MapperOptions) {
        self.options = options;
    }

    pub fn options(&self) -> &MapperOptions {
        &self.options
    }

    pub fn in_dry_run_mode(&self) -> bool {
        self.options.dry_run
    }

    pub fn in_trace_mode(&self) -> bool {
        self.options.trace
    }

    pub fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    /// Populate the working set from storage.
    ///
    /// Without `since` the whole corpus is loaded and later lookups never fall
    /// through to storage. With `since` only records updated after it are
    /// loaded. Does nothing when the working set is already populated.
    pub fn load_data(&mut self, since: Option<DateTime<Utc>>) -> Result<(), StorageError> {
        if !self.objects.is_empty() {
            debug!("Mapper already holds {} records, skipping load", self.objects.len());
            return Ok(());
        }

        let start = std::time::Instant::now();
        let records = self.storage.get_all(since)?;
        let loaded = records.len();

        for record in records {
            self.hydrate(record);
        }

        self.fully_loaded = since.is_none();
        info!(
            "Loaded {} records into mapper in {:?} ({})",
            loaded,
            start.elapsed(),
            match since {
                Some(date) => format!("updated after {}", date.to_rfc3339()),
                None => "full corpus".to_string(),
            }
        );
        Ok(())
    }

    /// Integer pointer of the record this entity resolves to.
    ///
    /// Walks the entity's canonical pointers in priority order and returns the
    /// first live index hit. Tombstoned index entries are purged on the way.
    /// On a miss, and unless the whole corpus is loaded or one of the entity's
    /// pointers is known deleted, asks storage once and hydrates the match
    /// into the working set.
    pub fn get_pointer(&mut self, entity: &Entity) -> Result<Option<usize>, StorageError> {
        let pointers = self.registry.pointers(entity);
        for pointer in &pointers {
            let Some(&index) = self.guid_index.get(pointer) else {
                continue;
            };

            if self.tombstones.contains(pointer) || !self.objects.contains_key(&index) {
                debug!("Purging stale index entry {} -> #{}", pointer, index);
                self.guid_index.remove(pointer);
                continue;
            }

            return Ok(Some(index));
        }

        if self.fully_loaded {
            return Ok(None);
        }

        if pointers.iter().any(|pointer| self.tombstones.contains(pointer)) {
            debug!("{}: {} was removed, not asking storage", entity.via, entity.display_name());
            return Ok(None);
        }

        match self.storage.get(entity)? {
            Some(record) => {
                debug!("{}: hydrated {} from storage", entity.via, record.display_name());
                Ok(Some(self.hydrate(record)))
            }
            None => Ok(None),
        }
    }

    /// Submit one observation. See `AddOutcome` for the possible decisions.
    pub fn add(&mut self, mut entity: Entity, opts: &AddOptions) -> Result<AddOutcome, StorageError> {
        if !self.registry.is_identifiable(&entity) {
            warn!(
                "{}: ignoring {} {}, no external identifier resolved",
                entity.via,
                entity.entity_type,
                entity.display_name()
            );
            return Ok(self.record(&entity, AddOutcome::FailedNoGuid));
        }

        let Some(pointer) = self.get_pointer(&entity)? else {
            if !entity.is_watched() && !opts.import_unwatched {
                debug!(
                    "{}: ignoring {}, not watched and not yet known",
                    entity.via,
                    entity.display_name()
                );
                return Ok(self.record(&entity, AddOutcome::IgnoredNotWatched));
            }

            debug!("{}: adding {}", entity.via, entity.display_name());
            entity.ensure_snapshot();
            let pointer = self.insert(entity.clone());
            self.changed.insert(pointer);
            return Ok(self.record(&entity, AddOutcome::Added));
        };

        if !entity.is_watched() && !opts.import_unwatched {
            return Ok(self.merge_guids_or_ignore(pointer, &entity, AddOutcome::IgnoredNotWatched));
        }

        if let Some(after) = opts.after {
            if entity.updated <= after.timestamp() {
                return Ok(self.merge_guids_or_ignore(
                    pointer,
                    &entity,
                    AddOutcome::IgnoredNotPlayedSinceLastSync,
                ));
            }
        }

        if self.merge_into(pointer, &entity, false) {
            debug!("{}: updated {}", entity.via, entity.display_name());
            Ok(self.record(&entity, AddOutcome::Updated))
        } else {
            debug!("{}: {} has no changes", entity.via, entity.display_name());
            Ok(self.record(&entity, AddOutcome::IgnoredNoChange))
        }
    }

    /// Stored record for this entity, if any. Storage errors are logged and
    /// reported as a miss.
    pub fn get(&mut self, entity: &Entity) -> Option<&Entity> {
        match self.get_pointer(entity) {
            Ok(Some(pointer)) => self.objects.get(&pointer),
            Ok(None) => None,
            Err(e) => {
                warn!("Lookup for {} failed: {}", entity.display_name(), e);
                None
            }
        }
    }

    pub fn has(&mut self, entity: &Entity) -> bool {
        self.get(entity).is_some()
    }

    /// Delete the record this entity resolves to.
    ///
    /// Returns `false` when the entity was never indexed. In dry-run mode
    /// storage is left untouched. When storage fails the working set is not
    /// changed.
    pub fn remove(&mut self, entity: &Entity) -> Result<bool, StorageError> {
        let Some(pointer) = self.get_pointer(entity)? else {
            return Ok(false);
        };

        let Some(object) = self.objects.get(&pointer) else {
            return Ok(false);
        };

        if !self.in_dry_run_mode() && object.id().is_some() {
            self.storage.remove(object)?;
        }

        let Some(object) = self.objects.remove(&pointer) else {
            return Ok(false);
        };
        if let Some(id) = object.id() {
            self.stored.remove(&id);
        }

        let keys: Vec<String> = self
            .guid_index
            .iter()
            .filter(|(_, indexed)| **indexed == pointer)
            .map(|(key, _)| key.clone())
            .chain(self.registry.pointers(entity))
            .collect();

        for key in keys {
            self.guid_index.remove(&key);
            self.tombstones.insert(key);
        }

        self.changed.remove(&pointer);
        info!("{}: removed {}", entity.via, object.display_name());
        Ok(true)
    }

    /// Write the pending set and clear all in-memory state.
    ///
    /// On a storage failure nothing is cleared; the caller decides whether to
    /// retry or `reset`.
    pub fn commit(&mut self) -> Result<CommitSummary, StorageError> {
        let pending: Vec<Entity> = self.changed_list().into_iter().cloned().collect();

        let summary = if pending.is_empty() {
            CommitSummary::default()
        } else if self.in_dry_run_mode() {
            let mut summary = CommitSummary::default();
            for entity in &pending {
                match entity.id() {
                    Some(_) => summary.record_updated(entity.entity_type),
                    None => summary.record_added(entity.entity_type),
                }
            }
            info!("Dry run: {} pending records not written", pending.len());
            summary
        } else {
            self.storage.commit(&pending)?
        };

        for (entity_type, counts) in summary.iter() {
            if counts.added + counts.updated + counts.failed > 0 {
                info!(
                    "Committed {}s: {} added, {} updated, {} failed",
                    entity_type, counts.added, counts.updated, counts.failed
                );
            }
        }

        self.reset();
        Ok(summary)
    }

    /// Number of records pending a write.
    pub fn count(&self) -> usize {
        self.changed.len()
    }

    /// Number of records held in memory.
    pub fn objects_count(&self) -> usize {
        self.objects.len()
    }

    /// Drop all in-memory state without writing anything.
    pub fn reset(&mut self) {
        self.objects.clear();
        self.guid_index.clear();
        self.stored.clear();
        self.changed.clear();
        self.tombstones.clear();
        self.next_pointer = 0;
        self.fully_loaded = false;
    }

    pub fn objects(&self) -> Vec<&Entity> {
        self.objects.values().collect()
    }

    pub fn pointers_list(&self) -> Vec<&str> {
        let mut pointers: Vec<&str> = self.guid_index.keys().map(String::as_str).collect();
        pointers.sort_unstable();
        pointers
    }

    pub fn changed_list(&self) -> Vec<&Entity> {
        self.changed.iter().filter_map(|pointer| self.objects.get(pointer)).collect()
    }

    fn record(&self, entity: &Entity, outcome: AddOutcome) -> AddOutcome {
        self.metrics.increment(entity.entity_type, outcome.reason());
        outcome
    }

    fn merge_guids_or_ignore(&mut self, pointer: usize, entity: &Entity, ignored: AddOutcome) -> AddOutcome {
        if self.merge_into(pointer, entity, true) {
            debug!("{}: learned new identifiers for {}", entity.via, entity.display_name());
            self.record(entity, AddOutcome::Updated)
        } else {
            debug!("{}: ignoring {} ({})", entity.via, entity.display_name(), ignored);
            self.record(entity, ignored)
        }
    }

    /// Merge into the object at `pointer`; returns whether anything changed.
    fn merge_into(&mut self, pointer: usize, entity: &Entity, guid_only: bool) -> bool {
        let Some(existing) = self.objects.get(&pointer) else {
            return false;
        };

        let outcome = existing.apply_merge(entity, guid_only, &self.options.tracked_fields);
        if !outcome.changed {
            return false;
        }

        if self.in_trace_mode() {
            for (field, (before, after)) in outcome.entity.diff(existing, &self.options.tracked_fields) {
                trace!("{}: {} {}: {} -> {}", entity.via, outcome.entity.display_name(), field, before, after);
            }
        }

        self.index(&outcome.entity, pointer);
        self.objects.insert(pointer, outcome.entity);
        self.changed.insert(pointer);
        true
    }

    fn insert(&mut self, entity: Entity) -> usize {
        let pointer = self.next_pointer;
        self.next_pointer += 1;
        if let Some(id) = entity.id() {
            self.stored.insert(id, pointer);
        }
        self.index(&entity, pointer);
        self.objects.insert(pointer, entity);
        pointer
    }

    /// Bring a stored record into the working set, reusing its slot when the
    /// same storage id is already in memory.
    fn hydrate(&mut self, record: Entity) -> usize {
        if let Some(&pointer) = record.id().and_then(|id| self.stored.get(&id)) {
            return pointer;
        }
        self.insert(record)
    }

    /// Index every pointer of `entity`. A pointer already owned by another
    /// record keeps its owner.
    fn index(&mut self, entity: &Entity, pointer: usize) {
        for key in self.registry.pointers(entity) {
            self.tombstones.remove(&key);
            let owner = *self.guid_index.entry(key.clone()).or_insert(pointer);
            if owner != pointer && self.objects.contains_key(&owner) {
                debug!("{} already indexed for record #{}, keeping it", key, owner);
            } else {
                self.guid_index.insert(key, pointer);
            }
        }
    }
}

#[cfg(test)]
mod tests;
