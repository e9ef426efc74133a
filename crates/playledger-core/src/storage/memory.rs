use chrono::{DateTime, Utc};
use playledger_models::Entity;
use std::sync::{Mutex, MutexGuard};
use crate::error::StorageError;
use super::{CommitSummary, IndexOptions, IndexReport, MaintenanceReport, RecordSet, StorageAdapter};

/// Process-local storage. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    state: Mutex<RecordSet>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().map(|state| state.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, RecordSet>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Backend("memory storage lock poisoned".to_string()))
    }
}

impl StorageAdapter for MemoryStorage {
    fn get(&self, entity: &Entity) -> Result<Option<Entity>, StorageError> {
        Ok(self.lock()?.find(entity).cloned())
    }

    fn get_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Entity>, StorageError> {
        Ok(self.lock()?.since(since))
    }

    fn commit(&self, entities: &[Entity]) -> Result<CommitSummary, StorageError> {
        Ok(self.lock()?.commit(entities))
    }

    fn remove(&self, entity: &Entity) -> Result<bool, StorageError> {
        Ok(self.lock()?.remove(entity))
    }

    fn ensure_index(&self, opts: &IndexOptions) -> Result<IndexReport, StorageError> {
        Ok(self.lock()?.ensure_index(opts))
    }

    fn maintenance(&self) -> Result<MaintenanceReport, StorageError> {
        Ok(self.lock()?.maintenance())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use playledger_models::{EntityType, GuidRegistry};

    fn movie(imdb: &str, updated: i64) -> Entity {
        Entity::new(EntityType::Movie, updated, "home_plex")
            .with_guids(GuidRegistry::STANDARD.resolve([("imdb", imdb)]))
            .with_watched(true)
    }

    #[test]
    fn test_commit_assigns_ids_and_updates() {
        let storage = MemoryStorage::new();
        let summary = storage.commit(&[movie("tt1", 1000), movie("tt2", 1000)]).unwrap();
        assert_eq!(summary.get(EntityType::Movie).added, 2);
        assert_eq!(summary.get(EntityType::Episode).added, 0);

        let mut stored = storage.get(&movie("tt1", 0)).unwrap().unwrap();
        assert_eq!(stored.id(), Some(1));

        stored.updated = 2000;
        let summary = storage.commit(&[stored]).unwrap();
        assert_eq!(summary.get(EntityType::Movie).updated, 1);
        assert_eq!(storage.len(), 2);
    }

    #[test]
    fn test_commit_fails_unknown_ids() {
        let storage = MemoryStorage::new();
        let mut ghost = movie("tt9", 1000);
        ghost.assign_id(42).unwrap();

        let summary = storage.commit(&[ghost]).unwrap();
        assert_eq!(summary.get(EntityType::Movie).failed, 1);
        assert!(storage.is_empty());
    }

    #[test]
    fn test_get_all_since_is_exclusive() {
        let storage = MemoryStorage::new();
        storage.commit(&[movie("tt1", 1000), movie("tt2", 2000)]).unwrap();

        let since = Utc.timestamp_opt(1000, 0).unwrap();
        let recent = storage.get_all(Some(since)).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].updated, 2000);
        assert_eq!(storage.get_all(None).unwrap().len(), 2);
    }

    #[test]
    fn test_remove_and_maintenance() {
        let storage = MemoryStorage::new();
        let orphan = Entity::new(EntityType::Movie, 10, "home_plex")
            .with_guids(GuidRegistry::STANDARD.make_virtual_guid("home_plex", "1"));
        storage.commit(&[movie("tt1", 1000), orphan]).unwrap();

        assert!(storage.remove(&movie("tt1", 0)).unwrap());
        assert!(!storage.remove(&movie("tt1", 0)).unwrap());

        let report = storage.maintenance().unwrap();
        assert_eq!(report.removed_unidentifiable, 1);
        assert_eq!(report.records, 0);
    }

    #[test]
    fn test_ensure_index_reports_healthy_index() {
        let storage = MemoryStorage::new();
        storage.commit(&[movie("tt1", 1000)]).unwrap();

        let report = storage.ensure_index(&IndexOptions::default()).unwrap();
        assert_eq!(report.keys, 1);
        assert_eq!(report.missing, 0);
        assert!(!report.rebuilt);

        let forced = storage
            .ensure_index(&IndexOptions { dry_run: false, force_reindex: true })
            .unwrap();
        assert!(forced.rebuilt);
    }

    #[test]
    fn test_replacing_a_record_drops_its_old_pointers() {
        let storage = MemoryStorage::new();
        let heat = movie("tt1", 1000)
            .with_guids(GuidRegistry::STANDARD.resolve([("imdb", "tt1"), ("tmdb", "100")]));
        let ronin = movie("tt2", 1000);
        storage.commit(&[heat, ronin]).unwrap();

        let mut stored = storage.get(&movie("tt1", 0)).unwrap().unwrap();
        stored.guids.remove("tmdb");
        storage.commit(&[stored]).unwrap();

        let by_tmdb = Entity::new(EntityType::Movie, 0, "home_plex")
            .with_guids(GuidRegistry::STANDARD.resolve([("tmdb", "100")]));
        assert!(storage.get(&by_tmdb).unwrap().is_none());
        assert_eq!(storage.get(&movie("tt1", 0)).unwrap().unwrap().id(), Some(1));
        assert_eq!(storage.get(&movie("tt2", 0)).unwrap().unwrap().id(), Some(2));

        let report = storage.ensure_index(&IndexOptions { dry_run: true, force_reindex: false }).unwrap();
        assert_eq!(report.keys, 2);
        assert_eq!(report.missing + report.stale, 0);
    }
}
