use super::*;
use crate::metrics::InMemoryCounters;
use crate::storage::{IndexOptions, IndexReport, MaintenanceReport, MemoryStorage};
use chrono::TimeZone;
use playledger_models::{EntityType, Guids};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Memory storage that counts lookups and can be told to fail writes.
#[derive(Default)]
struct CountingStorage {
    inner: MemoryStorage,
    gets: AtomicUsize,
    fail_commit: AtomicBool,
    fail_remove: AtomicBool,
}

impl CountingStorage {
    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl StorageAdapter for CountingStorage {
    fn get(&self, entity: &Entity) -> Result<Option<Entity>, StorageError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(entity)
    }

    fn get_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Entity>, StorageError> {
        self.inner.get_all(since)
    }

    fn commit(&self, entities: &[Entity]) -> Result<CommitSummary, StorageError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("database is locked".to_string()));
        }
        self.inner.commit(entities)
    }

    fn remove(&self, entity: &Entity) -> Result<bool, StorageError> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("database is locked".to_string()));
        }
        self.inner.remove(entity)
    }

    fn ensure_index(&self, opts: &IndexOptions) -> Result<IndexReport, StorageError> {
        self.inner.ensure_index(opts)
    }

    fn maintenance(&self) -> Result<MaintenanceReport, StorageError> {
        self.inner.maintenance()
    }
}

struct Harness {
    storage: Arc<CountingStorage>,
    counters: Arc<InMemoryCounters>,
    mapper: ReconciliationMapper,
}

fn harness() -> Harness {
    harness_with(MapperOptions::default())
}

fn harness_with(options: MapperOptions) -> Harness {
    let storage = Arc::new(CountingStorage::default());
    let counters = Arc::new(InMemoryCounters::new());
    let mapper = ReconciliationMapper::new(storage.clone(), counters.clone()).with_options(options);
    Harness {
        storage,
        counters,
        mapper,
    }
}

fn guids(pairs: &[(&str, &str)]) -> Guids {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn movie(title: &str, pairs: &[(&str, &str)], watched: bool, updated: i64) -> Entity {
    Entity::new(EntityType::Movie, updated, "home_plex")
        .with_title(title, Some(1995))
        .with_guids(guids(pairs))
        .with_watched(watched)
}

fn episode(pairs: &[(&str, &str)], parent: &[(&str, &str)], watched: bool, updated: i64) -> Entity {
    Entity::new(EntityType::Episode, updated, "home_jellyfin")
        .with_title("Lost", None)
        .with_episode(1, 2, guids(parent))
        .with_guids(guids(pairs))
        .with_watched(watched)
}

fn add(mapper: &mut ReconciliationMapper, entity: Entity) -> AddOutcome {
    mapper.add(entity, &AddOptions::default()).unwrap()
}

#[test]
fn test_newer_observation_merges_into_existing_record() {
    let mut h = harness();

    let a = movie("Heat", &[("imdb", "tt1")], true, 1000);
    assert_eq!(add(&mut h.mapper, a), AddOutcome::Added);
    assert_eq!(h.counters.get(EntityType::Movie, "added"), 1);

    let b = movie("Heat", &[("imdb", "tt1"), ("tmdb", "100")], true, 1200);
    assert_eq!(add(&mut h.mapper, b.clone()), AddOutcome::Updated);
    assert_eq!(h.counters.get(EntityType::Movie, "updated"), 1);
    assert_eq!(h.mapper.objects_count(), 1);

    let merged = h.mapper.get(&b).unwrap();
    assert_eq!(merged.guids, guids(&[("imdb", "tt1"), ("tmdb", "100")]));
    assert_eq!(merged.updated, 1200);
    assert!(merged.is_watched());
}

#[test]
fn test_load_data_is_idempotent() {
    let mut h = harness();
    h.storage
        .commit(&[
            movie("Heat", &[("imdb", "tt1")], true, 1000),
            movie("Ronin", &[("imdb", "tt2")], true, 1000),
        ])
        .unwrap();

    h.mapper.load_data(None).unwrap();
    assert_eq!(h.mapper.objects_count(), 2);
    assert!(h.mapper.is_fully_loaded());

    h.mapper.load_data(None).unwrap();
    assert_eq!(h.mapper.objects_count(), 2);
}

#[test]
fn test_shared_guid_never_creates_second_record() {
    let mut h = harness();

    add(&mut h.mapper, movie("Heat", &[("imdb", "tt1"), ("tvdb", "7")], true, 1000));
    add(&mut h.mapper, movie("Heat", &[("tvdb", "7"), ("tmdb", "100")], true, 900));
    add(&mut h.mapper, movie("Heat", &[("tmdb", "100")], true, 1100));

    assert_eq!(h.mapper.objects_count(), 1);
    assert_eq!(h.mapper.count(), 1);
    let record = h.mapper.objects()[0];
    assert_eq!(record.guids.len(), 3);
    assert_eq!(record.updated, 1100);
}

#[test]
fn test_unwatched_observation_only_contributes_new_guids() {
    let mut h = harness();
    add(&mut h.mapper, movie("Heat", &[("imdb", "tt1")], true, 1000));

    let unwatched = movie("Heat", &[("imdb", "tt1"), ("tmdb", "100")], false, 5000);
    assert_eq!(add(&mut h.mapper, unwatched.clone()), AddOutcome::Updated);

    let record = h.mapper.get(&unwatched).unwrap();
    assert_eq!(record.guids, guids(&[("imdb", "tt1"), ("tmdb", "100")]));
    assert!(record.is_watched());
    assert_eq!(record.updated, 1000);

    assert_eq!(add(&mut h.mapper, unwatched), AddOutcome::IgnoredNotWatched);
    assert_eq!(h.counters.get(EntityType::Movie, "ignored_not_watched"), 1);
    assert_eq!(h.counters.get(EntityType::Movie, "updated"), 1);
}

#[test]
fn test_unknown_unwatched_is_ignored_unless_importing() {
    let mut h = harness();
    let unwatched = movie("Heat", &[("imdb", "tt1")], false, 1000);

    assert_eq!(add(&mut h.mapper, unwatched.clone()), AddOutcome::IgnoredNotWatched);
    assert_eq!(h.mapper.objects_count(), 0);

    let opts = AddOptions {
        import_unwatched: true,
        ..AddOptions::default()
    };
    assert_eq!(h.mapper.add(unwatched, &opts).unwrap(), AddOutcome::Added);
    assert_eq!(h.mapper.count(), 1);
}

#[test]
fn test_observation_older_than_last_sync_is_ignored() {
    let mut h = harness();
    add(&mut h.mapper, movie("Heat", &[("imdb", "tt1")], true, 1000));

    let opts = AddOptions {
        after: Some(Utc.timestamp_opt(2000, 0).unwrap()),
        ..AddOptions::default()
    };

    let stale = movie("Heat", &[("imdb", "tt1")], true, 1500);
    assert_eq!(h.mapper.add(stale, &opts).unwrap(), AddOutcome::IgnoredNotPlayedSinceLastSync);
    assert_eq!(h.counters.get(EntityType::Movie, "ignored_not_played_since_last_sync"), 1);

    let fresh = movie("Heat", &[("imdb", "tt1")], true, 2500);
    assert_eq!(h.mapper.add(fresh, &opts).unwrap(), AddOutcome::Updated);
}

#[test]
fn test_repeated_observation_is_no_change() {
    let mut h = harness();
    let heat = movie("Heat", &[("imdb", "tt1")], true, 1000);

    add(&mut h.mapper, heat.clone());
    assert_eq!(add(&mut h.mapper, heat), AddOutcome::IgnoredNoChange);
    assert_eq!(h.counters.get(EntityType::Movie, "ignored_no_change"), 1);
}

#[test]
fn test_commit_writes_pending_set_and_clears_state() {
    let mut h = harness();
    add(&mut h.mapper, movie("Heat", &[("imdb", "tt1")], true, 1000));
    add(&mut h.mapper, episode(&[("tvdb", "127131")], &[("tvdb", "73739")], true, 1000));

    let summary = h.mapper.commit().unwrap();

    assert_eq!(summary.get(EntityType::Movie).added, 1);
    assert_eq!(summary.get(EntityType::Episode).added, 1);
    assert_eq!(h.mapper.count(), 0);
    assert_eq!(h.mapper.objects_count(), 0);
    assert!(h.mapper.pointers_list().is_empty());
    assert_eq!(h.storage.get_all(None).unwrap().len(), 2);
}

#[test]
fn test_commit_only_sends_changed_records() {
    let mut h = harness();
    h.storage
        .commit(&[
            movie("Heat", &[("imdb", "tt1")], true, 1000),
            movie("Ronin", &[("imdb", "tt2")], true, 1000),
        ])
        .unwrap();

    h.mapper.load_data(None).unwrap();
    add(&mut h.mapper, movie("Ronin", &[("imdb", "tt2")], true, 1500));
    assert_eq!(h.mapper.changed_list().len(), 1);

    let summary = h.mapper.commit().unwrap();
    assert_eq!(summary.get(EntityType::Movie).updated, 1);
    assert_eq!(summary.get(EntityType::Movie).added, 0);
}

#[test]
fn test_failed_commit_keeps_pending_set() {
    let mut h = harness();
    add(&mut h.mapper, movie("Heat", &[("imdb", "tt1")], true, 1000));
    h.storage.fail_commit.store(true, Ordering::SeqCst);

    assert!(h.mapper.commit().is_err());
    assert_eq!(h.mapper.count(), 1);
    assert_eq!(h.mapper.objects_count(), 1);

    h.mapper.reset();
    assert_eq!(h.mapper.count(), 0);
    assert_eq!(h.mapper.objects_count(), 0);
}

#[test]
fn test_dry_run_commit_does_not_write() {
    let mut h = harness_with(MapperOptions {
        dry_run: true,
        ..MapperOptions::default()
    });
    assert!(h.mapper.in_dry_run_mode());

    add(&mut h.mapper, movie("Heat", &[("imdb", "tt1")], true, 1000));
    let summary = h.mapper.commit().unwrap();

    assert_eq!(summary.get(EntityType::Movie).added, 1);
    assert!(h.storage.get_all(None).unwrap().is_empty());
    assert_eq!(h.mapper.count(), 0);
}

#[test]
fn test_higher_priority_namespace_wins_lookup() {
    for reversed in [false, true] {
        let mut h = harness();
        let mut records = vec![
            movie("By imdb", &[("imdb", "tt1")], true, 1000),
            movie("By tmdb", &[("tmdb", "100")], true, 1000),
        ];
        if reversed {
            records.reverse();
        }
        h.storage.commit(&records).unwrap();
        h.mapper.load_data(None).unwrap();

        let lookup = movie("Lookup", &[("tmdb", "100"), ("imdb", "tt1")], true, 900);
        assert_eq!(h.mapper.get(&lookup).unwrap().title, "By imdb");

        add(&mut h.mapper, lookup.clone());
        assert_eq!(h.mapper.objects_count(), 2);
        assert_eq!(h.mapper.get(&lookup).unwrap().title, "By imdb");
        let by_tmdb = movie("", &[("tmdb", "100")], true, 0);
        assert_eq!(h.mapper.get(&by_tmdb).unwrap().title, "By tmdb");
    }
}

#[test]
fn test_real_guid_match_beats_relative_match() {
    let mut h = harness();
    add(&mut h.mapper, episode(&[], &[("tvdb", "73739")], true, 1000).with_title("Relative", None));
    add(&mut h.mapper, episode(&[("imdb", "tt0994359")], &[], true, 1000).with_title("Real", None));
    assert_eq!(h.mapper.objects_count(), 2);

    let lookup = episode(&[("imdb", "tt0994359")], &[("tvdb", "73739")], true, 900);
    assert_eq!(h.mapper.get(&lookup).unwrap().title, "Real");
}

#[test]
fn test_relative_identity_links_episodes_without_own_ids() {
    let mut h = harness();

    assert_eq!(
        add(&mut h.mapper, episode(&[], &[("tvdb", "73739")], true, 1000)),
        AddOutcome::Added
    );
    assert_eq!(
        add(&mut h.mapper, episode(&[("tvdb", "127131")], &[("tvdb", "73739")], true, 1100)),
        AddOutcome::Updated
    );

    assert_eq!(h.mapper.objects_count(), 1);
    let stored = h.mapper.objects()[0];
    assert_eq!(stored.guids.get("tvdb").map(String::as_str), Some("127131"));
}

#[test]
fn test_tainted_observation_keeps_play_state() {
    let mut h = harness();
    add(&mut h.mapper, movie("Heat", &[("imdb", "tt1")], true, 1000));

    let ping = movie("Heat", &[("imdb", "tt1"), ("tvdb", "9")], false, 3000).with_tainted(true);
    let opts = AddOptions {
        import_unwatched: true,
        ..AddOptions::default()
    };
    assert_eq!(h.mapper.add(ping.clone(), &opts).unwrap(), AddOutcome::Updated);

    let record = h.mapper.get(&ping).unwrap();
    assert!(record.is_watched());
    assert_eq!(record.updated, 1000);
    assert!(record.guids.contains_key("tvdb"));
}

#[test]
fn test_entity_without_identity_is_rejected() {
    let mut h = harness();
    let anonymous = Entity::new(EntityType::Movie, 1000, "home_plex")
        .with_title("Unknown", None)
        .with_guids(GuidRegistry::STANDARD.make_virtual_guid("home_plex", "42"))
        .with_watched(true);

    assert_eq!(add(&mut h.mapper, anonymous), AddOutcome::FailedNoGuid);
    assert_eq!(h.counters.get(EntityType::Movie, "failed_no_guid"), 1);
    assert_eq!(h.mapper.objects_count(), 0);
    assert_eq!(h.mapper.count(), 0);
}

#[test]
fn test_incremental_mode_hydrates_misses_from_storage() {
    let mut h = harness();
    h.storage.commit(&[movie("Heat", &[("imdb", "tt1")], false, 1000)]).unwrap();

    h.mapper.load_data(Some(Utc.timestamp_opt(5000, 0).unwrap())).unwrap();
    assert_eq!(h.mapper.objects_count(), 0);
    assert!(!h.mapper.is_fully_loaded());

    let watched = movie("Heat", &[("imdb", "tt1")], true, 6000);
    assert_eq!(add(&mut h.mapper, watched), AddOutcome::Updated);
    assert_eq!(h.storage.gets(), 1);
    assert_eq!(h.mapper.objects_count(), 1);

    let summary = h.mapper.commit().unwrap();
    assert_eq!(summary.get(EntityType::Movie).updated, 1);
    assert_eq!(h.storage.get_all(None).unwrap().len(), 1);
}

#[test]
fn test_full_load_never_falls_through_to_storage() {
    let mut h = harness();
    h.mapper.load_data(None).unwrap();

    h.storage.inner.commit(&[movie("Heat", &[("imdb", "tt1")], true, 1000)]).unwrap();
    assert!(!h.mapper.has(&movie("Heat", &[("imdb", "tt1")], true, 1000)));
    assert_eq!(h.storage.gets(), 0);
}

#[test]
fn test_remove_drops_record_and_index() {
    let mut h = harness();
    h.storage.commit(&[movie("Heat", &[("imdb", "tt1"), ("tmdb", "100")], true, 1000)]).unwrap();
    h.mapper.load_data(None).unwrap();

    let heat = movie("Heat", &[("imdb", "tt1")], true, 1000);
    assert!(h.mapper.remove(&heat).unwrap());
    assert_eq!(h.mapper.objects_count(), 0);
    assert!(h.mapper.pointers_list().is_empty());
    assert!(!h.mapper.has(&movie("Heat", &[("tmdb", "100")], true, 1000)));
    assert!(h.storage.get_all(None).unwrap().is_empty());

    assert!(!h.mapper.remove(&heat).unwrap());
}

#[test]
fn test_removed_identity_can_be_added_again() {
    let mut h = harness();
    let heat = movie("Heat", &[("imdb", "tt1")], true, 1000);

    add(&mut h.mapper, heat.clone());
    assert!(h.mapper.remove(&heat).unwrap());
    assert_eq!(add(&mut h.mapper, heat.clone()), AddOutcome::Added);
    assert!(h.mapper.has(&heat));
}

#[test]
fn test_trace_mode_still_merges() {
    let mut h = harness_with(MapperOptions {
        trace: true,
        ..MapperOptions::default()
    });
    assert!(h.mapper.in_trace_mode());

    add(&mut h.mapper, movie("Heat", &[("imdb", "tt1")], true, 1000));
    assert_eq!(
        add(&mut h.mapper, movie("Heat", &[("imdb", "tt1")], true, 2000)),
        AddOutcome::Updated
    );
}

#[test]
fn test_pointers_list_covers_every_namespace() {
    let mut h = harness();
    add(&mut h.mapper, movie("Heat", &[("imdb", "tt1"), ("tmdb", "100")], true, 1000));

    assert_eq!(h.mapper.pointers_list(), vec!["imdb://tt1", "tmdb://100"]);
}

#[test]
fn test_failed_remove_keeps_record_and_pending_merge() {
    let mut h = harness();
    h.storage.commit(&[movie("Heat", &[("imdb", "tt1")], false, 1000)]).unwrap();

    let heat = movie("Heat", &[("imdb", "tt1")], true, 2000);
    assert_eq!(add(&mut h.mapper, heat.clone()), AddOutcome::Updated);
    assert_eq!(h.mapper.count(), 1);

    h.storage.fail_remove.store(true, Ordering::SeqCst);
    assert!(h.mapper.remove(&heat).is_err());
    assert_eq!(h.mapper.count(), 1);
    assert_eq!(h.mapper.objects_count(), 1);
    assert_eq!(h.mapper.changed_list().len(), 1);
    assert!(h.mapper.has(&heat));

    let summary = h.mapper.commit().unwrap();
    assert_eq!(summary.get(EntityType::Movie).updated, 1);
    assert!(h.storage.get(&heat).unwrap().unwrap().is_watched());
}

#[test]
fn test_dry_run_remove_is_not_undone_by_storage_lookup() {
    let mut h = harness_with(MapperOptions {
        dry_run: true,
        ..MapperOptions::default()
    });
    h.storage.commit(&[movie("Heat", &[("imdb", "tt1"), ("tmdb", "100")], true, 1000)]).unwrap();

    let heat = movie("Heat", &[("imdb", "tt1")], true, 1000);
    assert!(h.mapper.has(&heat));
    assert_eq!(h.storage.gets(), 1);

    assert!(h.mapper.remove(&heat).unwrap());
    assert!(!h.mapper.has(&heat));
    assert_eq!(h.mapper.objects_count(), 0);
    assert_eq!(h.storage.gets(), 1);

    // storage still holds it; only this mapper forgot it
    assert_eq!(h.storage.inner.len(), 1);
}

#[test]
fn test_removed_pointers_skip_storage_lookup() {
    let mut h = harness();
    h.storage.commit(&[movie("Heat", &[("imdb", "tt1"), ("tmdb", "100")], true, 1000)]).unwrap();

    let heat = movie("Heat", &[("imdb", "tt1"), ("tmdb", "100")], true, 1000);
    assert!(h.mapper.remove(&heat).unwrap());
    assert_eq!(h.storage.gets(), 1);
    assert!(h.storage.inner.is_empty());

    // another writer stores the title again behind this mapper's back
    h.storage.inner.commit(&[movie("Heat", &[("tmdb", "100")], true, 1000)]).unwrap();
    assert!(!h.mapper.has(&movie("Heat", &[("tmdb", "100")], true, 1000)));
    assert_eq!(h.storage.gets(), 1);
    assert!(h.mapper.pointers_list().is_empty());
}

#[test]
fn test_full_load_indexes_every_stored_record() {
    let mut h = harness();
    let records: Vec<Entity> = (0..5_000)
        .map(|n| {
            let imdb = format!("tt{}", n);
            movie("Heat", &[("imdb", imdb.as_str())], true, 1000)
        })
        .collect();
    h.storage.commit(&records).unwrap();

    h.mapper.load_data(None).unwrap();
    assert_eq!(h.mapper.objects_count(), 5_000);
    assert_eq!(h.mapper.pointers_list().len(), 5_000);

    assert!(h.mapper.has(&movie("Heat", &[("imdb", "tt4999")], true, 1000)));
    assert_eq!(h.storage.gets(), 0);

    h.mapper.load_data(None).unwrap();
    assert_eq!(h.mapper.objects_count(), 5_000);
}
