use super::*;
use chrono::TimeZone;
use serde_json::json;

fn guids(pairs: &[(&str, &str)]) -> Guids {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn movie(pairs: &[(&str, &str)], watched: bool, updated: i64) -> Entity {
    Entity::new(EntityType::Movie, updated, "home_plex")
        .with_title("Heat", Some(1995))
        .with_guids(guids(pairs))
        .with_watched(watched)
}

#[test]
fn test_from_fields_requires_type_and_updated() {
    let missing_type = Entity::from_fields(&json!({"updated": 1000, "guids": {"imdb": "tt1"}}));
    assert_eq!(missing_type.unwrap_err(), ValidationError::MissingField("type"));

    let missing_updated = Entity::from_fields(&json!({"type": "movie"}));
    assert_eq!(missing_updated.unwrap_err(), ValidationError::MissingField("updated"));
}

#[test]
fn test_from_fields_ignores_unknown_fields() {
    let entity = Entity::from_fields(&json!({
        "type": "episode",
        "updated": "2024-01-02T03:04:05Z",
        "title": "Lost",
        "season": 1,
        "episode": "2",
        "watched": true,
        "via": "home_jellyfin",
        "guids": {"Imdb": "tt0994359", "vguid": "home_jellyfin/9", "plex": "abc"},
        "parent": {"tvdb": "73739"},
        "extra": {"ignored": true},
    }))
    .unwrap();

    assert_eq!(entity.entity_type, EntityType::Episode);
    assert_eq!(entity.updated, 1_704_164_645);
    assert_eq!(entity.season, Some(1));
    assert_eq!(entity.episode, Some(2));
    assert!(entity.is_watched());
    assert_eq!(entity.guids, guids(&[("imdb", "tt0994359"), ("vguid", "home_jellyfin/9")]));
    assert_eq!(entity.parent, guids(&[("tvdb", "73739")]));
    assert_eq!(entity.id(), None);
}

#[test]
fn test_from_fields_rejects_invalid_watched() {
    let result = Entity::from_fields(&json!({"type": "movie", "updated": 1, "watched": 2}));
    assert!(matches!(result, Err(ValidationError::InvalidField { field: "watched", .. })));
}

#[test]
fn test_id_is_immutable_once_assigned() {
    let mut entity = movie(&[("imdb", "tt1")], true, 1000);
    entity.assign_id(7).unwrap();
    assert!(entity.assign_id(7).is_ok());
    assert_eq!(
        entity.assign_id(8),
        Err(ValidationError::IdReassigned { existing: 7, requested: 8 })
    );
    assert_eq!(entity.id(), Some(7));
}

#[test]
fn test_full_merge_adopts_newer_play_state() {
    let a = movie(&[("imdb", "tt1")], true, 1000);
    let b = movie(&[("imdb", "tt1"), ("tmdb", "100")], true, 1200);

    let outcome = a.apply_merge(&b, false, &TrackedFields::default());

    assert!(outcome.changed);
    assert_eq!(outcome.entity.guids, guids(&[("imdb", "tt1"), ("tmdb", "100")]));
    assert_eq!(outcome.entity.updated, 1200);
    assert!(outcome.entity.is_watched());
}

#[test]
fn test_full_merge_keeps_newer_local_state() {
    let local = movie(&[("imdb", "tt1")], true, 2000);
    let stale = movie(&[("imdb", "tt1"), ("tvdb", "5")], false, 1500);

    let merged = local.apply_merge(&stale, false, &TrackedFields::default()).entity;

    assert_eq!(merged.updated, 2000);
    assert!(merged.is_watched());
    assert!(merged.guids.contains_key("tvdb"));
}

#[test]
fn test_incoming_guid_wins_on_conflict() {
    let local = movie(&[("tmdb", "100")], true, 1000);
    let incoming = movie(&[("tmdb", "101")], true, 1000);

    let merged = local.apply_merge(&incoming, true, &TrackedFields::default()).entity;
    assert_eq!(merged.guids.get("tmdb").map(String::as_str), Some("101"));
}

#[test]
fn test_guid_only_merge_never_touches_play_state() {
    let local = movie(&[("imdb", "tt1")], true, 1000);
    let unwatched = movie(&[("imdb", "tt1"), ("tmdb", "100")], false, 5000);

    let outcome = local.apply_merge(&unwatched, true, &TrackedFields::default());

    assert!(outcome.changed);
    assert!(outcome.entity.is_watched());
    assert_eq!(outcome.entity.updated, 1000);
    assert_eq!(
        outcome.entity.metadata["home_plex"].guids,
        guids(&[("imdb", "tt1"), ("tmdb", "100")])
    );
}

#[test]
fn test_guid_only_merge_without_new_ids_is_unchanged() {
    let local = movie(&[("imdb", "tt1")], true, 1000);
    let first = local.apply_merge(&movie(&[("imdb", "tt1")], false, 9000), true, &TrackedFields::default());
    let second = first
        .entity
        .apply_merge(&movie(&[("imdb", "tt1")], false, 9500), true, &TrackedFields::default());

    assert!(!second.changed);
}

#[test]
fn test_tainted_observation_does_not_overwrite_untainted_state() {
    let local = movie(&[("imdb", "tt1")], true, 1000);
    let ping = movie(&[("imdb", "tt1"), ("tvdb", "9")], false, 3000).with_tainted(true);

    let merged = local.apply_merge(&ping, false, &TrackedFields::default()).entity;

    assert!(merged.is_watched());
    assert_eq!(merged.updated, 1000);
    assert!(merged.guids.contains_key("tvdb"));
    assert!(!merged.tainted);
}

#[test]
fn test_tainted_records_accept_newer_observations() {
    let local = movie(&[("imdb", "tt1")], false, 1000).with_tainted(true);

    let ping = movie(&[("imdb", "tt1")], true, 2000).with_tainted(true);
    let merged = local.apply_merge(&ping, false, &TrackedFields::default()).entity;
    assert!(merged.is_watched());
    assert!(merged.tainted);

    let authoritative = movie(&[("imdb", "tt1")], true, 2500);
    let merged = merged.apply_merge(&authoritative, false, &TrackedFields::default()).entity;
    assert_eq!(merged.updated, 2500);
    assert!(!merged.tainted);
}

#[test]
fn test_authoritative_observation_clears_taint() {
    let pinged = movie(&[("imdb", "tt1")], true, 2000).with_tainted(true);
    let scrobble = movie(&[("imdb", "tt1")], true, 2000);

    let outcome = pinged.apply_merge(&scrobble, false, &TrackedFields::default());

    assert!(!outcome.entity.tainted);
    assert!(outcome.entity.is_watched());
    assert_eq!(outcome.entity.updated, 2000);

    // guid-only merges never touch the flag
    let guid_only = pinged.apply_merge(&scrobble, true, &TrackedFields::default());
    assert!(guid_only.entity.tainted);
}

#[test]
fn test_repeated_event_bookkeeping_is_not_a_change() {
    let mut first = movie(&[("imdb", "tt1")], true, 1000);
    first.metadata.insert(
        "home_plex".to_string(),
        BackendSnapshot {
            watched: 1,
            guids: guids(&[("imdb", "tt1")]),
            event: Some("media.scrobble".to_string()),
            event_date: Some(Utc.timestamp_opt(1000, 0).unwrap()),
            ..BackendSnapshot::default()
        },
    );

    let mut again = first.clone();
    if let Some(snapshot) = again.metadata.get_mut("home_plex") {
        snapshot.event_date = Some(Utc.timestamp_opt(1100, 0).unwrap());
    }

    assert!(!first.apply_merge(&again, false, &TrackedFields::default()).changed);
}

#[test]
fn test_diff_lists_changed_fields_only() {
    let before = movie(&[("imdb", "tt1")], false, 1000);
    let after = movie(&[("imdb", "tt1")], true, 1200);

    let diff = after.diff(&before, &TrackedFields::default());

    assert_eq!(diff.len(), 2);
    assert_eq!(diff["watched"], (json!(0), json!(1)));
    assert_eq!(diff["updated"], (json!(1000), json!(1200)));
}

#[test]
fn test_tracked_fields_limit_change_detection() {
    let local = movie(&[("imdb", "tt1")], true, 1000);
    let renamed = movie(&[("imdb", "tt1")], true, 1000).with_title("Heat (Director's Cut)", Some(1995));

    let only_play_state: TrackedFields = [TrackedField::Watched, TrackedField::Updated].into_iter().collect();

    assert!(local.apply_merge(&renamed, false, &TrackedFields::default()).changed);
    assert!(!local.apply_merge(&renamed, false, &only_play_state).changed);
}

#[test]
fn test_display_name() {
    let episode = Entity::new(EntityType::Episode, 1, "home_emby")
        .with_title("Lost", None)
        .with_episode(1, 2, Guids::new());
    assert_eq!(episode.display_name(), "Lost - (01x002)");
    assert_eq!(movie(&[], true, 1).display_name(), "Heat (1995)");
}
