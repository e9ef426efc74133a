use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use crate::error::ValidationError;
use crate::guid::{GuidRegistry, Guids, VIRTUAL_NAMESPACE};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Movie,
    Episode,
}

impl EntityType {
    pub const ALL: [EntityType; 2] = [EntityType::Movie, EntityType::Episode];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Movie => "movie",
            EntityType::Episode => "episode",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "movie" => Ok(EntityType::Movie),
            "episode" => Ok(EntityType::Episode),
            other => Err(ValidationError::InvalidField {
                field: "type",
                reason: format!("unsupported entity type '{}'", other),
            }),
        }
    }
}

/// One backend's own view of a title, kept under `Entity::metadata[backend]`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackendSnapshot {
    /// Backend-native item id
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub watched: u8,
    #[serde(default)]
    pub guids: Guids,
    #[serde(default)]
    pub played_at: Option<i64>,
    /// Name of the event that produced this snapshot (webhooks only)
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub event_date: Option<DateTime<Utc>>,
}

/// Fields whose canonical projection decides whether a merge changed anything.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TrackedField {
    Title,
    Year,
    Season,
    Episode,
    Parent,
    Watched,
    Updated,
    Via,
    Guids,
    Metadata,
}

impl TrackedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackedField::Title => "title",
            TrackedField::Year => "year",
            TrackedField::Season => "season",
            TrackedField::Episode => "episode",
            TrackedField::Parent => "parent",
            TrackedField::Watched => "watched",
            TrackedField::Updated => "updated",
            TrackedField::Via => "via",
            TrackedField::Guids => "guids",
            TrackedField::Metadata => "metadata",
        }
    }
}

impl FromStr for TrackedField {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s.trim().to_lowercase().as_str() {
            "title" => TrackedField::Title,
            "year" => TrackedField::Year,
            "season" => TrackedField::Season,
            "episode" => TrackedField::Episode,
            "parent" => TrackedField::Parent,
            "watched" => TrackedField::Watched,
            "updated" => TrackedField::Updated,
            "via" => TrackedField::Via,
            "guids" => TrackedField::Guids,
            "metadata" => TrackedField::Metadata,
            other => {
                return Err(ValidationError::InvalidField {
                    field: "tracked_fields",
                    reason: format!("unknown field '{}'", other),
                })
            }
        };
        Ok(field)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedFields(BTreeSet<TrackedField>);

impl TrackedFields {
    pub fn contains(&self, field: TrackedField) -> bool {
        self.0.contains(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = TrackedField> + '_ {
        self.0.iter().copied()
    }
}

impl Default for TrackedFields {
    /// Everything except `via`, which changes with every backend that reports.
    fn default() -> Self {
        use TrackedField::*;
        [Title, Year, Season, Episode, Parent, Watched, Updated, Guids, Metadata]
            .into_iter()
            .collect()
    }
}

impl FromIterator<TrackedField> for TrackedFields {
    fn from_iter<T: IntoIterator<Item = TrackedField>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of `Entity::apply_merge`.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub entity: Entity,
    pub changed: bool,
}

/// One title's play-state observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entity {
    /// Storage-assigned identity, immutable once set
    #[serde(default)]
    id: Option<u64>,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<u32>,
    #[serde(default)]
    pub season: Option<u32>,
    #[serde(default)]
    pub episode: Option<u32>,
    /// Denormalized copy of the show's guids (episodes only)
    #[serde(default)]
    pub parent: Guids,
    #[serde(default)]
    pub watched: u8,
    /// Unix timestamp of the last authoritative play-state change
    pub updated: i64,
    #[serde(default)]
    pub via: String,
    #[serde(default)]
    pub guids: Guids,
    #[serde(default)]
    pub metadata: BTreeMap<String, BackendSnapshot>,
    /// Low-confidence observation; never persisted
    #[serde(skip)]
    pub tainted: bool,
}

impl Entity {
    pub fn new(entity_type: EntityType, updated: i64, via: impl Into<String>) -> Self {
        Self {
            id: None,
            entity_type,
            title: String::new(),
            year: None,
            season: None,
            episode: None,
            parent: Guids::new(),
            watched: 0,
            updated,
            via: via.into(),
            guids: Guids::new(),
            metadata: BTreeMap::new(),
            tainted: false,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>, year: Option<u32>) -> Self {
        self.title = title.into();
        self.year = year;
        self
    }

    pub fn with_guids(mut self, guids: Guids) -> Self {
        self.guids = guids;
        self
    }

    pub fn with_watched(mut self, watched: bool) -> Self {
        self.watched = u8::from(watched);
        self
    }

    pub fn with_episode(mut self, season: u32, episode: u32, parent: Guids) -> Self {
        self.season = Some(season);
        self.episode = Some(episode);
        self.parent = parent;
        self
    }

    pub fn with_tainted(mut self, tainted: bool) -> Self {
        self.tainted = tainted;
        self
    }

    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Assign the storage id. Re-assigning the same id is a no-op.
    pub fn assign_id(&mut self, id: u64) -> Result<(), ValidationError> {
        match self.id {
            Some(existing) if existing != id => Err(ValidationError::IdReassigned {
                existing,
                requested: id,
            }),
            _ => {
                self.id = Some(id);
                Ok(())
            }
        }
    }

    pub fn is_watched(&self) -> bool {
        self.watched == 1
    }

    /// Human readable name used in logs, e.g. `Heat (1995)` or `Lost - (01x002)`.
    pub fn display_name(&self) -> String {
        let title = if self.title.is_empty() { "??" } else { self.title.as_str() };
        match self.entity_type {
            EntityType::Movie => format!("{} ({})", title, self.year.unwrap_or(0)),
            EntityType::Episode => format!(
                "{} - ({:02}x{:03})",
                title,
                self.season.unwrap_or(0),
                self.episode.unwrap_or(0)
            ),
        }
    }

    /// This observation's own per-backend snapshot.
    pub fn snapshot(&self) -> BackendSnapshot {
        let mut snapshot = self.metadata.get(&self.via).cloned().unwrap_or_else(|| BackendSnapshot {
            watched: self.watched,
            ..BackendSnapshot::default()
        });
        if snapshot.guids.is_empty() {
            snapshot.guids = self.guids.clone();
        }
        snapshot
    }

    /// Record this observation's own snapshot under `metadata[via]` if absent.
    pub fn ensure_snapshot(&mut self) {
        if self.via.is_empty() || self.metadata.contains_key(&self.via) {
            return;
        }
        let snapshot = self.snapshot();
        self.metadata.insert(self.via.clone(), snapshot);
    }

    /// Build an entity from canonically named fields. Unrecognized fields are ignored.
    pub fn from_fields(row: &Value) -> Result<Self, ValidationError> {
        let map = row.as_object().ok_or_else(|| ValidationError::InvalidField {
            field: "row",
            reason: "expected an object".to_string(),
        })?;

        let entity_type: EntityType = match map.get("type") {
            Some(Value::String(kind)) => kind.parse()?,
            Some(other) => {
                return Err(ValidationError::InvalidField {
                    field: "type",
                    reason: format!("expected a string, got {}", other),
                })
            }
            None => return Err(ValidationError::MissingField("type")),
        };

        let updated = match map.get("updated") {
            Some(Value::Null) | None => return Err(ValidationError::MissingField("updated")),
            Some(value) => parse_timestamp("updated", value)?,
        };

        let mut entity = Entity::new(entity_type, updated, string_field(map, "via"));

        if let Some(id) = map.get("id").filter(|v| !v.is_null()) {
            let id = id.as_u64().ok_or_else(|| ValidationError::InvalidField {
                field: "id",
                reason: format!("expected a positive integer, got {}", id),
            })?;
            entity.id = Some(id);
        }

        entity.title = string_field(map, "title");
        entity.year = optional_number(map, "year")?;
        entity.season = optional_number(map, "season")?;
        entity.episode = optional_number(map, "episode")?;

        if let Some(watched) = map.get("watched") {
            entity.watched = parse_watched(watched)?;
        }

        entity.guids = guid_field(map, "guids");
        entity.parent = guid_field(map, "parent");
        GuidRegistry::STANDARD.retain_known(&mut entity.parent);
        entity.parent.remove(VIRTUAL_NAMESPACE);

        if let Some(metadata) = map.get("metadata").filter(|v| !v.is_null()) {
            entity.metadata = serde_json::from_value(metadata.clone()).map_err(|e| {
                ValidationError::InvalidField {
                    field: "metadata",
                    reason: e.to_string(),
                }
            })?;
        }

        entity.tainted = map.get("tainted").and_then(Value::as_bool).unwrap_or(false);

        Ok(entity)
    }

    /// Merge `other` into a copy of `self`.
    ///
    /// With `guid_only` set, only identifiers move: `guids`, `parent` and the
    /// guids of `metadata[other.via]`. Otherwise a newer authoritative
    /// observation also brings its `watched`/`updated` pair, and its snapshot
    /// replaces `metadata[other.via]`. A tainted observation never overwrites
    /// the play state of an untainted record.
    pub fn apply_merge(&self, other: &Entity, guid_only: bool, tracked: &TrackedFields) -> MergeOutcome {
        let mut merged = self.clone();

        merged.guids.extend(other.guids.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.parent.extend(other.parent.iter().map(|(k, v)| (k.clone(), v.clone())));

        let snapshot = other.snapshot();

        if guid_only {
            if !other.via.is_empty() {
                let entry = merged.metadata.entry(other.via.clone()).or_default();
                entry.guids.extend(snapshot.guids);
                if entry.id.is_none() {
                    entry.id = snapshot.id;
                }
            }
        } else {
            let authoritative = !other.tainted || self.tainted;
            let newer = other.updated >= self.updated;

            if authoritative && newer {
                merged.watched = other.watched;
                merged.updated = other.updated;
                merged.via = other.via.clone();
            }
            merged.adopt_descriptive(other, authoritative && newer);

            if !other.via.is_empty() {
                merged.metadata.insert(other.via.clone(), snapshot);
            }

            // An untainted record stays untainted; an authoritative observation clears session taint.
            merged.tainted = self.tainted && other.tainted;
        }

        let changed = self.projection(tracked) != merged.projection(tracked);

        MergeOutcome { entity: merged, changed }
    }

    /// Field-level differences between `before` and `self`, limited to `tracked`.
    pub fn diff(&self, before: &Entity, tracked: &TrackedFields) -> BTreeMap<&'static str, (Value, Value)> {
        let old = before.projection(tracked);
        let new = self.projection(tracked);

        new.into_iter()
            .filter_map(|(field, after)| {
                let prior = old.get(field).cloned().unwrap_or(Value::Null);
                (prior != after).then_some((field, (prior, after)))
            })
            .collect()
    }

    /// Canonical projection of the tracked fields.
    ///
    /// Event bookkeeping inside `metadata` is left out, so repeating the same
    /// observation later does not count as a change.
    fn projection(&self, tracked: &TrackedFields) -> BTreeMap<&'static str, Value> {
        tracked
            .iter()
            .map(|field| {
                let value = match field {
                    TrackedField::Title => json!(self.title),
                    TrackedField::Year => json!(self.year),
                    TrackedField::Season => json!(self.season),
                    TrackedField::Episode => json!(self.episode),
                    TrackedField::Parent => json!(self.parent),
                    TrackedField::Watched => json!(self.watched),
                    TrackedField::Updated => json!(self.updated),
                    TrackedField::Via => json!(self.via),
                    TrackedField::Guids => json!(self.guids),
                    TrackedField::Metadata => Value::Object(
                        self.metadata
                            .iter()
                            .map(|(backend, snapshot)| {
                                (
                                    backend.clone(),
                                    json!({
                                        "id": snapshot.id,
                                        "watched": snapshot.watched,
                                        "guids": snapshot.guids,
                                        "played_at": snapshot.played_at,
                                    }),
                                )
                            })
                            .collect(),
                    ),
                };
                (field.as_str(), value)
            })
            .collect()
    }

    fn adopt_descriptive(&mut self, other: &Entity, overwrite: bool) {
        if !other.title.is_empty() && (overwrite || self.title.is_empty()) {
            self.title = other.title.clone();
        }
        if other.year.is_some() && (overwrite || self.year.is_none()) {
            self.year = other.year;
        }
        if other.season.is_some() && (overwrite || self.season.is_none()) {
            self.season = other.season;
        }
        if other.episode.is_some() && (overwrite || self.episode.is_none()) {
            self.episode = other.episode;
        }
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> String {
    match map.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn optional_number(map: &Map<String, Value>, key: &'static str) -> Result<Option<u32>, ValidationError> {
    let invalid = |value: &Value| ValidationError::InvalidField {
        field: key,
        reason: format!("expected a non-negative integer, got {}", value),
    };

    let Some(value) = map.get(key) else {
        return Ok(None);
    };

    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid(value)),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s.trim().parse().map(Some).map_err(|_| invalid(value)),
        _ => Err(invalid(value)),
    }
}

fn parse_watched(value: &Value) -> Result<u8, ValidationError> {
    let watched = match value {
        Value::Bool(b) => Some(u8::from(*b)),
        Value::Number(n) => n.as_u64().filter(|n| *n <= 1).map(|n| n as u8),
        Value::String(s) => match s.trim() {
            "0" | "false" => Some(0),
            "1" | "true" => Some(1),
            _ => None,
        },
        Value::Null => Some(0),
        _ => None,
    };

    watched.ok_or_else(|| ValidationError::InvalidField {
        field: "watched",
        reason: format!("expected 0 or 1, got {}", value),
    })
}

fn parse_timestamp(field: &'static str, value: &Value) -> Result<i64, ValidationError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(s.trim()).ok().map(|d| d.timestamp())),
        _ => None,
    };

    parsed.ok_or_else(|| ValidationError::InvalidField {
        field,
        reason: format!("expected a unix timestamp or RFC 3339 date, got {}", value),
    })
}

fn guid_field(map: &Map<String, Value>, key: &str) -> Guids {
    let Some(Value::Object(raw)) = map.get(key) else {
        return Guids::new();
    };

    let pairs: Vec<(String, String)> = raw
        .iter()
        .filter_map(|(k, v)| {
            let value = match v {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            Some((k.clone(), value))
        })
        .collect();

    let mut guids = GuidRegistry::STANDARD.resolve(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    if let Some((_, virtual_id)) = pairs.iter().find(|(k, _)| k == VIRTUAL_NAMESPACE) {
        if !virtual_id.trim().is_empty() {
            guids.insert(VIRTUAL_NAMESPACE.to_string(), virtual_id.trim().to_string());
        }
    }

    guids
}

#[cfg(test)]
mod tests;
