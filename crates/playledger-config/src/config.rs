use playledger_models::{EntityType, TrackedField, TrackedFields};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mapper: MapperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub backends: BTreeMap<String, BackendConfig>,
    /// Per-kind overrides of the built-in webhook rules, keyed by kind name
    #[serde(default)]
    pub webhook_rules: BTreeMap<String, WebhookRules>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperConfig {
    #[serde(default)]
    pub import_unwatched: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub trace: bool,
    /// Field names compared to decide whether a merge changed a record
    #[serde(default = "default_tracked_fields")]
    pub tracked_fields: Vec<String>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            import_unwatched: false,
            dry_run: false,
            trace: false,
            tracked_fields: default_tracked_fields(),
        }
    }
}

impl MapperConfig {
    /// Parsed tracked field set.
    pub fn tracked_fields(&self) -> anyhow::Result<TrackedFields> {
        self.tracked_fields
            .iter()
            .map(|name| name.parse::<TrackedField>().map_err(anyhow::Error::from))
            .collect()
    }
}

fn default_tracked_fields() -> Vec<String> {
    TrackedFields::default().iter().map(|f| f.as_str().to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State snapshot location; defaults to `<data dir>/state.bin`
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub compression: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            file: None,
            compression: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Jellyfin,
    Emby,
    Plex,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Jellyfin => "jellyfin",
            BackendKind::Emby => "emby",
            BackendKind::Plex => "plex",
        }
    }
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jellyfin" => Ok(BackendKind::Jellyfin),
            "emby" => Ok(BackendKind::Emby),
            "plex" => Ok(BackendKind::Plex),
            other => Err(anyhow::anyhow!("Unknown backend kind '{}'", other)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub url: String,
    #[serde(default)]
    pub token: String,
    /// Backend user whose play state is tracked
    #[serde(default)]
    pub user: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Replaces the kind's webhook rules for this backend only
    #[serde(default)]
    pub webhook: Option<WebhookRules>,
}

/// Webhook allow-lists for one backend kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookRules {
    /// Backend-native item type -> entity type
    pub item_types: BTreeMap<String, EntityType>,
    pub events: BTreeSet<String>,
    /// Events whose observations are low confidence
    #[serde(default)]
    pub tainted: BTreeSet<String>,
}

impl WebhookRules {
    pub fn entity_type(&self, item_type: &str) -> Option<EntityType> {
        self.item_types.get(item_type).copied()
    }

    pub fn allows_event(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    pub fn is_tainted(&self, event: &str) -> bool {
        self.tainted.contains(event)
    }
}

/// Webhook rules for every backend kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRulesTable {
    jellyfin: WebhookRules,
    emby: WebhookRules,
    plex: WebhookRules,
}

impl WebhookRulesTable {
    pub fn get(&self, kind: BackendKind) -> &WebhookRules {
        match kind {
            BackendKind::Jellyfin => &self.jellyfin,
            BackendKind::Emby => &self.emby,
            BackendKind::Plex => &self.plex,
        }
    }

    pub fn set(&mut self, kind: BackendKind, rules: WebhookRules) {
        match kind {
            BackendKind::Jellyfin => self.jellyfin = rules,
            BackendKind::Emby => self.emby = rules,
            BackendKind::Plex => self.plex = rules,
        }
    }

    /// Rules for a configured backend, honouring its own override.
    pub fn for_backend(&self, backend: &BackendConfig) -> WebhookRules {
        backend
            .webhook
            .clone()
            .unwrap_or_else(|| self.get(backend.kind).clone())
    }
}

impl Default for WebhookRulesTable {
    fn default() -> Self {
        Self {
            jellyfin: default_jellyfin_webhook_rules(),
            emby: default_emby_webhook_rules(),
            plex: default_plex_webhook_rules(),
        }
    }
}

fn rules(types: &[(&str, EntityType)], events: &[&str], tainted: &[&str]) -> WebhookRules {
    WebhookRules {
        item_types: types.iter().map(|(name, kind)| (name.to_string(), *kind)).collect(),
        events: events.iter().map(|e| e.to_string()).collect(),
        tainted: tainted.iter().map(|e| e.to_string()).collect(),
    }
}

pub fn default_jellyfin_webhook_rules() -> WebhookRules {
    rules(
        &[("Movie", EntityType::Movie), ("Episode", EntityType::Episode)],
        &["ItemAdded", "UserDataSaved", "PlaybackStart", "PlaybackStop"],
        &["PlaybackStart", "PlaybackStop"],
    )
}

pub fn default_emby_webhook_rules() -> WebhookRules {
    rules(
        &[("Movie", EntityType::Movie), ("Episode", EntityType::Episode)],
        &[
            "item.markplayed",
            "item.markunplayed",
            "playback.scrobble",
            "playback.pause",
            "playback.start",
            "playback.stop",
        ],
        &["playback.pause", "playback.start", "playback.stop"],
    )
}

pub fn default_plex_webhook_rules() -> WebhookRules {
    rules(
        &[("movie", EntityType::Movie), ("episode", EntityType::Episode)],
        &[
            "library.new",
            "media.play",
            "media.pause",
            "media.resume",
            "media.stop",
            "media.scrobble",
        ],
        &["media.play", "media.pause", "media.resume", "media.stop"],
    )
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load_from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &PathBuf) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.mapper.tracked_fields()?;

        for (name, backend) in &self.backends {
            if name.trim().is_empty() {
                return Err(anyhow::anyhow!("Backend names cannot be empty"));
            }
            if backend.url.trim().is_empty() {
                return Err(anyhow::anyhow!("Backend '{}' has no url configured", name));
            }
            if let Some(rules) = &backend.webhook {
                validate_rules(&format!("backends.{}.webhook", name), rules)?;
            }
        }

        for (kind, rules) in &self.webhook_rules {
            kind.parse::<BackendKind>()?;
            validate_rules(&format!("webhook_rules.{}", kind), rules)?;
        }

        Ok(())
    }

    /// Built-in rules with this config's per-kind overrides applied.
    pub fn webhook_rules_table(&self) -> anyhow::Result<WebhookRulesTable> {
        let mut table = WebhookRulesTable::default();
        for (kind, rules) in &self.webhook_rules {
            table.set(kind.parse()?, rules.clone());
        }
        Ok(table)
    }

    pub fn backend(&self, name: &str) -> anyhow::Result<&BackendConfig> {
        let backend = self
            .backends
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Backend '{}' is not configured", name))?;
        if !backend.enabled {
            return Err(anyhow::anyhow!("Backend '{}' is disabled", name));
        }
        Ok(backend)
    }

    /// Names of enabled backends
    pub fn enabled_backends(&self) -> Vec<&str> {
        self.backends
            .iter()
            .filter(|(_, backend)| backend.enabled)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

fn validate_rules(section: &str, rules: &WebhookRules) -> anyhow::Result<()> {
    if rules.item_types.is_empty() {
        return Err(anyhow::anyhow!("{}: item_types cannot be empty", section));
    }
    if let Some(event) = rules.tainted.iter().find(|e| !rules.events.contains(*e)) {
        return Err(anyhow::anyhow!(
            "{}: tainted event '{}' is not in the allowed events",
            section,
            event
        ));
    }
    Ok(())
}
