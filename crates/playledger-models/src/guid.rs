use std::collections::BTreeMap;
use tracing::debug;
use crate::entity::{Entity, EntityType};

/// Namespace used for backend-scoped fallback identities.
pub const VIRTUAL_NAMESPACE: &str = "vguid";

/// Namespace used for episode identities derived from the show's guids.
pub const RELATIVE_NAMESPACE: &str = "rguid";

/// Resolved identifiers: namespace -> external id.
pub type Guids = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IdFormat {
    /// `tt` followed by digits
    Imdb,
    /// digits only
    Numeric,
    /// any non-empty value
    Opaque,
}

#[derive(Debug, Clone, Copy)]
struct NamespaceSpec {
    name: &'static str,
    aliases: &'static [&'static str],
    format: IdFormat,
}

/// Real external-database namespaces, highest priority first.
///
/// The order here is the lookup tie-break used by the mapper, so new entries
/// go at the end unless the ranking is meant to change.
const REAL_NAMESPACES: &[NamespaceSpec] = &[
    NamespaceSpec { name: "imdb", aliases: &["imdb_id"], format: IdFormat::Imdb },
    NamespaceSpec { name: "tvdb", aliases: &["thetvdb", "tvdb_id"], format: IdFormat::Numeric },
    NamespaceSpec { name: "tmdb", aliases: &["themoviedb", "tmdb_id"], format: IdFormat::Numeric },
    NamespaceSpec { name: "tvmaze", aliases: &[], format: IdFormat::Numeric },
    NamespaceSpec { name: "tvrage", aliases: &[], format: IdFormat::Numeric },
    NamespaceSpec { name: "anidb", aliases: &[], format: IdFormat::Numeric },
    NamespaceSpec { name: "youtube", aliases: &[], format: IdFormat::Opaque },
];

/// Full priority order, including the virtual fallback namespace.
const PRIORITY: &[&str] = &["imdb", "tvdb", "tmdb", "tvmaze", "tvrage", "anidb", "youtube", VIRTUAL_NAMESPACE];

/// Prefixes some backends put in front of the namespace name.
const KEY_PREFIXES: &[&str] = &["provider_", "guid_", "com.plexapp.agents."];

/// Registry of supported identifier namespaces.
///
/// Normalizes raw provider ids into canonical `namespace -> id` maps and
/// produces the ordered pointer strings used as identity index keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuidRegistry;

impl GuidRegistry {
    pub const STANDARD: GuidRegistry = GuidRegistry;

    /// Namespace priority order. Never reordered at runtime.
    pub fn priority(&self) -> &'static [&'static str] {
        PRIORITY
    }

    /// Every namespace allowed as a key of `Entity::guids`.
    pub fn is_known(&self, namespace: &str) -> bool {
        PRIORITY.contains(&namespace)
    }

    /// Is this a real external-database namespace (not a fallback)?
    pub fn is_real(&self, namespace: &str) -> bool {
        REAL_NAMESPACES.iter().any(|spec| spec.name == namespace)
    }

    /// Normalize raw `(key, value)` pairs into canonical guids.
    ///
    /// Unknown namespaces and malformed values are dropped. When two raw keys
    /// map to the same namespace the first one wins.
    pub fn resolve<I, K, V>(&self, raw: I) -> Guids
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut guids = Guids::new();

        for (key, value) in raw {
            let key = key.as_ref();
            let Some(spec) = Self::lookup(key) else {
                debug!("Ignoring unsupported guid namespace '{}'", key);
                continue;
            };

            if guids.contains_key(spec.name) {
                continue;
            }

            match Self::normalize_value(spec, value.as_ref()) {
                Some(id) => {
                    guids.insert(spec.name.to_string(), id);
                }
                None => {
                    debug!("Ignoring malformed {} id '{}'", spec.name, value.as_ref());
                }
            }
        }

        guids
    }

    /// Normalize URI-style guids such as `imdb://tt0111161` or
    /// `com.plexapp.agents.themoviedb://278?lang=en`.
    pub fn resolve_uris<I, S>(&self, uris: I) -> Guids
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let pairs: Vec<(String, String)> = uris
            .into_iter()
            .filter_map(|uri| {
                let (key, rest) = uri.as_ref().split_once("://")?;
                let value = rest.split(['?', '/']).next().unwrap_or_default();
                Some((key.to_string(), value.to_string()))
            })
            .collect();

        self.resolve(pairs)
    }

    /// Canonical pointers for an entity, in lookup order: real guids by
    /// namespace priority, then the virtual guid, then relative identities.
    pub fn pointers(&self, entity: &Entity) -> Vec<String> {
        let mut pointers: Vec<String> = PRIORITY
            .iter()
            .filter_map(|namespace| {
                entity
                    .guids
                    .get(*namespace)
                    .map(|id| Self::pointer(namespace, id))
            })
            .collect();

        pointers.extend(self.relative_pointers(entity));
        pointers
    }

    /// Relative pointers for an episode, one per real parent namespace.
    pub fn relative_pointers(&self, entity: &Entity) -> Vec<String> {
        if entity.entity_type != EntityType::Episode {
            return Vec::new();
        }

        let (Some(season), Some(episode)) = (entity.season, entity.episode) else {
            return Vec::new();
        };

        REAL_NAMESPACES
            .iter()
            .filter_map(|spec| {
                entity
                    .parent
                    .get(spec.name)
                    .map(|id| Self::relative_pointer(spec.name, id, season, episode))
            })
            .collect()
    }

    /// Fallback identity scoped to one backend item.
    pub fn make_virtual_guid(&self, backend: &str, native_id: &str) -> Guids {
        let mut guids = Guids::new();
        guids.insert(VIRTUAL_NAMESPACE.to_string(), format!("{}/{}", backend, native_id));
        guids
    }

    /// Strongest relative identity derivable from the show's guids.
    pub fn relative_identity(&self, parent: &Guids, season: u32, episode: u32) -> Option<String> {
        REAL_NAMESPACES.iter().find_map(|spec| {
            parent
                .get(spec.name)
                .map(|id| Self::relative_pointer(spec.name, id, season, episode))
        })
    }

    /// Does the entity carry at least one real external id?
    pub fn has_real_guids(&self, entity: &Entity) -> bool {
        entity.guids.keys().any(|namespace| self.is_real(namespace))
    }

    pub fn has_relative_identity(&self, entity: &Entity) -> bool {
        !self.relative_pointers(entity).is_empty()
    }

    /// An entity can be imported when it has a real guid or a relative identity.
    pub fn is_identifiable(&self, entity: &Entity) -> bool {
        self.has_real_guids(entity) || self.has_relative_identity(entity)
    }

    /// Drop keys that are not part of the namespace set.
    pub fn retain_known(&self, guids: &mut Guids) {
        guids.retain(|namespace, id| self.is_known(namespace) && !id.trim().is_empty());
    }

    fn pointer(namespace: &str, id: &str) -> String {
        format!("{}://{}", namespace, id)
    }

    fn relative_pointer(namespace: &str, id: &str, season: u32, episode: u32) -> String {
        format!("{}://{}:{}/{}/{}", RELATIVE_NAMESPACE, namespace, id, season, episode)
    }

    fn lookup(raw_key: &str) -> Option<&'static NamespaceSpec> {
        let mut key = raw_key.trim().to_lowercase();
        for prefix in KEY_PREFIXES {
            if let Some(stripped) = key.strip_prefix(prefix) {
                key = stripped.to_string();
            }
        }

        REAL_NAMESPACES
            .iter()
            .find(|spec| spec.name == key || spec.aliases.contains(&key.as_str()))
    }

    fn normalize_value(spec: &NamespaceSpec, raw: &str) -> Option<String> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }

        match spec.format {
            IdFormat::Imdb => {
                let lower = value.to_lowercase();
                let digits = lower.strip_prefix("tt").unwrap_or(&lower);
                if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
                    Some(format!("tt{}", digits))
                } else {
                    None
                }
            }
            IdFormat::Numeric => {
                let digits = value.trim_start_matches('0');
                if value.chars().all(|c| c.is_ascii_digit()) && !digits.is_empty() {
                    Some(digits.to_string())
                } else {
                    None
                }
            }
            IdFormat::Opaque => Some(value.to_string()),
        }
    }
}
