pub mod emby;
pub mod jellyfin;
pub mod plex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use playledger_models::{BackendSnapshot, Entity, EntityType, GuidRegistry, Guids, VIRTUAL_NAMESPACE};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, warn};
use crate::api::{ItemDetails, ItemDetailsProvider};
use crate::context::BackendContext;

pub use emby::EmbyPayload;
pub use jellyfin::JellyfinPayload;
pub use plex::PlexPayload;

/// Why a webhook produced no entity, with the HTTP status to answer with.
///
/// 400 means the payload is malformed. 200 means it was understood and
/// deliberately ignored, so the backend must not retry it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRejection {
    pub status: u16,
    pub message: String,
}

impl WebhookRejection {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
        }
    }

    pub fn ignored(message: impl Into<String>) -> Self {
        Self {
            status: 200,
            message: message.into(),
        }
    }
}

impl fmt::Display for WebhookRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.status, self.message)
    }
}

/// A payload that passed the allow-lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub event: String,
    pub item_type: String,
    pub entity_type: EntityType,
    pub item_id: String,
    pub tainted: bool,
}

/// Play state as the webhook body reports it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayState {
    pub watched: bool,
    pub played_at: Option<i64>,
}

/// Where one backend keeps things in its webhook body.
pub trait PayloadShape: Send + Sync {
    fn event(&self, payload: &Value) -> Option<String>;

    fn item_type(&self, payload: &Value) -> Option<String>;

    fn item_id(&self, payload: &Value) -> Option<String>;

    fn play_state(&self, event: &str, payload: &Value, received_at: DateTime<Utc>) -> PlayState;

    /// Item fields carried by the body itself.
    fn body_details(&self, payload: &Value) -> ItemDetails;
}

/// Converts one backend's webhook payloads into entities.
#[async_trait]
pub trait WebhookNormalizer: Send + Sync {
    fn context(&self) -> &BackendContext;

    /// Check a payload against the backend's allow-lists.
    fn validate(&self, payload: Option<&Value>) -> Result<WebhookEvent, WebhookRejection>;

    /// Build the entity for a payload received at `received_at`.
    async fn normalize(&self, payload: Option<&Value>, received_at: DateTime<Utc>) -> Result<Entity, WebhookRejection>;
}

/// Normalizer driven by a backend's payload shape and webhook rules.
pub struct Normalizer<S> {
    context: BackendContext,
    shape: S,
    details: Arc<dyn ItemDetailsProvider>,
    registry: GuidRegistry,
    series_guids: Mutex<HashMap<String, Guids>>,
}

impl<S: PayloadShape> Normalizer<S> {
    pub fn new(context: BackendContext, shape: S, details: Arc<dyn ItemDetailsProvider>) -> Self {
        Self {
            context,
            shape,
            details,
            registry: GuidRegistry::STANDARD,
            series_guids: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch API details when the body lacks title, year, numbering or ids.
    async fn enrich(&self, event: &WebhookEvent, body: ItemDetails) -> ItemDetails {
        let incomplete = body.title.is_none()
            || body.provider_ids.is_empty()
            || match event.entity_type {
                EntityType::Movie => body.year.is_none(),
                EntityType::Episode => {
                    body.season.is_none() || body.episode.is_none() || body.series_title.is_none()
                }
            };

        if !incomplete {
            return body;
        }

        match self.details.item_details(&event.item_id).await {
            Ok(details) => body.or(details),
            Err(e) => {
                warn!(
                    "{}: failed to fetch details for item {}: {}. Using webhook body only.",
                    self.context.name, event.item_id, e
                );
                body
            }
        }
    }

    /// Guids of the show an episode belongs to, fetched once per series.
    async fn parent_guids(&self, series_id: &str) -> Guids {
        if let Some(cached) = self.cached_series(series_id) {
            return cached;
        }

        let guids = match self.details.item_details(series_id).await {
            Ok(series) => {
                let mut guids = self.registry.resolve(
                    series
                        .provider_ids
                        .iter()
                        .map(|(k, v)| (k.as_str(), v.as_str())),
                );
                guids.remove(VIRTUAL_NAMESPACE);
                guids
            }
            Err(e) => {
                warn!(
                    "{}: failed to fetch series {}: {}",
                    self.context.name, series_id, e
                );
                return Guids::new();
            }
        };

        if let Ok(mut cache) = self.series_guids.lock() {
            cache.insert(series_id.to_string(), guids.clone());
        }
        guids
    }

    fn cached_series(&self, series_id: &str) -> Option<Guids> {
        self.series_guids
            .lock()
            .ok()
            .and_then(|cache| cache.get(series_id).cloned())
    }
}

#[async_trait]
impl<S: PayloadShape> WebhookNormalizer for Normalizer<S> {
    fn context(&self) -> &BackendContext {
        &self.context
    }

    fn validate(&self, payload: Option<&Value>) -> Result<WebhookEvent, WebhookRejection> {
        let name = &self.context.name;
        let Some(payload) = payload else {
            return Err(WebhookRejection::bad_request(format!("{}: No payload.", name)));
        };

        let rules = &self.context.rules;

        let item_type = self.shape.item_type(payload).unwrap_or_else(|| "not_found".to_string());
        let Some(entity_type) = rules.entity_type(&item_type) else {
            return Err(WebhookRejection::ignored(format!(
                "{}: Webhook content type [{}] is not supported.",
                name, item_type
            )));
        };

        let event = self.shape.event(payload).unwrap_or_else(|| "unknown".to_string());
        if !rules.allows_event(&event) {
            return Err(WebhookRejection::ignored(format!(
                "{}: Webhook event type [{}] is not supported.",
                name, event
            )));
        }

        let Some(item_id) = self.shape.item_id(payload) else {
            return Err(WebhookRejection::bad_request(format!(
                "{}: No item id was found in body.",
                name
            )));
        };

        Ok(WebhookEvent {
            tainted: rules.is_tainted(&event),
            event,
            item_type,
            entity_type,
            item_id,
        })
    }

    async fn normalize(&self, payload: Option<&Value>, received_at: DateTime<Utc>) -> Result<Entity, WebhookRejection> {
        let event = self.validate(payload)?;
        let Some(payload) = payload else {
            return Err(WebhookRejection::bad_request(format!("{}: No payload.", self.context.name)));
        };
        let name = self.context.name.as_str();

        let play = self.shape.play_state(&event.event, payload, received_at);
        let details = self.enrich(&event, self.shape.body_details(payload)).await;

        let mut guids = self.registry.resolve(
            details
                .provider_ids
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
        );
        guids.remove(VIRTUAL_NAMESPACE);
        if guids.is_empty() {
            guids = self.registry.make_virtual_guid(name, &event.item_id);
        }

        let updated = play
            .played_at
            .or(if play.watched { details.last_played } else { None })
            .or(details.created)
            .unwrap_or_else(|| received_at.timestamp());

        let mut entity = Entity::new(event.entity_type, updated, name)
            .with_guids(guids.clone())
            .with_watched(play.watched)
            .with_tainted(event.tainted);

        match event.entity_type {
            EntityType::Movie => {
                entity.title = details.title.clone().unwrap_or_default();
                entity.year = details.year;
            }
            EntityType::Episode => {
                entity.title = details
                    .series_title
                    .clone()
                    .or_else(|| details.title.clone())
                    .unwrap_or_default();
                entity.year = details.year;
                entity.season = details.season;
                entity.episode = details.episode;
                if let Some(series_id) = &details.series_id {
                    entity.parent = self.parent_guids(series_id).await;
                }
            }
        }

        entity.metadata.insert(
            name.to_string(),
            BackendSnapshot {
                id: Some(event.item_id.clone()),
                watched: u8::from(play.watched),
                guids,
                played_at: if play.watched { Some(updated) } else { None },
                event: Some(event.event.clone()),
                event_date: Some(received_at),
            },
        );

        if !self.registry.is_identifiable(&entity) {
            error!(
                "Ignoring [{}] [{}] webhook event. No valid/supported external ids.",
                name,
                entity.display_name()
            );
            return Err(WebhookRejection::ignored(format!(
                "{}: Import ignored. No valid/supported external ids.",
                name
            )));
        }

        debug!(
            "{}: [{}] {} ({}, watched: {}, tainted: {})",
            name,
            event.event,
            entity.display_name(),
            event.item_type,
            entity.watched,
            entity.tainted
        );
        Ok(entity)
    }
}
