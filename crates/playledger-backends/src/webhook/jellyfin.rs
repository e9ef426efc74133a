use chrono::{DateTime, Utc};
use serde_json::Value;
use crate::api::{flag_at, number_at, string_at, timestamp_at, ItemDetails};
use super::{Normalizer, PayloadShape, PlayState};

pub type JellyfinNormalizer = Normalizer<JellyfinPayload>;

/// Flat body sent by the Jellyfin webhook plugin: `NotificationType`,
/// `ItemType`, `ItemId`, `Played`, `LastPlayedDate` and `Provider_*` keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct JellyfinPayload;

impl PayloadShape for JellyfinPayload {
    fn event(&self, payload: &Value) -> Option<String> {
        string_at(payload, "/NotificationType")
    }

    fn item_type(&self, payload: &Value) -> Option<String> {
        string_at(payload, "/ItemType")
    }

    fn item_id(&self, payload: &Value) -> Option<String> {
        string_at(payload, "/ItemId")
    }

    fn play_state(&self, _event: &str, payload: &Value, _received_at: DateTime<Utc>) -> PlayState {
        let watched = flag_at(payload, "/Played").unwrap_or(false);
        PlayState {
            watched,
            played_at: if watched { timestamp_at(payload, "/LastPlayedDate") } else { None },
        }
    }

    fn body_details(&self, payload: &Value) -> ItemDetails {
        let provider_ids = payload
            .as_object()
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(key, _)| key.to_lowercase().starts_with("provider_"))
                    .filter_map(|(key, value)| Some((key.clone(), string_at(value, "")?)))
                    .collect()
            })
            .unwrap_or_default();

        ItemDetails {
            id: string_at(payload, "/ItemId"),
            item_type: string_at(payload, "/ItemType"),
            title: string_at(payload, "/Name"),
            year: number_at(payload, "/Year"),
            series_id: string_at(payload, "/SeriesId"),
            series_title: string_at(payload, "/SeriesName"),
            season: number_at(payload, "/SeasonNumber"),
            episode: number_at(payload, "/EpisodeNumber"),
            provider_ids,
            last_played: None,
            created: None,
        }
    }
}
