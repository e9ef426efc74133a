use chrono::{DateTime, Utc};
use serde_json::Value;
use crate::api::{flag_at, number_at, string_at, ItemDetails};
use super::{Normalizer, PayloadShape, PlayState};

pub type EmbyNormalizer = Normalizer<EmbyPayload>;

/// Emby's nested body: `Event` plus an `Item` document with `ProviderIds`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbyPayload;

impl PayloadShape for EmbyPayload {
    fn event(&self, payload: &Value) -> Option<String> {
        string_at(payload, "/Event")
    }

    fn item_type(&self, payload: &Value) -> Option<String> {
        string_at(payload, "/Item/Type")
    }

    fn item_id(&self, payload: &Value) -> Option<String> {
        string_at(payload, "/Item/Id")
    }

    fn play_state(&self, event: &str, payload: &Value, received_at: DateTime<Utc>) -> PlayState {
        match event {
            "item.markplayed" | "playback.scrobble" => PlayState {
                watched: true,
                played_at: Some(received_at.timestamp()),
            },
            "item.markunplayed" => PlayState::default(),
            _ => PlayState {
                watched: ["/Item/Played", "/Item/PlayedToCompletion", "/PlaybackInfo/PlayedToCompletion"]
                    .iter()
                    .any(|pointer| flag_at(payload, pointer).unwrap_or(false)),
                played_at: None,
            },
        }
    }

    fn body_details(&self, payload: &Value) -> ItemDetails {
        let provider_ids = payload
            .pointer("/Item/ProviderIds")
            .and_then(Value::as_object)
            .map(|ids| {
                ids.iter()
                    .filter_map(|(key, value)| Some((key.clone(), string_at(value, "")?)))
                    .collect()
            })
            .unwrap_or_default();

        ItemDetails {
            id: string_at(payload, "/Item/Id"),
            item_type: string_at(payload, "/Item/Type"),
            title: string_at(payload, "/Item/Name"),
            year: number_at(payload, "/Item/ProductionYear"),
            series_id: string_at(payload, "/Item/SeriesId"),
            series_title: string_at(payload, "/Item/SeriesName"),
            season: number_at(payload, "/Item/ParentIndexNumber"),
            episode: number_at(payload, "/Item/IndexNumber"),
            provider_ids,
            last_played: None,
            created: None,
        }
    }
}
