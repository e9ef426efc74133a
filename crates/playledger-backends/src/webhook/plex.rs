use chrono::{DateTime, Utc};
use serde_json::Value;
use crate::api::plex::parse_metadata;
use crate::api::{number_at, string_at, timestamp_at, ItemDetails};
use super::{Normalizer, PayloadShape, PlayState};

pub type PlexNormalizer = Normalizer<PlexPayload>;

/// Plex webhook body: `event` plus a `Metadata` object shaped like the
/// library API's.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlexPayload;

impl PayloadShape for PlexPayload {
    fn event(&self, payload: &Value) -> Option<String> {
        string_at(payload, "/event")
    }

    fn item_type(&self, payload: &Value) -> Option<String> {
        string_at(payload, "/Metadata/type")
    }

    fn item_id(&self, payload: &Value) -> Option<String> {
        string_at(payload, "/Metadata/ratingKey")
    }

    fn play_state(&self, event: &str, payload: &Value, received_at: DateTime<Utc>) -> PlayState {
        if event == "media.scrobble" {
            return PlayState {
                watched: true,
                played_at: Some(received_at.timestamp()),
            };
        }

        let watched = number_at(payload, "/Metadata/viewCount").unwrap_or(0) > 0;
        PlayState {
            watched,
            played_at: if watched { timestamp_at(payload, "/Metadata/lastViewedAt") } else { None },
        }
    }

    fn body_details(&self, payload: &Value) -> ItemDetails {
        payload.get("Metadata").map(parse_metadata).unwrap_or_default()
    }
}
