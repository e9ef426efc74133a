pub mod jellyfin;
pub mod plex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use crate::error::BackendError;

pub use jellyfin::JellyfinApiClient;
pub use plex::PlexApiClient;

/// Item fields used to build an entity, from a webhook body or a backend API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItemDetails {
    pub id: Option<String>,
    pub item_type: Option<String>,
    pub title: Option<String>,
    pub year: Option<u32>,
    pub series_id: Option<String>,
    pub series_title: Option<String>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Raw `(namespace, id)` pairs, resolved later by the guid registry
    pub provider_ids: Vec<(String, String)>,
    pub last_played: Option<i64>,
    pub created: Option<i64>,
}

impl ItemDetails {
    /// Fill the gaps in `self` from `other`. Provider ids from both are kept,
    /// `self`'s first.
    pub fn or(mut self, other: ItemDetails) -> ItemDetails {
        self.id = self.id.or(other.id);
        self.item_type = self.item_type.or(other.item_type);
        self.title = self.title.or(other.title);
        self.year = self.year.or(other.year);
        self.series_id = self.series_id.or(other.series_id);
        self.series_title = self.series_title.or(other.series_title);
        self.season = self.season.or(other.season);
        self.episode = self.episode.or(other.episode);
        self.last_played = self.last_played.or(other.last_played);
        self.created = self.created.or(other.created);
        self.provider_ids.extend(other.provider_ids);
        self
    }
}

/// Fetches item metadata from a backend's own API.
#[async_trait]
pub trait ItemDetailsProvider: Send + Sync {
    async fn item_details(&self, id: &str) -> Result<ItemDetails, BackendError>;
}

pub(crate) fn string_at(value: &Value, pointer: &str) -> Option<String> {
    match value.pointer(pointer)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn number_at(value: &Value, pointer: &str) -> Option<u32> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Truthiness the way the backends encode it: bools, 0/1 and "true"/"false".
pub(crate) fn flag_at(value: &Value, pointer: &str) -> Option<bool> {
    match value.pointer(pointer)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Unix timestamp from a number or a date string. Dates without an offset are UTC.
pub(crate) fn timestamp_at(value: &Value, pointer: &str) -> Option<i64> {
    match value.pointer(pointer)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => parse_date(s),
        _ => None,
    }
}

pub(crate) fn parse_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Ok(ts) = raw.parse::<i64>() {
        return Some(ts);
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(raw) {
        return Some(date.timestamp());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

/// Build a JSON-only reqwest client with the given auth header.
pub(crate) fn http_client(header: &'static str, token: &str) -> Result<reqwest::Client, BackendError> {
    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::ACCEPT,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    headers.insert(
        reqwest::header::HeaderName::from_static(header),
        reqwest::header::HeaderValue::from_str(token)
            .map_err(|_| BackendError::InvalidConfig("token contains invalid characters".to_string()))?,
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(std::time::Duration::from_secs(30))
        .build()
        .map_err(|e| BackendError::InvalidConfig(format!("failed to create HTTP client: {}", e)))
}

pub(crate) async fn get_json(client: &reqwest::Client, url: &str) -> Result<Value, BackendError> {
    let response = client.get(url).send().await.map_err(|source| BackendError::Http {
        url: url.to_string(),
        source,
    })?;

    if !response.status().is_success() {
        return Err(BackendError::Status {
            url: url.to_string(),
            status: response.status().as_u16(),
        });
    }

    response.json::<Value>().await.map_err(|e| BackendError::Decode {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_helpers() {
        let payload = json!({
            "Item": {"Id": 42, "Name": " Heat ", "Played": "True", "Index": "3"},
            "Date": "2024-01-02T03:04:05.0000000Z",
            "Naive": "2024-01-02T03:04:05",
        });

        assert_eq!(string_at(&payload, "/Item/Id").as_deref(), Some("42"));
        assert_eq!(string_at(&payload, "/Item/Name").as_deref(), Some("Heat"));
        assert_eq!(flag_at(&payload, "/Item/Played"), Some(true));
        assert_eq!(number_at(&payload, "/Item/Index"), Some(3));
        assert_eq!(timestamp_at(&payload, "/Date"), Some(1_704_164_645));
        assert_eq!(timestamp_at(&payload, "/Naive"), Some(1_704_164_645));
        assert_eq!(string_at(&payload, "/Missing"), None);
    }

    #[test]
    fn test_details_fill_gaps_only() {
        let body = ItemDetails {
            title: Some("Heat".to_string()),
            provider_ids: vec![("imdb".to_string(), "tt0113277".to_string())],
            ..ItemDetails::default()
        };
        let api = ItemDetails {
            title: Some("Heat (1995)".to_string()),
            year: Some(1995),
            provider_ids: vec![("tmdb".to_string(), "949".to_string())],
            ..ItemDetails::default()
        };

        let merged = body.or(api);
        assert_eq!(merged.title.as_deref(), Some("Heat"));
        assert_eq!(merged.year, Some(1995));
        assert_eq!(merged.provider_ids.len(), 2);
        assert_eq!(merged.provider_ids[0].0, "imdb");
    }
}
