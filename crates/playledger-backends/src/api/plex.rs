use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use crate::error::BackendError;
use super::{get_json, http_client, number_at, string_at, timestamp_at, ItemDetails, ItemDetailsProvider};

pub struct PlexApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl PlexApiClient {
    pub fn new(base_url: &str, token: &str) -> Result<Self, BackendError> {
        Ok(Self {
            client: http_client("x-plex-token", token)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn metadata_url(&self, id: &str) -> String {
        format!(
            "{}/library/metadata/{}?includeGuids=1",
            self.base_url,
            urlencoding::encode(id)
        )
    }
}

#[async_trait]
impl ItemDetailsProvider for PlexApiClient {
    async fn item_details(&self, id: &str) -> Result<ItemDetails, BackendError> {
        let url = self.metadata_url(id);
        debug!("Fetching Plex metadata from {}", url);
        let json = get_json(&self.client, &url).await?;

        let metadata = json
            .pointer("/MediaContainer/Metadata/0")
            .ok_or_else(|| BackendError::Decode {
                url: url.clone(),
                reason: "response has no metadata".to_string(),
            })?;

        Ok(parse_metadata(metadata))
    }
}

/// Map a Plex `Metadata` object, from an API response or a webhook body.
pub fn parse_metadata(metadata: &Value) -> ItemDetails {
    let provider_ids = metadata
        .get("Guid")
        .and_then(Value::as_array)
        .map(|guids| {
            guids
                .iter()
                .filter_map(|guid| string_at(guid, "/id"))
                .filter_map(|uri| {
                    let (namespace, rest) = uri.split_once("://")?;
                    let id = rest.split(['?', '/']).next().unwrap_or_default();
                    Some((namespace.to_string(), id.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();

    ItemDetails {
        id: string_at(metadata, "/ratingKey"),
        item_type: string_at(metadata, "/type"),
        title: string_at(metadata, "/title"),
        year: number_at(metadata, "/year"),
        series_id: string_at(metadata, "/grandparentRatingKey"),
        series_title: string_at(metadata, "/grandparentTitle"),
        season: number_at(metadata, "/parentIndex"),
        episode: number_at(metadata, "/index"),
        provider_ids,
        last_played: timestamp_at(metadata, "/lastViewedAt"),
        created: timestamp_at(metadata, "/addedAt"),
    }
}
