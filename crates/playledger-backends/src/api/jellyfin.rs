use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use crate::error::BackendError;
use super::{get_json, http_client, number_at, string_at, timestamp_at, ItemDetails, ItemDetailsProvider};

/// Item lookups against the Jellyfin/Emby REST API, which share the
/// `/Users/{user}/Items/{id}` endpoint and the `X-Emby-Token` header.
pub struct JellyfinApiClient {
    client: reqwest::Client,
    base_url: String,
    user: String,
}

impl JellyfinApiClient {
    pub fn new(base_url: &str, token: &str, user: &str) -> Result<Self, BackendError> {
        if user.trim().is_empty() {
            return Err(BackendError::InvalidConfig(
                "a user id is required for item lookups".to_string(),
            ));
        }

        Ok(Self {
            client: http_client("x-emby-token", token)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            user: user.to_string(),
        })
    }

    fn item_url(&self, id: &str) -> String {
        format!(
            "{}/Users/{}/Items/{}",
            self.base_url,
            urlencoding::encode(&self.user),
            urlencoding::encode(id)
        )
    }
}

#[async_trait]
impl ItemDetailsProvider for JellyfinApiClient {
    async fn item_details(&self, id: &str) -> Result<ItemDetails, BackendError> {
        let url = self.item_url(id);
        debug!("Fetching item details from {}", url);
        let json = get_json(&self.client, &url).await?;
        Ok(parse_item(&json))
    }
}

/// Map a Jellyfin/Emby item document.
pub fn parse_item(item: &Value) -> ItemDetails {
    let provider_ids = item
        .get("ProviderIds")
        .and_then(Value::as_object)
        .map(|ids| {
            ids.iter()
                .filter_map(|(k, v)| Some((k.clone(), string_at(v, "")?)))
                .collect()
        })
        .unwrap_or_default();

    ItemDetails {
        id: string_at(item, "/Id"),
        item_type: string_at(item, "/Type"),
        title: string_at(item, "/Name").or_else(|| string_at(item, "/OriginalTitle")),
        year: number_at(item, "/ProductionYear"),
        series_id: string_at(item, "/SeriesId"),
        series_title: string_at(item, "/SeriesName"),
        season: number_at(item, "/ParentIndexNumber"),
        episode: number_at(item, "/IndexNumber"),
        provider_ids,
        last_played: timestamp_at(item, "/UserData/LastPlayedDate"),
        created: timestamp_at(item, "/DateCreated").or_else(|| timestamp_at(item, "/PremiereDate")),
    }
}
