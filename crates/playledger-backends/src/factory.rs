use playledger_config::BackendKind;
use std::sync::Arc;
use crate::api::{ItemDetailsProvider, JellyfinApiClient, PlexApiClient};
use crate::context::BackendContext;
use crate::error::BackendError;
use crate::webhook::{EmbyPayload, JellyfinPayload, Normalizer, PlexPayload, WebhookNormalizer};

/// API client for the backend's item lookups.
pub fn details_provider(context: &BackendContext) -> Result<Arc<dyn ItemDetailsProvider>, BackendError> {
    let provider: Arc<dyn ItemDetailsProvider> = match context.kind {
        BackendKind::Jellyfin | BackendKind::Emby => {
            Arc::new(JellyfinApiClient::new(&context.url, &context.token, &context.user)?)
        }
        BackendKind::Plex => Arc::new(PlexApiClient::new(&context.url, &context.token)?),
    };
    Ok(provider)
}

/// Normalizer for the backend's kind, fetching details through `details`.
pub fn normalizer_with(context: BackendContext, details: Arc<dyn ItemDetailsProvider>) -> Box<dyn WebhookNormalizer> {
    match context.kind {
        BackendKind::Jellyfin => Box::new(Normalizer::new(context, JellyfinPayload, details)),
        BackendKind::Emby => Box::new(Normalizer::new(context, EmbyPayload, details)),
        BackendKind::Plex => Box::new(Normalizer::new(context, PlexPayload, details)),
    }
}

/// Normalizer backed by the backend's real API.
pub fn create_normalizer(context: BackendContext) -> Result<Box<dyn WebhookNormalizer>, BackendError> {
    let details = details_provider(&context)?;
    Ok(normalizer_with(context, details))
}
