pub mod api;
pub mod body;
pub mod context;
pub mod error;
pub mod factory;
pub mod webhook;

pub use api::{ItemDetails, ItemDetailsProvider, JellyfinApiClient, PlexApiClient};
pub use body::parse_request_body;
pub use context::BackendContext;
pub use error::BackendError;
pub use factory::{create_normalizer, details_provider, normalizer_with};
pub use webhook::{
    EmbyPayload, JellyfinPayload, Normalizer, PayloadShape, PlayState, PlexPayload, WebhookEvent, WebhookNormalizer,
    WebhookRejection,
};
