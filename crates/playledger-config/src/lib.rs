pub mod config;
pub mod paths;

pub use config::{
    default_emby_webhook_rules, default_jellyfin_webhook_rules, default_plex_webhook_rules, BackendConfig,
    BackendKind, Config, MapperConfig, StorageConfig, WebhookRules, WebhookRulesTable,
};
pub use paths::{container_base_path, PathManager};
