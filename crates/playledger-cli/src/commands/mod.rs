pub mod backup;
pub mod index;
pub mod maintenance;
pub mod webhook;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use playledger_config::{Config, PathManager};
use playledger_core::FileStorage;
use std::sync::Arc;

/// Load and validate `config.toml`. A missing file means an empty config.
pub fn load_config(paths: &PathManager) -> Result<Config> {
    let config_file = paths.config_file();
    let config = if config_file.exists() {
        Config::load_from_file(&config_file)
            .map_err(|e| eyre!("Failed to load config from {}: {}", config_file.display(), e))?
    } else {
        tracing::debug!("No config file at {}, using defaults", config_file.display());
        Config::default()
    };

    config
        .validate()
        .map_err(|e| eyre!("Configuration validation failed: {}", e))?;
    Ok(config)
}

/// Open the state snapshot named by the config, or the default one.
pub fn open_storage(config: &Config, paths: &PathManager) -> Result<Arc<FileStorage>> {
    let state_file = config.storage.file.clone().unwrap_or_else(|| paths.state_file());
    let storage = FileStorage::open(&state_file, config.storage.compression)
        .map_err(|e| eyre!("Failed to open state file {}: {}", state_file.display(), e))?;
    Ok(Arc::new(storage))
}
