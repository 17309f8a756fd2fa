//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.flowforge/` unless
//! `FLOWFORGE_DATA_DIR` is set) into [`EngineConfig`]. A missing or malformed
//! file falls back to defaults.

use std::path::{Path, PathBuf};

use flowforge_types::config::EngineConfig;
use secrecy::SecretString;

pub const DATA_DIR_ENV: &str = "FLOWFORGE_DATA_DIR";
pub const REGISTRY_TOKEN_ENV: &str = "FLOWFORGE_REGISTRY_TOKEN";
pub const CONFIG_FILE: &str = "config.toml";

/// `FLOWFORGE_DATA_DIR`, else `~/.flowforge`, else `./.flowforge`.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".flowforge")
}

/// Load `{data_dir}/config.toml`.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join(CONFIG_FILE);

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %config_path.display(), "no config file, using defaults");
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to read config, using defaults");
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(path = %config_path.display(), error = %err, "failed to parse config, using defaults");
            EngineConfig::default()
        }
    }
}

fn resolve_under(data_dir: &Path, configured: Option<&Path>, default: &str) -> PathBuf {
    match configured {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => data_dir.join(path),
        None => data_dir.join(default),
    }
}

pub fn plugins_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    resolve_under(data_dir, config.plugins.dir.as_deref(), "plugins")
}

pub fn results_dir(config: &EngineConfig, data_dir: &Path) -> PathBuf {
    resolve_under(data_dir, config.results.base_path.as_deref(), "results")
}

/// Registry bearer token from the environment, if set.
pub fn registry_token() -> Option<SecretString> {
    std::env::var(REGISTRY_TOKEN_ENV)
        .ok()
        .filter(|t| !t.is_empty())
        .map(SecretString::from)
}
