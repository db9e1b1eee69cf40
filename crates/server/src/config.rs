use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_ENV: &str = "TAGDEX_CONFIG";

const MAX_DEFAULT_LIST_LIMIT: usize = 1_000_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    /// Root of the watched music tree.
    pub target: String,
    pub index_path: String,
    pub blob_root: String,
    pub album_art_bucket: String,
    pub piece_bucket: String,
    pub upload_spool: String,
    pub upload_poll_secs: u64,
    /// Empty logs to stderr.
    pub log_file: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub default_list_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            target: "".to_string(),
            index_path: "library.redb".to_string(),
            blob_root: "blobs".to_string(),
            album_art_bucket: "album-art".to_string(),
            piece_bucket: "pieces".to_string(),
            upload_spool: "uploads".to_string(),
            upload_poll_secs: 5,
            log_file: "".to_string(),
            port: 8080,
            request_timeout_secs: 10,
            default_list_limit: 10,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// `--config` wins, then `TAGDEX_CONFIG`, then `config.yaml` next to the
/// executable.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    match env::var(CONFIG_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        fill_blank_defaults(&mut config);
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

fn fill_blank_defaults(config: &mut ServerConfig) {
    let defaults = ServerConfig::default();
    for (value, default) in [
        (&mut config.index_path, defaults.index_path),
        (&mut config.blob_root, defaults.blob_root),
        (&mut config.album_art_bucket, defaults.album_art_bucket),
        (&mut config.piece_bucket, defaults.piece_bucket),
        (&mut config.upload_spool, defaults.upload_spool),
    ] {
        if value.trim().is_empty() {
            *value = default;
        }
    }
    if config.port == 0 {
        config.port = defaults.port;
    }
    if config.upload_poll_secs == 0 {
        config.upload_poll_secs = defaults.upload_poll_secs;
    }
    if config.request_timeout_secs == 0 {
        config.request_timeout_secs = defaults.request_timeout_secs;
    }
    config.default_list_limit = config.default_list_limit.min(MAX_DEFAULT_LIST_LIMIT);
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_target(config_path: &Path, value: &str) -> Option<PathBuf> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(resolve_path(config_path, trimmed))
    }
}
