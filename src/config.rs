use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::QlError;

pub const DEFAULT_CONFIG_FILE: &str = "subaru-ql.json";

pub const DEFAULT_METADATA_URL_TEMPLATE: &str = "http://jvo.nao.ac.jp/skynode/do/tap/spcam/sync?REQUEST=queryData&QUERY=SELECT%20*%20FROM%20spcam.frame%20WHERE%20data_id%20='{data_id}'";

pub const DEFAULT_PROGRESS_THRESHOLD: u64 = 10 * 1024 * 1024;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub metadata_cache: Option<String>,
    #[serde(default)]
    pub image_cache: Option<String>,
    #[serde(default)]
    pub metadata_url_template: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_retries: Option<usize>,
    #[serde(default)]
    pub progress_threshold_bytes: Option<u64>,
    #[serde(default)]
    pub decode_workers: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub metadata_cache: Utf8PathBuf,
    pub image_cache: Utf8PathBuf,
    pub metadata_url_template: String,
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_retries: usize,
    pub progress_threshold_bytes: u64,
    pub decode_workers: usize,
}

impl ResolvedConfig {
    /// Query URL against the metadata service for one observation.
    pub fn metadata_url(&self, data_id: &str) -> String {
        self.metadata_url_template.replace("{data_id}", data_id)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must be readable; the default file is optional.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, QlError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| QlError::ConfigRead(config_path.display().to_string()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| QlError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, QlError> {
        let metadata_cache = match config.metadata_cache {
            Some(path) => Utf8PathBuf::from(path),
            None => default_cache_root()?.join("votable"),
        };
        let image_cache = match config.image_cache {
            Some(path) => Utf8PathBuf::from(path),
            None => default_cache_root()?.join("fits"),
        };

        let metadata_url_template = config
            .metadata_url_template
            .unwrap_or_else(|| DEFAULT_METADATA_URL_TEMPLATE.to_string());
        if !metadata_url_template.contains("{data_id}") {
            return Err(QlError::ConfigParse(
                "metadata_url_template must contain {data_id}".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            metadata_cache,
            image_cache,
            metadata_url_template,
            timeout_secs: config.timeout_secs.unwrap_or(600),
            connect_timeout_secs: config.connect_timeout_secs.unwrap_or(30),
            max_retries: config.max_retries.unwrap_or(2),
            progress_threshold_bytes: config
                .progress_threshold_bytes
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_PROGRESS_THRESHOLD),
            decode_workers: config.decode_workers.unwrap_or(2).max(1),
        })
    }
}

fn default_cache_root() -> Result<Utf8PathBuf, QlError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("subaru-ql")).ok()
        })
        .ok_or_else(|| QlError::Filesystem("unable to resolve cache directory".to_string()))
}
