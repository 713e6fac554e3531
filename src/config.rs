use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const DEFAULT_CATALOG_BASE_URL: &str = "https://comicvine.gamespot.com/api";
const DEFAULT_CACHE_TTL_SECS: u64 = 1800;
const DEFAULT_REQUEST_INTERVAL_MS: u64 = 1000;
const DEFAULT_BATCH_SIZE: usize = 100;
const API_KEY_LEN: usize = 40;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Importer configuration
///
/// Built once by the caller and handed to the importer; nothing in the crate
/// reads settings from anywhere else.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root of the comic archive tree to scan
    pub comics_directory: PathBuf,
    /// Catalog API key (40 characters)
    pub api_key: String,
    /// Where downloaded images and the response cache live
    pub media_root: PathBuf,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Catalog REST endpoint, without trailing slash
    pub catalog_base_url: String,
    /// How long cached catalog responses stay valid
    pub cache_ttl: Duration,
    /// Minimum spacing between outbound catalog requests
    pub request_interval: Duration,
    /// Number of successfully read archives committed per batch
    pub batch_size: usize,
}

impl Config {
    /// Config with defaults for everything except the two operator inputs
    pub fn new(comics_directory: impl Into<PathBuf>, api_key: impl Into<String>) -> Self {
        let media_root = default_media_root();
        Self {
            comics_directory: comics_directory.into(),
            api_key: api_key.into(),
            database_path: media_root.join("longbox.db"),
            media_root,
            catalog_base_url: DEFAULT_CATALOG_BASE_URL.to_string(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            request_interval: Duration::from_millis(DEFAULT_REQUEST_INTERVAL_MS),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Load configuration from the environment, reading a `.env` file first if present
    pub fn load() -> Result<Self, ConfigError> {
        if dotenvy::dotenv().is_ok() {
            info!("Config: loaded .env file");
        }
        Self::from_env()
    }

    /// Load configuration from `LONGBOX_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let comics_directory = std::env::var("LONGBOX_COMICS_DIR")
            .map(PathBuf::from)
            .map_err(|_| ConfigError::Missing("LONGBOX_COMICS_DIR"))?;
        let api_key =
            std::env::var("LONGBOX_API_KEY").map_err(|_| ConfigError::Missing("LONGBOX_API_KEY"))?;
        validate_api_key(&api_key)?;

        let mut config = Self::new(comics_directory, api_key);

        if let Ok(root) = std::env::var("LONGBOX_MEDIA_ROOT") {
            config.media_root = PathBuf::from(root);
            config.database_path = config.media_root.join("longbox.db");
        }
        if let Ok(path) = std::env::var("LONGBOX_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(url) = std::env::var("LONGBOX_CATALOG_URL") {
            config.catalog_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse_var::<u64>("LONGBOX_CACHE_TTL_SECS")? {
            config.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>("LONGBOX_REQUEST_INTERVAL_MS")? {
            config.request_interval = Duration::from_millis(ms);
        }
        if let Some(size) = parse_var::<usize>("LONGBOX_BATCH_SIZE")? {
            if size == 0 {
                return Err(ConfigError::Invalid {
                    name: "LONGBOX_BATCH_SIZE",
                    reason: "must be greater than 0".to_string(),
                });
            }
            config.batch_size = size;
        }

        info!(
            "Config: comics directory {}, media root {}",
            config.comics_directory.display(),
            config.media_root.display()
        );

        Ok(config)
    }

    /// Directory downloaded catalog images are written to
    pub fn images_dir(&self) -> PathBuf {
        self.media_root.join("images")
    }

    /// Directory holding cached catalog responses
    pub fn cache_dir(&self) -> PathBuf {
        self.media_root.join("cache")
    }
}

fn default_media_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".longbox")
}

fn parse_var<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                name,
                reason: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Catalog keys are 40 hex-ish alphanumeric characters
pub fn validate_api_key(key: &str) -> Result<(), ConfigError> {
    if key.len() != API_KEY_LEN || !key.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(ConfigError::Invalid {
            name: "LONGBOX_API_KEY",
            reason: format!("expected {} alphanumeric characters", API_KEY_LEN),
        });
    }
    Ok(())
}
