//! Configuration management module
//!
//! Provides centralized configuration including:
//! - File paths under `$HOME/.alert-relay/` (log file, config, reference data, stickers)
//! - Build information (date, version)
//! - `RelayConfig`, the runtime settings loaded from `config.toml`
//!
//! Every setting has a default so a missing config file still yields a runnable relay.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Directory name under `$HOME` holding all relay files.
const APP_DIR: &str = ".alert-relay";

/// Errors raised while loading configuration files.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path:?}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid feed url {url:?}: {source}")]
    FeedUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Path helpers and build information
pub struct Config;

impl Config {
    /// Root directory: `$HOME/.alert-relay`, or a temp directory if HOME is not available.
    pub fn app_dir() -> PathBuf {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(APP_DIR);
        }
        std::env::temp_dir().join("alert-relay")
    }

    /// Get the log file path: `$HOME/.alert-relay/debug.log`
    pub fn log_file_path() -> PathBuf {
        Self::app_dir().join("debug.log")
    }

    /// Ensure the log directory exists
    pub fn ensure_log_directory() -> std::io::Result<()> {
        let log_path = Self::log_file_path();
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Get the config file path: `$HOME/.alert-relay/config.toml`
    pub fn config_file_path() -> PathBuf {
        Self::app_dir().join("config.toml")
    }

    /// Reference data (areas, cities, countdown labels): `$HOME/.alert-relay/residence.json`
    pub fn residence_file_path() -> PathBuf {
        Self::app_dir().join("residence.json")
    }

    /// Contact directory: `$HOME/.alert-relay/contacts.json`
    pub fn contacts_file_path() -> PathBuf {
        Self::app_dir().join("contacts.json")
    }

    /// Sticker emoji assets: `$HOME/.alert-relay/stickers/emojis/`
    pub fn sticker_assets_dir() -> PathBuf {
        Self::app_dir().join("stickers").join("emojis")
    }

    /// Rendered stickers: `$HOME/.alert-relay/stickers/generated/`
    pub fn sticker_output_dir() -> PathBuf {
        Self::app_dir().join("stickers").join("generated")
    }

    /// Font used for sticker text: `$HOME/.alert-relay/stickers/font.ttf`
    pub fn sticker_font_path() -> PathBuf {
        Self::app_dir().join("stickers").join("font.ttf")
    }

    /// Build date stamped by build.rs, or "unknown".
    pub fn build_date() -> String {
        option_env!("BUILD_DATE").unwrap_or("unknown").to_string()
    }

    /// Returns the package version from CARGO_PKG_VERSION.
    pub fn version() -> String {
        env!("CARGO_PKG_VERSION").to_string()
    }
}

/// Runtime settings, one table per concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub feed: FeedConfig,
    pub dispatch: DispatchConfig,
    pub dedup: DedupConfig,
    pub stickers: StickerConfig,
    pub status: StatusConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub url: String,
    /// Extra handshake headers sent on every connect.
    pub headers: BTreeMap<String, String>,
    pub backoff_base_ms: u64,
    /// Upper bound for the reconnect delay. Unset means the delay keeps doubling.
    pub backoff_cap_ms: Option<u64>,
    /// Forced reconnect cadence, regardless of connection health.
    pub refresh_interval_secs: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        let headers = [
            ("Origin", "https://www.tzevaadom.co.il"),
            ("Host", "ws.tzevaadom.co.il:8443"),
            (
                "User-Agent",
                "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:87.0) Gecko/20100101 Firefox/87.0",
            ),
            ("Connection", "Upgrade"),
            ("Upgrade", "websocket"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            url: "wss://ws.tzevaadom.co.il:8443/socket?platform=WEB".to_string(),
            headers,
            backoff_base_ms: 1000,
            backoff_cap_ms: None,
            refresh_interval_secs: 2 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Display-name fragment of the group that receives notifications.
    pub target_chat: String,
    pub tick_interval_secs: u64,
    /// Alerts within this many seconds of the original send become edits of that message.
    pub edit_window_secs: i64,
    pub buffer_retention_secs: i64,
    /// Reaction added to a notification each time it is edited.
    pub ack_reaction: Option<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            target_chat: "alerts".to_string(),
            tick_interval_secs: 5,
            edit_window_secs: 60,
            buffer_retention_secs: 120,
            ack_reaction: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub retention_secs: i64,
    pub purge_interval_secs: u64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            retention_secs: 60 * 60,
            purge_interval_secs: 6 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StickerConfig {
    pub enabled: bool,
    /// Threat level that marks an airborne (aircraft) alert.
    pub max_severity: i64,
    pub assets_dir: PathBuf,
    pub output_dir: PathBuf,
    pub font_path: PathBuf,
}

impl Default for StickerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_severity: 5,
            assets_dir: Config::sticker_assets_dir(),
            output_dir: Config::sticker_output_dir(),
            font_path: Config::sticker_font_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Display-name fragment of a chat that receives liveness messages. Unset disables them.
    pub chat: Option<String>,
    pub startup_delay_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            chat: None,
            startup_delay_secs: 10,
            heartbeat_interval_secs: 30 * 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub residence_path: PathBuf,
    pub contacts_path: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            residence_path: Config::residence_file_path(),
            contacts_path: Config::contacts_file_path(),
        }
    }
}

impl RelayConfig {
    /// Load settings from `path`. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("Config: {:?} not found, using defaults", path);
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RelayConfig = toml::from_str(&content).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        info!("Config: loaded {:?}", path);
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let parsed = url::Url::parse(&self.feed.url).map_err(|source| ConfigError::FeedUrl {
            url: self.feed.url.clone(),
            source,
        })?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ConfigError::Invalid(format!(
                "feed url must use ws or wss, got {}",
                parsed.scheme()
            )));
        }
        if self.feed.backoff_base_ms == 0 {
            return Err(ConfigError::Invalid("feed.backoff_base_ms must be > 0".to_string()));
        }
        if self.feed.refresh_interval_secs == 0
            || self.dispatch.tick_interval_secs == 0
            || self.dedup.purge_interval_secs == 0
            || self.status.heartbeat_interval_secs == 0
        {
            return Err(ConfigError::Invalid("intervals must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch.tick_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.feed.refresh_interval_secs)
    }

    pub fn dedup_purge_interval(&self) -> Duration {
        Duration::from_secs(self.dedup.purge_interval_secs)
    }
}
