use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Archive root. Holds the catalog file and the direction folders.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    /// Remote backend: `none`, `webdav`, or `telegram`.
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub webdav: WebdavConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            webdav: WebdavConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

fn default_backend() -> String {
    "none".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebdavConfig {
    /// WebDAV endpoint. Credentials come from `DOCKET_WEBDAV_LOGIN` /
    /// `DOCKET_WEBDAV_PASSWORD`, never from this file.
    #[serde(default = "default_webdav_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WebdavConfig {
    fn default() -> Self {
        Self {
            endpoint: default_webdav_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_webdav_endpoint() -> String {
    "https://webdav.yandex.ru".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    /// Chat used as the blob store. The bot token comes from
    /// `DOCKET_TELEGRAM_TOKEN`.
    #[serde(default)]
    pub chat_id: i64,
    #[serde(default = "default_telegram_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            chat_id: 0,
            api_base: default_telegram_api_base(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_telegram_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate storage
    if config.storage.root.as_os_str().is_empty() {
        anyhow::bail!("storage.root must not be empty");
    }

    // Validate remote
    match config.remote.backend.as_str() {
        "none" | "webdav" => {}
        "telegram" => {
            if config.remote.telegram.chat_id == 0 {
                anyhow::bail!("remote.telegram.chat_id must be set when backend is 'telegram'");
            }
        }
        other => anyhow::bail!(
            "Unknown remote backend: '{}'. Must be none, webdav, or telegram.",
            other
        ),
    }

    if config.remote.backend == "webdav" && config.remote.webdav.endpoint.trim().is_empty() {
        anyhow::bail!("remote.webdav.endpoint must not be empty");
    }

    Ok(config)
}
