use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub listings: ListingsConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Chats allowed to issue commands. Empty means anyone may subscribe.
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
    /// Chat subscribed with default filters at startup.
    #[serde(default)]
    pub default_chat_id: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ListingsConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ListingsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            limit: default_limit(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ListingsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollerConfig {
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Six-field cron expression. Takes precedence over `interval_minutes`.
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default = "default_poll_on_startup")]
    pub poll_on_startup: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_minutes: default_interval_minutes(),
            cron: None,
            poll_on_startup: default_poll_on_startup(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

fn default_base_url() -> String {
    "https://pro-api.coinmarketcap.com".to_string()
}

fn default_limit() -> u32 {
    500
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_interval_minutes() -> u64 {
    10
}

fn default_poll_on_startup() -> bool {
    true
}

fn default_db_path() -> PathBuf {
    PathBuf::from("coinwatch.db")
}

impl Config {
    /// Load the TOML file at `path` (if present), then layer environment
    /// overrides on top and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            Self::parse(&content)?
        } else {
            info!(
                "No config file at {}, using defaults and environment",
                path.display()
            );
            Config::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Override secrets from the environment. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = get("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Some(chat_id) = get("TELEGRAM_CHAT_ID") {
            self.telegram.default_chat_id = Some(chat_id);
        }
        if let Some(key) = get("CMC_API_KEY") {
            self.listings.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            anyhow::bail!("Missing Telegram bot token (set telegram.bot_token or TELEGRAM_BOT_TOKEN)");
        }
        if self.listings.api_key.trim().is_empty() {
            anyhow::bail!("Missing listings API key (set listings.api_key or CMC_API_KEY)");
        }
        let has_cron = self
            .poller
            .cron
            .as_deref()
            .is_some_and(|expr| !expr.trim().is_empty());
        if !has_cron && self.poller.interval_minutes == 0 {
            anyhow::bail!("poller.interval_minutes must be greater than zero");
        }
        Ok(())
    }
}
