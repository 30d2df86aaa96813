//! Configuration loading from environment.
//!
//! One process runs one platform integration; `MOKOSH_PLATFORM` selects which
//! and decides which token is required.

use std::env;
use std::fmt;
use std::str::FromStr;

use crate::error::{MokoshError, Result};

/// Default base URL of the classification API.
pub const DEFAULT_API_URL: &str = "https://mokosh-api-9f9713bc633f.herokuapp.com";

/// Default SQLite database path.
pub const DEFAULT_DB_PATH: &str = "mokosh.db";

/// Default name of the Discord moderation log channel.
pub const DEFAULT_LOG_CHANNEL_NAME: &str = "mokosh-log";

/// Default liveness port.
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

/// Default outbound classifier quota.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 120;

/// Chat platform served by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Discord,
    Telegram,
}

impl FromStr for Platform {
    type Err = MokoshError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discord" => Ok(Self::Discord),
            "telegram" => Ok(Self::Telegram),
            other => Err(MokoshError::Config(format!(
                "MOKOSH_PLATFORM must be 'discord' or 'telegram', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discord => write!(f, "discord"),
            Self::Telegram => write!(f, "telegram"),
        }
    }
}

/// Main configuration for the Mokosh bots.
#[derive(Debug, Clone)]
pub struct MokoshConfig {
    /// Which platform adapter to start.
    pub platform: Platform,
    /// Bot token for the selected platform.
    pub bot_token: String,
    /// Base URL of the classification API, without trailing slash.
    pub api_url: String,
    /// Optional token sent as `X-API-Token`.
    pub api_token: Option<String>,
    /// SQLite database path.
    pub db_path: String,
    /// Discord log channel name.
    pub log_channel_name: String,
    /// Telegram chat that mirrors enforcement logs.
    pub telegram_log_chat_id: Option<i64>,
    /// Telegram bot username, used to strip `/cmd@name` suffixes.
    pub bot_username: Option<String>,
    /// Liveness endpoint port.
    pub health_port: u16,
    /// Outbound classifier quota.
    pub requests_per_minute: u32,
}

impl MokoshConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `MOKOSH_PLATFORM`: `discord` or `telegram`
    /// - `DISCORD_TOKEN` or `TELEGRAM_BOT_TOKEN`, matching the platform
    ///
    /// Optional:
    /// - `MOKOSH_API_URL` (alias `HARASSMENT_API_URL`)
    /// - `API_TOKEN`
    /// - `DB_PATH` (default: mokosh.db)
    /// - `LOG_CHANNEL_NAME` (default: mokosh-log)
    /// - `TELEGRAM_LOG_CHAT_ID`
    /// - `BOT_USERNAME`
    /// - `PORT` (default: 8080)
    /// - `CLASSIFIER_REQUESTS_PER_MINUTE` (default: 120)
    pub fn from_env() -> Result<Self> {
        let platform: Platform = env::var("MOKOSH_PLATFORM")
            .map_err(|_| MokoshError::Config("MOKOSH_PLATFORM not set".to_string()))?
            .parse()?;

        let token_var = match platform {
            Platform::Discord => "DISCORD_TOKEN",
            Platform::Telegram => "TELEGRAM_BOT_TOKEN",
        };
        let bot_token = non_empty_var(token_var)
            .ok_or_else(|| MokoshError::Config(format!("{} not set", token_var)))?;

        let api_url = non_empty_var("MOKOSH_API_URL")
            .or_else(|| non_empty_var("HARASSMENT_API_URL"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let api_url = normalize_base_url(&api_url)?;

        let telegram_log_chat_id = match non_empty_var("TELEGRAM_LOG_CHAT_ID") {
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| {
                MokoshError::Config(format!("TELEGRAM_LOG_CHAT_ID is not an integer: {}", raw))
            })?),
            None => None,
        };

        let health_port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HEALTH_PORT);

        let requests_per_minute = env::var("CLASSIFIER_REQUESTS_PER_MINUTE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REQUESTS_PER_MINUTE);

        Ok(Self {
            platform,
            bot_token,
            api_url,
            api_token: non_empty_var("API_TOKEN"),
            db_path: non_empty_var("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            log_channel_name: non_empty_var("LOG_CHANNEL_NAME")
                .unwrap_or_else(|| DEFAULT_LOG_CHANNEL_NAME.to_string()),
            telegram_log_chat_id,
            bot_username: non_empty_var("BOT_USERNAME")
                .map(|name| name.trim_start_matches('@').to_string()),
            health_port,
            requests_per_minute,
        })
    }
}

/// Read an env var, treating blank values as unset.
fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validate the API base URL and strip trailing slashes.
fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
        return Err(MokoshError::Config(format!(
            "classification API URL must be http(s): {}",
            raw
        )));
    }
    Ok(trimmed.to_string())
}
