use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use crate::appstore::RetryPolicy;
use crate::error::ConfigError;
use crate::notifications::slack::SlackTransport;

pub const DEFAULT_API_BASE_URL: &str = "https://api.appstoreconnect.apple.com";

/// Largest number of reviews rendered into a single Slack message
pub const MAX_GROUP_SIZE: usize = 99;

/// Main configuration structure, one file per platform
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_store: AppStoreConfig,
    pub slack: SlackConfig,
    pub retry: RetryConfig,
}

/// App Store Connect API credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppStoreConfig {
    pub api_key_path: Option<PathBuf>,
    #[serde(deserialize_with = "string_or_number")]
    pub api_key_id: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub issuer_id: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub app_id: Option<String>,
    pub base_url: String,
}

impl Default for AppStoreConfig {
    fn default() -> Self {
        Self {
            api_key_path: None,
            api_key_id: None,
            issuer_id: None,
            app_id: None,
            base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

/// Validated App Store Connect credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key_path: PathBuf,
    pub api_key_id: String,
    pub issuer_id: String,
    pub app_id: String,
}

impl AppStoreConfig {
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        let api_key_path = self
            .api_key_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingField("app_store.api_key_path"))?;

        Ok(Credentials {
            api_key_path,
            api_key_id: required(&self.api_key_id, "app_store.api_key_id")?,
            issuer_id: required(&self.issuer_id, "app_store.issuer_id")?,
            app_id: required(&self.app_id, "app_store.app_id")?,
        })
    }
}

/// Slack delivery configuration as written in the file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackConfig {
    pub bot_token: Option<String>,
    pub target_channel: Option<String>,
    pub webhook_url: Option<String>,
    pub time_zone_offset: Option<String>,
    pub group_size: Option<i64>,
}

/// Slack settings after validation
#[derive(Debug, Clone)]
pub struct SlackSettings {
    pub transport: SlackTransport,
    pub time_zone_offset: FixedOffset,
    pub group_size: usize,
}

impl SlackConfig {
    /// Validate into runtime settings. Exactly one transport must be configured.
    pub fn settings(&self) -> Result<SlackSettings, ConfigError> {
        let bot_token = non_empty(&self.bot_token);
        let webhook_url = non_empty(&self.webhook_url);

        let transport = match (bot_token, webhook_url) {
            (None, None) => return Err(ConfigError::NoTransport),
            (Some(_), Some(_)) => return Err(ConfigError::AmbiguousTransport),
            (Some(token), None) => {
                let channel =
                    non_empty(&self.target_channel).ok_or(ConfigError::MissingTargetChannel)?;
                SlackTransport::BotToken {
                    token: token.to_string(),
                    channel: channel.to_string(),
                }
            }
            (None, Some(url)) => SlackTransport::Webhook {
                url: url.to_string(),
            },
        };

        let offset = non_empty(&self.time_zone_offset)
            .ok_or(ConfigError::MissingField("slack.time_zone_offset"))?;

        Ok(SlackSettings {
            transport,
            time_zone_offset: parse_time_zone_offset(offset)?,
            group_size: self.group_size(),
        })
    }

    /// Configured group size, falling back to 1 when absent or out of range
    pub fn group_size(&self) -> usize {
        match self.group_size {
            None => 1,
            Some(n) if n >= 1 && n <= MAX_GROUP_SIZE as i64 => n as usize,
            Some(n) => {
                warn!(group_size = n, "group_size must be within 1..=99, using 1");
                1
            }
        }
    }
}

/// Retry behaviour for App Store Connect requests
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        info!(path = %path.display(), "Loaded configuration");

        Ok(config)
    }

    /// Default config location for a platform (config/<platform>.yml)
    pub fn default_path(platform: &str) -> PathBuf {
        PathBuf::from("config").join(format!("{}.yml", platform))
    }
}

/// Parse a fixed offset written as `+HH:MM` or `-HH:MM`
pub fn parse_time_zone_offset(value: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::InvalidTimeZoneOffset(value.to_string());

    let trimmed = value.trim();
    let sign = match trimmed.chars().next() {
        Some('+') => 1,
        Some('-') => -1,
        _ => return Err(invalid()),
    };

    let (hours, minutes) = trimmed[1..].split_once(':').ok_or_else(invalid)?;
    if hours.len() != 2 || minutes.len() != 2 {
        return Err(invalid());
    }

    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    non_empty(value)
        .map(str::to_string)
        .ok_or(ConfigError::MissingField(name))
}

// IDs like app_id are often written unquoted in YAML
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(serde_yaml::Value::String(s)) => Ok(Some(s)),
        Some(serde_yaml::Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected string or number, got {:?}",
            other
        ))),
    }
}
