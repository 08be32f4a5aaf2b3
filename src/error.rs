use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Failures while talking to the App Store Connect API
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("App Store Connect returned {status} for {url}: {body}")]
    Status {
        url: String,
        status: StatusCode,
        body: String,
    },

    #[error("Failed to parse response from {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to issue bearer token: {0}")]
    Auth(String),

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl FetchError {
    /// Whether another attempt at the same request could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transport { .. } | FetchError::Status { .. })
    }
}

/// Invalid or incomplete configuration, detected before any network activity
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Required parameter '{0}' is missing or empty")]
    MissingField(&'static str),

    #[error("Invalid time zone offset '{0}', expected +HH:MM or -HH:MM")]
    InvalidTimeZoneOffset(String),

    #[error("Must specify slack.bot_token or slack.webhook_url")]
    NoTransport,

    #[error("Specify only one of slack.bot_token and slack.webhook_url")]
    AmbiguousTransport,

    #[error("slack.target_channel is required when slack.bot_token is set")]
    MissingTargetChannel,
}
