use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::auth::TokenProvider;
use crate::config::DEFAULT_API_BASE_URL;
use crate::error::FetchError;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Bounded retry for transient request failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Retry without sleeping, for tests
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// Authenticated JSON client for the App Store Connect API
#[derive(Clone)]
pub struct AppStoreClient {
    http: Client,
    tokens: Arc<dyn TokenProvider>,
    retry: RetryPolicy,
    base_url: String,
}

impl AppStoreClient {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            http: Client::new(),
            tokens,
            retry: RetryPolicy::default(),
            base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Absolute URL for an API path such as `/v1/apps/123`
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET a URL and decode its JSON body, retrying transient failures.
    /// A body that fails to decode is not retried.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        let mut retries = 0;

        loop {
            match self.get_once(url).await {
                Ok(body) => {
                    return serde_json::from_str(&body).map_err(|source| FetchError::Parse {
                        url: url.to_string(),
                        source,
                    });
                }
                Err(err) if err.is_transient() && retries < self.retry.max_retries => {
                    retries += 1;
                    let delay = self.retry.delay_for(retries);
                    warn!(
                        url,
                        attempt = retries,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_once(&self, url: &str) -> Result<String, FetchError> {
        let token = self.tokens.bearer_token()?;

        debug!(url, "GET");

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }

        Ok(body)
    }
}

/// Append query parameters to an absolute link
pub fn with_query(link: &str, params: &[(&str, &str)]) -> Result<String, FetchError> {
    let mut url = Url::parse(link).map_err(|e| FetchError::InvalidUrl {
        url: link.to_string(),
        reason: e.to_string(),
    })?;
    url.query_pairs_mut().extend_pairs(params);
    Ok(url.into())
}
