use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{group_reviews, DeliveryReport, Notifier};
use crate::config::SlackSettings;
use crate::models::{Attachment, Payload, Review};

pub const POST_MESSAGE_URL: &str = "https://slack.com/api/chat.postMessage";

/// Slack allows one message per second per channel
const SEND_INTERVAL: Duration = Duration::from_secs(1);
const MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Attempts per group when Slack reports rate limiting
const RATE_LIMIT_ATTEMPTS: u32 = 2;

const UNKNOWN: &str = "unknown";

/// How messages reach Slack
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlackTransport {
    /// chat.postMessage with a bot token
    BotToken { token: String, channel: String },
    /// Incoming webhook, channel fixed by the webhook
    Webhook { url: String },
}

#[derive(Debug, PartialEq, Eq)]
enum PostOutcome {
    Sent,
    RateLimited { retry_after: Option<Duration> },
    Rejected(String),
}

/// Result of sending one message, after any rate-limit retries
#[derive(Debug, PartialEq, Eq)]
enum SendOutcome {
    Sent,
    /// Gave up while still rate limited; `wait` is the backoff the channel asked for
    RateLimited { wait: Duration },
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Relays reviews to Slack as attachment messages
pub struct SlackNotifier {
    client: Client,
    transport: SlackTransport,
    api_url: String,
    group_size: usize,
    time_zone_offset: FixedOffset,
    send_interval: Duration,
    min_backoff: Duration,
}

impl SlackNotifier {
    pub fn new(settings: &SlackSettings) -> Self {
        Self {
            client: Client::new(),
            transport: settings.transport.clone(),
            api_url: POST_MESSAGE_URL.to_string(),
            group_size: settings.group_size,
            time_zone_offset: settings.time_zone_offset,
            send_interval: SEND_INTERVAL,
            min_backoff: MIN_BACKOFF,
        }
    }

    /// Override the chat.postMessage endpoint
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_send_interval(mut self, interval: Duration) -> Self {
        self.send_interval = interval;
        self
    }

    pub fn with_min_backoff(mut self, backoff: Duration) -> Self {
        self.min_backoff = backoff;
        self
    }

    async fn post(&self, payload: &Payload) -> Result<PostOutcome> {
        match &self.transport {
            SlackTransport::BotToken { token, channel } => {
                let body = Payload {
                    channel: Some(channel.clone()),
                    attachments: payload.attachments.clone(),
                };

                let response = self
                    .client
                    .post(&self.api_url)
                    .bearer_auth(token)
                    .json(&body)
                    .send()
                    .await
                    .context("Failed to send Slack API request")?;

                if response.status() == StatusCode::TOO_MANY_REQUESTS {
                    return Ok(PostOutcome::RateLimited {
                        retry_after: retry_after(&response),
                    });
                }

                let parsed: PostMessageResponse = response
                    .json()
                    .await
                    .context("Failed to parse Slack API response")?;

                Ok(match (parsed.ok, parsed.error) {
                    (true, _) => PostOutcome::Sent,
                    (false, Some(error)) if error == "ratelimited" => {
                        PostOutcome::RateLimited { retry_after: None }
                    }
                    (false, error) => {
                        PostOutcome::Rejected(error.unwrap_or_else(|| "unknown error".to_string()))
                    }
                })
            }
            SlackTransport::Webhook { url } => {
                let body = Payload {
                    channel: None,
                    attachments: payload.attachments.clone(),
                };

                let response = self
                    .client
                    .post(url)
                    .json(&body)
                    .send()
                    .await
                    .context("Failed to send Slack webhook request")?;

                let status = response.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    return Ok(PostOutcome::RateLimited {
                        retry_after: retry_after(&response),
                    });
                }

                let text = response
                    .text()
                    .await
                    .context("Failed to read Slack webhook response")?;
                if status.is_success() && text.trim() == "ok" {
                    Ok(PostOutcome::Sent)
                } else {
                    Ok(PostOutcome::Rejected(format!("{} - {}", status, text)))
                }
            }
        }
    }

    /// Post one message, waiting out rate limits a bounded number of times.
    /// When the last attempt is still rate limited the pending wait is
    /// returned so the caller can honor it before its next send.
    async fn send(&self, payload: &Payload) -> Result<SendOutcome> {
        let mut wait = self.min_backoff;
        for attempt in 1..=RATE_LIMIT_ATTEMPTS {
            match self.post(payload).await? {
                PostOutcome::Sent => {
                    debug!(attempt, "Slack message sent");
                    return Ok(SendOutcome::Sent);
                }
                PostOutcome::RateLimited { retry_after } => {
                    wait = retry_after.unwrap_or_default().max(self.min_backoff);
                    warn!(
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "Slack rate limit reached"
                    );
                    if attempt < RATE_LIMIT_ATTEMPTS {
                        tokio::time::sleep(wait).await;
                    }
                }
                PostOutcome::Rejected(reason) => {
                    anyhow::bail!("Slack rejected message: {}", reason);
                }
            }
        }

        Ok(SendOutcome::RateLimited { wait })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send_welcome(&self, platform_name: &str) -> Result<()> {
        info!(platform = platform_name, "Sending welcome message");
        match self.send(&welcome_payload(platform_name)).await? {
            SendOutcome::Sent => Ok(()),
            SendOutcome::RateLimited { .. } => anyhow::bail!(
                "Slack still rate limited after {} attempts",
                RATE_LIMIT_ATTEMPTS
            ),
        }
    }

    async fn deliver(&self, reviews: &[Review], platform_name: &str) -> DeliveryReport {
        if reviews.is_empty() {
            return DeliveryReport::default();
        }

        let mut queue: VecDeque<Payload> = group_reviews(reviews, self.group_size)
            .into_iter()
            .map(|group| Payload {
                channel: None,
                attachments: group
                    .iter()
                    .map(|r| render_review(r, platform_name, self.time_zone_offset))
                    .collect(),
            })
            .collect();

        let mut report = DeliveryReport {
            groups: queue.len(),
            ..Default::default()
        };

        info!(
            reviews = reviews.len(),
            groups = report.groups,
            "Delivering reviews to Slack"
        );

        let mut pause = None;
        while let Some(payload) = queue.pop_front() {
            if let Some(wait) = pause {
                tokio::time::sleep(wait).await;
            }

            match self.send(&payload).await {
                Ok(SendOutcome::Sent) => {
                    report.delivered += 1;
                    pause = Some(self.send_interval);
                }
                Ok(SendOutcome::RateLimited { wait }) => {
                    report.failed += 1;
                    warn!(
                        attempts = RATE_LIMIT_ATTEMPTS,
                        remaining = queue.len(),
                        "Review group still rate limited, skipping"
                    );
                    pause = Some(self.send_interval.max(wait));
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        error = %e,
                        remaining = queue.len(),
                        "Failed to deliver review group"
                    );
                    pause = Some(self.send_interval.max(self.min_backoff));
                }
            }
        }

        info!(
            delivered = report.delivered,
            failed = report.failed,
            "Slack delivery finished"
        );

        report
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn welcome_payload(platform_name: &str) -> Payload {
    let title = "Review Relay standing by :rocket:".to_string();
    Payload {
        channel: None,
        attachments: vec![Attachment {
            color: "good".to_string(),
            fallback: title.clone(),
            title,
            text: Some(format!(
                "{} setup complete, new reviews will be posted to this channel automatically.",
                platform_name
            )),
            author_name: Some("Review Relay".to_string()),
            footer: None,
        }],
    }
}

/// Render one review as a Slack attachment
pub fn render_review(review: &Review, platform_name: &str, offset: FixedOffset) -> Attachment {
    let stars = stars(review.rating);
    let title = match review.title.as_deref() {
        Some(title) if !title.is_empty() => format!("{} - {}", title, stars),
        _ => stars,
    };

    let footer = format!(
        "{} - {} - {} - {} - <{}|{}>",
        platform_name,
        review.platform.as_deref().unwrap_or(UNKNOWN),
        review.app_version.as_deref().unwrap_or(UNKNOWN),
        review.territory.as_deref().unwrap_or(UNKNOWN),
        review.url,
        format_timestamp(review.timestamp, offset)
    );

    Attachment {
        color: rating_color(review.rating).to_string(),
        fallback: title.clone(),
        title,
        text: review.body.clone(),
        author_name: review.user_name.clone(),
        footer: Some(footer),
    }
}

fn stars(rating: Option<u8>) -> String {
    let filled = rating.unwrap_or(0).min(5) as usize;
    format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

fn rating_color(rating: Option<u8>) -> &'static str {
    match rating {
        Some(r) if r >= 4 => "good",
        Some(r) if r <= 2 => "danger",
        _ => "warning",
    }
}

/// Format a UTC timestamp in a fixed offset, independent of the host zone
fn format_timestamp(timestamp: i64, offset: FixedOffset) -> String {
    match DateTime::from_timestamp(timestamp, 0) {
        Some(utc) => utc
            .with_timezone(&offset)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => timestamp.to_string(),
    }
}
