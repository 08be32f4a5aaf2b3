pub mod slack;

pub use slack::{SlackNotifier, SlackTransport};

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Review;

/// Channel that new reviews are relayed to
#[async_trait]
pub trait Notifier: Send + Sync {
    /// One-time announcement for a platform's first run
    async fn send_welcome(&self, platform_name: &str) -> Result<()>;

    /// Best-effort delivery of reviews, oldest first. Failures are logged
    /// and counted, never returned.
    async fn deliver(&self, reviews: &[Review], platform_name: &str) -> DeliveryReport;
}

/// Per-run delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub groups: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Split reviews into ordered message groups of at most `group_size`
pub fn group_reviews(reviews: &[Review], group_size: usize) -> Vec<&[Review]> {
    reviews.chunks(group_size.max(1)).collect()
}
