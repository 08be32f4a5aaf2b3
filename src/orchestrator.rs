use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::appstore::{CorrelationStats, ReviewFetcher, VersionCorrelator};
use crate::notifications::{DeliveryReport, Notifier};
use crate::store::CursorStore;

/// Stages of a single sync run. A failure in any stage aborts the run
/// before the cursor is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Fetching,
    Bootstrap,
    Correlating,
    Dispatching,
    Persisting,
    Done,
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub phases: Vec<RunPhase>,
    pub fetched: usize,
    pub welcome_sent: bool,
    pub correlation: Option<CorrelationStats>,
    pub delivery: Option<DeliveryReport>,
    pub cursor_before: i64,
    pub cursor_after: i64,
}

impl RunSummary {
    fn enter(&mut self, phase: RunPhase) {
        info!(phase = ?phase, "Entering phase");
        self.phases.push(phase);
    }
}

/// Runs one fetch, correlate, dispatch, persist pass for a platform
pub struct Orchestrator<S: CursorStore, N: Notifier> {
    fetcher: ReviewFetcher,
    correlator: VersionCorrelator,
    notifier: N,
    store: S,
    platform: String,
    platform_name: String,
}

impl<S: CursorStore, N: Notifier> Orchestrator<S, N> {
    /// `platform` keys the persisted cursor, `platform_name` is shown in messages
    pub fn new(
        fetcher: ReviewFetcher,
        correlator: VersionCorrelator,
        notifier: N,
        store: S,
        platform: impl Into<String>,
        platform_name: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            correlator,
            notifier,
            store,
            platform: platform.into(),
            platform_name: platform_name.into(),
        }
    }

    /// A failed welcome leaves the marker unset, but it is only retried while
    /// the cursor is still 0. Once a run has persisted a cursor it is not sent again.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();

        summary.enter(RunPhase::Idle);
        let cursor = self
            .store
            .load(&self.platform)
            .context("Failed to load cursor")?;
        summary.cursor_before = cursor.last_check_timestamp;
        summary.cursor_after = cursor.last_check_timestamp;

        info!(
            platform = %self.platform,
            cursor = cursor.last_check_timestamp,
            welcome_sent = cursor.welcome_sent,
            "Starting review sync"
        );

        summary.enter(RunPhase::Fetching);
        let mut reviews = self
            .fetcher
            .fetch_new_reviews(cursor.last_check_timestamp)
            .await
            .context("Failed to fetch reviews")?;
        summary.fetched = reviews.len();

        // Correlation never touches timestamps, so the new cursor is known now
        let newest = reviews.iter().map(|r| r.timestamp).max();

        if cursor.needs_welcome() {
            summary.enter(RunPhase::Bootstrap);
            match self.notifier.send_welcome(&self.platform_name).await {
                Ok(()) => {
                    self.store
                        .mark_welcome_sent(&self.platform)
                        .context("Failed to record welcome message")?;
                    summary.welcome_sent = true;
                }
                Err(e) => warn!(error = %e, "Failed to send welcome message"),
            }
        } else if !reviews.is_empty() {
            summary.enter(RunPhase::Correlating);
            let stats = self
                .correlator
                .resolve_versions(&mut reviews)
                .await
                .context("Failed to resolve app versions")?;
            summary.correlation = Some(stats);

            summary.enter(RunPhase::Dispatching);
            let report = self.notifier.deliver(&reviews, &self.platform_name).await;
            summary.delivery = Some(report);
        }

        if let Some(newest) = newest.filter(|&t| t > cursor.last_check_timestamp) {
            summary.enter(RunPhase::Persisting);
            self.store
                .save_last_check(&self.platform, newest)
                .context("Failed to save cursor")?;
            summary.cursor_after = newest;
        }

        summary.enter(RunPhase::Done);

        info!(
            fetched = summary.fetched,
            welcome_sent = summary.welcome_sent,
            cursor = summary.cursor_after,
            "Review sync complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appstore::{AppStoreClient, RetryPolicy, StaticTokenProvider};
    use crate::models::Review;
    use crate::store::FileCursorStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tempfile::{tempdir, TempDir};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const REVIEWS: &str = "/v1/apps/123/customerReviews";
    const VERSIONS: &str = "/v1/apps/123/appStoreVersions";

    #[derive(Default)]
    struct RecordingNotifier {
        welcomes: Mutex<Vec<String>>,
        deliveries: Mutex<Vec<Vec<Review>>>,
        fail_welcome: bool,
    }

    #[async_trait]
    impl Notifier for Arc<RecordingNotifier> {
        async fn send_welcome(&self, platform_name: &str) -> Result<()> {
            if self.fail_welcome {
                anyhow::bail!("webhook unreachable");
            }
            self.welcomes.lock().unwrap().push(platform_name.to_string());
            Ok(())
        }

        async fn deliver(&self, reviews: &[Review], _platform_name: &str) -> DeliveryReport {
            self.deliveries.lock().unwrap().push(reviews.to_vec());
            DeliveryReport {
                groups: reviews.len(),
                delivered: reviews.len(),
                failed: 0,
            }
        }
    }

    struct Harness {
        server: MockServer,
        dir: TempDir,
        notifier: Arc<RecordingNotifier>,
    }

    impl Harness {
        async fn new() -> Self {
            Self::with_notifier(RecordingNotifier::default()).await
        }

        async fn with_notifier(notifier: RecordingNotifier) -> Self {
            Self {
                server: MockServer::start().await,
                dir: tempdir().unwrap(),
                notifier: Arc::new(notifier),
            }
        }

        fn store(&self) -> FileCursorStore {
            FileCursorStore::new(self.dir.path())
        }

        fn orchestrator(&self) -> Orchestrator<FileCursorStore, Arc<RecordingNotifier>> {
            let client = AppStoreClient::new(Arc::new(StaticTokenProvider::new("t")))
                .with_base_url(&self.server.uri())
                .with_retry(RetryPolicy::immediate(0));
            Orchestrator::new(
                ReviewFetcher::new(client.clone(), "123"),
                VersionCorrelator::new(client, "123"),
                self.notifier.clone(),
                self.store(),
                "apple",
                "Apple",
            )
        }

        async fn mount_reviews(&self, timestamps: &[i64]) {
            let data: Vec<Value> = timestamps
                .iter()
                .map(|&t| {
                    json!({
                        "id": format!("r{}", t),
                        "attributes": {
                            "rating": 5,
                            "createdDate": DateTime::<Utc>::from_timestamp(t, 0).unwrap().to_rfc3339(),
                            "territory": "USA"
                        }
                    })
                })
                .collect();

            Mock::given(method("GET"))
                .and(path(REVIEWS))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
                .mount(&self.server)
                .await;
        }

        async fn mount_versions(&self, ids: &[&str], times: u64) {
            let uri = self.server.uri();
            Mock::given(method("GET"))
                .and(path(VERSIONS))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "data": [{
                        "attributes": { "platform": "IOS", "versionString": "4.2.0" },
                        "relationships": { "customerReviews": { "links": {
                            "related": format!("{}/v1/appStoreVersions/v1/customerReviews", uri)
                        } } }
                    }]
                })))
                .expect(times)
                .mount(&self.server)
                .await;

            let data: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
            Mock::given(method("GET"))
                .and(path("/v1/appStoreVersions/v1/customerReviews"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": data })))
                .mount(&self.server)
                .await;
        }
    }

    #[tokio::test]
    async fn test_first_run_sends_welcome_only() {
        let h = Harness::new().await;
        h.mount_reviews(&[1000]).await;
        h.mount_versions(&[], 0).await;

        let summary = h.orchestrator().run().await.unwrap();

        assert!(summary.welcome_sent);
        assert_eq!(*h.notifier.welcomes.lock().unwrap(), vec!["Apple".to_string()]);
        assert!(h.notifier.deliveries.lock().unwrap().is_empty());
        assert!(!summary.phases.contains(&RunPhase::Correlating));

        let cursor = h.store().load("apple").unwrap();
        assert_eq!(cursor.last_check_timestamp, 1000);
        assert!(cursor.welcome_sent);
    }

    #[tokio::test]
    async fn test_incremental_run_delivers_new_reviews() {
        let h = Harness::new().await;
        h.store().save_last_check("apple", 1000).unwrap();
        h.store().mark_welcome_sent("apple").unwrap();
        h.mount_reviews(&[1003, 1002, 1001, 999]).await;
        h.mount_versions(&["r1001", "r1002", "r1003"], 1).await;

        let summary = h.orchestrator().run().await.unwrap();

        assert_eq!(summary.fetched, 3);
        assert!(!summary.welcome_sent);
        assert_eq!(summary.cursor_before, 1000);
        assert_eq!(summary.cursor_after, 1003);
        assert_eq!(
            summary.phases,
            vec![
                RunPhase::Idle,
                RunPhase::Fetching,
                RunPhase::Correlating,
                RunPhase::Dispatching,
                RunPhase::Persisting,
                RunPhase::Done,
            ]
        );

        let deliveries = h.notifier.deliveries.lock().unwrap();
        assert_eq!(deliveries.len(), 1);
        let delivered: Vec<i64> = deliveries[0].iter().map(|r| r.timestamp).collect();
        assert_eq!(delivered, vec![1001, 1002, 1003]);
        assert!(deliveries[0]
            .iter()
            .all(|r| r.app_version.as_deref() == Some("4.2.0")));
        assert!(h.notifier.welcomes.lock().unwrap().is_empty());

        assert_eq!(h.store().load("apple").unwrap().last_check_timestamp, 1003);
    }

    #[tokio::test]
    async fn test_welcome_is_not_resent() {
        let h = Harness::new().await;
        h.store().mark_welcome_sent("apple").unwrap();
        h.mount_reviews(&[500]).await;
        h.mount_versions(&["r500"], 1).await;

        let summary = h.orchestrator().run().await.unwrap();

        assert!(!summary.welcome_sent);
        assert!(h.notifier.welcomes.lock().unwrap().is_empty());
        assert_eq!(h.notifier.deliveries.lock().unwrap().len(), 1);
        assert_eq!(summary.cursor_after, 500);
    }

    #[tokio::test]
    async fn test_no_new_reviews_leaves_cursor() {
        let h = Harness::new().await;
        h.store().save_last_check("apple", 2000).unwrap();
        h.store().mark_welcome_sent("apple").unwrap();
        h.mount_reviews(&[2000, 1500]).await;
        h.mount_versions(&[], 0).await;

        let summary = h.orchestrator().run().await.unwrap();

        assert_eq!(summary.fetched, 0);
        assert!(summary.delivery.is_none());
        assert!(!summary.phases.contains(&RunPhase::Persisting));
        assert_eq!(h.store().load("apple").unwrap().last_check_timestamp, 2000);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_without_persisting() {
        let h = Harness::new().await;
        h.store().save_last_check("apple", 1000).unwrap();
        Mock::given(method("GET"))
            .and(path(REVIEWS))
            .respond_with(ResponseTemplate::new(503))
            .mount(&h.server)
            .await;

        let result = h.orchestrator().run().await;

        assert!(result.is_err());
        assert!(h.notifier.deliveries.lock().unwrap().is_empty());
        assert_eq!(h.store().load("apple").unwrap().last_check_timestamp, 1000);
    }

    #[tokio::test]
    async fn test_correlation_failure_aborts_without_persisting() {
        let h = Harness::new().await;
        h.store().save_last_check("apple", 1000).unwrap();
        h.store().mark_welcome_sent("apple").unwrap();
        h.mount_reviews(&[1001]).await;
        Mock::given(method("GET"))
            .and(path(VERSIONS))
            .respond_with(ResponseTemplate::new(500))
            .mount(&h.server)
            .await;

        let result = h.orchestrator().run().await;

        assert!(result.is_err());
        assert!(h.notifier.deliveries.lock().unwrap().is_empty());
        assert_eq!(h.store().load("apple").unwrap().last_check_timestamp, 1000);
    }

    #[tokio::test]
    async fn test_failed_welcome_leaves_marker_unset() {
        let h = Harness::with_notifier(RecordingNotifier {
            fail_welcome: true,
            ..Default::default()
        })
        .await;
        h.mount_reviews(&[]).await;

        let summary = h.orchestrator().run().await.unwrap();

        assert!(!summary.welcome_sent);
        let cursor = h.store().load("apple").unwrap();
        assert!(!cursor.welcome_sent);
        assert!(cursor.needs_welcome());
    }
}
