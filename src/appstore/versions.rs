use std::collections::HashMap;

use tracing::{debug, info, instrument};

use super::client::{with_query, AppStoreClient};
use super::types::{AppStoreVersion, CustomerReview, Page};
use crate::error::FetchError;
use crate::models::Review;

/// Nested review listings are requested at the API's maximum page size
const VERSION_REVIEWS_PAGE_SIZE: &str = "200";

/// Reviews still waiting for a version, keyed by review id with the
/// position of the review in the caller's slice
#[derive(Debug, Default)]
struct PendingCorrelation {
    by_id: HashMap<String, usize>,
}

impl PendingCorrelation {
    fn from_reviews(reviews: &[Review]) -> Self {
        let by_id = reviews
            .iter()
            .enumerate()
            .filter(|(_, r)| r.needs_version())
            .map(|(index, r)| (r.id.clone(), index))
            .collect();
        Self { by_id }
    }

    fn take(&mut self, id: &str) -> Option<usize> {
        self.by_id.remove(id)
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }

    fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Outcome of a correlation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelationStats {
    pub resolved: usize,
    pub unresolved: usize,
    pub version_pages: usize,
    pub review_pages: usize,
}

/// Attaches app version and platform to reviews by scanning each released
/// version's review listing
pub struct VersionCorrelator {
    client: AppStoreClient,
    app_id: String,
}

impl VersionCorrelator {
    pub fn new(client: AppStoreClient, app_id: impl Into<String>) -> Self {
        Self {
            client,
            app_id: app_id.into(),
        }
    }

    /// Fill `app_version` and `platform` for reviews missing a version.
    ///
    /// Stops fetching as soon as every pending review is resolved. Reviews
    /// not found in any version listing are left untouched.
    #[instrument(skip(self, reviews), fields(app_id = %self.app_id))]
    pub async fn resolve_versions(
        &self,
        reviews: &mut [Review],
    ) -> Result<CorrelationStats, FetchError> {
        let mut pending = PendingCorrelation::from_reviews(reviews);
        let mut stats = CorrelationStats::default();

        if pending.is_empty() {
            debug!("No reviews need version information");
            return Ok(stats);
        }

        info!(pending = pending.len(), "Resolving app versions");

        let mut next_versions = Some(
            self.client
                .endpoint(&format!("/v1/apps/{}/appStoreVersions", self.app_id)),
        );

        'versions: while let Some(url) = next_versions.take() {
            let page: Page<AppStoreVersion> = self.client.get_json(&url).await?;
            stats.version_pages += 1;
            next_versions = page.next().map(str::to_string);

            debug!(
                page = stats.version_pages,
                count = page.data.len(),
                "Fetched version page"
            );

            for version in &page.data {
                let Some(link) = version.reviews_link() else {
                    continue;
                };

                let mut next_reviews = Some(with_query(
                    link,
                    &[
                        ("sort", "-createdDate"),
                        ("limit", VERSION_REVIEWS_PAGE_SIZE),
                    ],
                )?);

                while let Some(reviews_url) = next_reviews.take() {
                    let listing: Page<CustomerReview> =
                        self.client.get_json(&reviews_url).await?;
                    stats.review_pages += 1;
                    next_reviews = listing.next().map(str::to_string);

                    for nested in listing.data {
                        let Some(index) = nested.id.as_deref().and_then(|id| pending.take(id))
                        else {
                            continue;
                        };

                        let review = &mut reviews[index];
                        review.app_version = version.version_string().map(str::to_string);
                        review.platform = version.platform().map(str::to_string);
                        stats.resolved += 1;

                        debug!(
                            id = %review.id,
                            version = ?review.app_version,
                            remaining = pending.len(),
                            "Resolved review version"
                        );

                        if pending.is_empty() {
                            break 'versions;
                        }
                    }
                }
            }
        }

        stats.unresolved = pending.len();

        info!(
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            version_pages = stats.version_pages,
            "Version resolution complete"
        );

        Ok(stats)
    }
}
