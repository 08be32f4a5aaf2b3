use std::collections::HashSet;

use chrono::DateTime;
use tracing::{debug, info, instrument, warn};

use super::client::AppStoreClient;
use super::types::{CustomerReview, Page};
use crate::error::FetchError;
use crate::models::Review;

/// Pulls reviews newer than the cursor from the customer reviews listing
pub struct ReviewFetcher {
    client: AppStoreClient,
    app_id: String,
}

impl ReviewFetcher {
    pub fn new(client: AppStoreClient, app_id: impl Into<String>) -> Self {
        Self {
            client,
            app_id: app_id.into(),
        }
    }

    /// Reviews created after `cursor`, oldest first.
    ///
    /// The listing is walked newest-first and stops at the first review at or
    /// before the cursor. With a zero cursor only the newest review is taken.
    /// Any failed page fails the whole fetch.
    #[instrument(skip(self), fields(app_id = %self.app_id))]
    pub async fn fetch_new_reviews(&self, cursor: i64) -> Result<Vec<Review>, FetchError> {
        info!("Fetching reviews");

        let mut next = Some(self.client.endpoint(&format!(
            "/v1/apps/{}/customerReviews?sort=-createdDate",
            self.app_id
        )));
        let mut reviews = Vec::new();
        let mut seen = HashSet::new();
        let mut page_number = 0;

        'pages: while let Some(url) = next.take() {
            page_number += 1;
            let page: Page<CustomerReview> = self.client.get_json(&url).await?;
            next = page.next().map(str::to_string);

            debug!(
                page = page_number,
                count = page.data.len(),
                has_next = next.is_some(),
                "Fetched review page"
            );

            for raw in page.data {
                let Some(review) = self.to_review(raw) else {
                    warn!(page = page_number, "Skipping review without an id");
                    continue;
                };

                if review.timestamp <= cursor {
                    debug!(
                        id = %review.id,
                        timestamp = review.timestamp,
                        "Reached cursor, stopping"
                    );
                    break 'pages;
                }

                // Reviews arriving mid-walk shift later pages by one
                if seen.insert(review.id.clone()) {
                    reviews.push(review);
                }

                if cursor == 0 {
                    debug!("First run, keeping only the newest review");
                    break 'pages;
                }
            }
        }

        reviews.reverse();
        reviews.sort_by_key(|r| r.timestamp);

        info!(count = reviews.len(), pages = page_number, "Fetched new reviews");

        Ok(reviews)
    }

    fn to_review(&self, raw: CustomerReview) -> Option<Review> {
        let id = raw.id?;
        let attributes = raw.attributes.unwrap_or_default();

        Some(Review {
            platform: None,
            id,
            user_name: attributes.reviewer_nickname,
            rating: attributes.rating.and_then(|r| u8::try_from(r).ok()),
            title: attributes.title,
            body: attributes.body,
            timestamp: attributes
                .created_date
                .as_deref()
                .map(parse_created_date)
                .unwrap_or(0),
            territory: attributes.territory,
            app_version: None,
            url: ratings_url(&self.app_id),
        })
    }
}

/// App Store Connect page where reviews can be answered
pub fn ratings_url(app_id: &str) -> String {
    format!(
        "https://appstoreconnect.apple.com/WebObjects/iTunesConnect.woa/ra/ng/app/{}/ios/ratingsResponses",
        app_id
    )
}

fn parse_created_date(value: &str) -> i64 {
    match DateTime::parse_from_rfc3339(value) {
        Ok(date) => date.timestamp(),
        Err(e) => {
            warn!(value, error = %e, "Unparseable review date, treating as 0");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appstore::{RetryPolicy, StaticTokenProvider};
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const APP_ID: &str = "123";
    const LISTING: &str = "/v1/apps/123/customerReviews";

    fn review_json(id: &str, timestamp: i64) -> Value {
        let created = DateTime::<Utc>::from_timestamp(timestamp, 0)
            .unwrap()
            .to_rfc3339();
        json!({
            "type": "customerReviews",
            "id": id,
            "attributes": {
                "rating": 5,
                "title": format!("title {}", id),
                "body": format!("body {}", id),
                "reviewerNickname": "reviewer",
                "createdDate": created,
                "territory": "USA"
            }
        })
    }

    fn page(reviews: Vec<Value>, next: Option<String>) -> Value {
        json!({ "data": reviews, "links": { "next": next } })
    }

    async fn mount(server: &MockServer, at: &str, body: Value, times: u64) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(times)
            .mount(server)
            .await;
    }

    fn fetcher(server: &MockServer) -> ReviewFetcher {
        let client = AppStoreClient::new(Arc::new(StaticTokenProvider::new("t")))
            .with_base_url(&server.uri())
            .with_retry(RetryPolicy::immediate(1));
        ReviewFetcher::new(client, APP_ID)
    }

    fn timestamps(reviews: &[Review]) -> Vec<i64> {
        reviews.iter().map(|r| r.timestamp).collect()
    }

    #[tokio::test]
    async fn test_stops_at_cursor_and_sorts_ascending() {
        let server = MockServer::start().await;
        let uri = server.uri();

        Mock::given(method("GET"))
            .and(path(LISTING))
            .and(query_param("sort", "-createdDate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page(
                vec![review_json("c", 1003), review_json("b", 1002)],
                Some(format!("{}/next/2", uri)),
            )))
            .expect(1)
            .mount(&server)
            .await;
        mount(
            &server,
            "/next/2",
            page(
                vec![review_json("a", 1001), review_json("old", 999)],
                Some(format!("{}/next/3", uri)),
            ),
            1,
        )
        .await;
        mount(&server, "/next/3", page(vec![review_json("older", 998)], None), 0).await;

        let reviews = fetcher(&server).fetch_new_reviews(1000).await.unwrap();
        assert_eq!(timestamps(&reviews), vec![1001, 1002, 1003]);
        assert_eq!(reviews[0].id, "a");
    }

    #[tokio::test]
    async fn test_review_at_cursor_is_excluded() {
        let server = MockServer::start().await;
        mount(
            &server,
            LISTING,
            page(vec![review_json("new", 1001), review_json("same", 1000)], None),
            1,
        )
        .await;

        let reviews = fetcher(&server).fetch_new_reviews(1000).await.unwrap();
        assert_eq!(timestamps(&reviews), vec![1001]);
    }

    #[tokio::test]
    async fn test_first_run_takes_only_newest() {
        let server = MockServer::start().await;
        let uri = server.uri();
        mount(
            &server,
            LISTING,
            page(
                vec![review_json("newest", 2000), review_json("older", 1999)],
                Some(format!("{}/next/2", uri)),
            ),
            1,
        )
        .await;
        mount(&server, "/next/2", page(vec![review_json("x", 1500)], None), 0).await;

        let reviews = fetcher(&server).fetch_new_reviews(0).await.unwrap();
        assert_eq!(reviews.len(), 1);
        assert_eq!(reviews[0].id, "newest");
        assert_eq!(reviews[0].timestamp, 2000);
    }

    #[tokio::test]
    async fn test_walks_all_pages_when_cursor_not_reached() {
        let server = MockServer::start().await;
        let uri = server.uri();
        mount(
            &server,
            LISTING,
            page(vec![review_json("b", 1010)], Some(format!("{}/next/2", uri))),
            1,
        )
        .await;
        mount(&server, "/next/2", page(vec![review_json("a", 1005)], None), 1).await;

        let reviews = fetcher(&server).fetch_new_reviews(1000).await.unwrap();
        assert_eq!(timestamps(&reviews), vec![1005, 1010]);
    }

    #[tokio::test]
    async fn test_duplicate_ids_across_pages_are_dropped() {
        let server = MockServer::start().await;
        let uri = server.uri();
        mount(
            &server,
            LISTING,
            page(
                vec![review_json("b", 1010), review_json("a", 1005)],
                Some(format!("{}/next/2", uri)),
            ),
            1,
        )
        .await;
        mount(
            &server,
            "/next/2",
            page(vec![review_json("a", 1005), review_json("z", 900)], None),
            1,
        )
        .await;

        let reviews = fetcher(&server).fetch_new_reviews(1000).await.unwrap();
        assert_eq!(timestamps(&reviews), vec![1005, 1010]);
    }

    #[tokio::test]
    async fn test_missing_date_counts_as_zero() {
        let server = MockServer::start().await;
        mount(
            &server,
            LISTING,
            page(
                vec![review_json("new", 1500), json!({ "id": "undated", "attributes": {} })],
                None,
            ),
            1,
        )
        .await;

        let reviews = fetcher(&server).fetch_new_reviews(1000).await.unwrap();
        assert_eq!(timestamps(&reviews), vec![1500]);
    }

    #[tokio::test]
    async fn test_reviews_without_id_are_skipped() {
        let server = MockServer::start().await;
        let mut first = review_json("x", 1300);
        first.as_object_mut().unwrap().remove("id");
        let mut second = review_json("y", 1200);
        second.as_object_mut().unwrap().remove("id");
        mount(
            &server,
            LISTING,
            page(vec![review_json("c", 1400), first, second, review_json("a", 1100)], None),
            1,
        )
        .await;

        let reviews = fetcher(&server).fetch_new_reviews(1000).await.unwrap();
        assert_eq!(timestamps(&reviews), vec![1100, 1400]);
        assert!(reviews.iter().all(|r| !r.id.is_empty()));
    }

    #[tokio::test]
    async fn test_failed_page_fails_whole_fetch() {
        let server = MockServer::start().await;
        let uri = server.uri();
        mount(
            &server,
            LISTING,
            page(vec![review_json("b", 1010)], Some(format!("{}/next/2", uri))),
            1,
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/next/2"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let result = fetcher(&server).fetch_new_reviews(1000).await;
        assert!(matches!(result, Err(FetchError::Status { .. })));
    }

    #[tokio::test]
    async fn test_maps_review_fields() {
        let server = MockServer::start().await;
        mount(&server, LISTING, page(vec![review_json("r1", 1234)], None), 1).await;

        let reviews = fetcher(&server).fetch_new_reviews(1000).await.unwrap();
        let review = &reviews[0];
        assert_eq!(review.id, "r1");
        assert_eq!(review.rating, Some(5));
        assert_eq!(review.title.as_deref(), Some("title r1"));
        assert_eq!(review.body.as_deref(), Some("body r1"));
        assert_eq!(review.user_name.as_deref(), Some("reviewer"));
        assert_eq!(review.territory.as_deref(), Some("USA"));
        assert_eq!(review.url, ratings_url(APP_ID));
        assert!(review.app_version.is_none());
        assert!(review.platform.is_none());
    }

    #[test]
    fn test_parse_created_date() {
        assert_eq!(parse_created_date("2023-11-14T22:13:20-07:00"), 1_700_025_200);
        assert_eq!(parse_created_date("yesterday"), 0);
    }
}
