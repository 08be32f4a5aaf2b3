pub mod auth;
pub mod client;
pub mod fetcher;
pub mod types;
pub mod versions;

pub use auth::{JwtTokenProvider, StaticTokenProvider, TokenProvider};
pub use client::{AppStoreClient, RetryPolicy};
pub use fetcher::ReviewFetcher;
pub use versions::{CorrelationStats, VersionCorrelator};
