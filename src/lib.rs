pub mod appstore;
pub mod config;
pub mod error;
pub mod models;
pub mod notifications;
pub mod orchestrator;
pub mod store;

pub use appstore::{AppStoreClient, JwtTokenProvider, ReviewFetcher, VersionCorrelator};
pub use config::Config;
pub use error::{ConfigError, FetchError};
pub use models::*;
pub use notifications::{DeliveryReport, Notifier, SlackNotifier, SlackTransport};
pub use orchestrator::{Orchestrator, RunPhase, RunSummary};
pub use store::{CursorStore, FileCursorStore};
