pub mod file;

pub use file::FileCursorStore;

use anyhow::Result;

use crate::models::Cursor;

/// Trait for cursor persistence backends
pub trait CursorStore: Send + Sync {
    /// Load the cursor for a platform, defaulting to a never-run cursor
    fn load(&self, platform: &str) -> Result<Cursor>;

    /// Record the newest review timestamp processed for a platform
    fn save_last_check(&self, platform: &str, timestamp: i64) -> Result<()>;

    /// Record that the welcome message went out for a platform
    fn mark_welcome_sent(&self, platform: &str) -> Result<()>;
}
