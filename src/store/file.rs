use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use super::CursorStore;
use crate::models::Cursor;

/// Plain-file cursor store: `<dir>/<platform>` holds the last-checked
/// timestamp, `<dir>/<platform>_welcome` marks the welcome message as sent.
pub struct FileCursorStore {
    base_path: PathBuf,
}

impl FileCursorStore {
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    fn timestamp_path(&self, platform: &str) -> PathBuf {
        self.base_path.join(platform)
    }

    fn welcome_path(&self, platform: &str) -> PathBuf {
        self.base_path.join(format!("{}_welcome", platform))
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).with_context(|| {
            format!(
                "Failed to create state directory: {}",
                self.base_path.display()
            )
        })
    }
}

impl CursorStore for FileCursorStore {
    fn load(&self, platform: &str) -> Result<Cursor> {
        let path = self.timestamp_path(platform);

        let last_check_timestamp = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read cursor: {}", path.display()))?;
            content
                .trim()
                .parse::<i64>()
                .with_context(|| format!("Corrupt cursor file: {}", path.display()))?
        } else {
            0
        };

        let cursor = Cursor {
            last_check_timestamp,
            welcome_sent: self.welcome_path(platform).exists(),
        };

        debug!(platform, ?cursor, "Loaded cursor");

        Ok(cursor)
    }

    fn save_last_check(&self, platform: &str, timestamp: i64) -> Result<()> {
        self.ensure_dir()?;

        let path = self.timestamp_path(platform);
        let tmp = self.base_path.join(format!(".{}.tmp", platform));

        // Write then rename so a crash never leaves a half-written cursor
        fs::write(&tmp, timestamp.to_string())
            .with_context(|| format!("Failed to write cursor: {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace cursor: {}", path.display()))?;

        info!(platform, timestamp, "Saved cursor");

        Ok(())
    }

    fn mark_welcome_sent(&self, platform: &str) -> Result<()> {
        self.ensure_dir()?;

        let path = self.welcome_path(platform);
        fs::write(&path, "")
            .with_context(|| format!("Failed to write welcome marker: {}", path.display()))?;

        debug!(platform, "Marked welcome message as sent");

        Ok(())
    }
}
