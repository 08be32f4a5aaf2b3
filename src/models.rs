use serde::{Deserialize, Serialize};

/// A customer review pulled from the storefront
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Storefront OS variant (IOS, MAC_OS, ...), filled by version correlation
    pub platform: Option<String>,
    pub id: String,
    pub user_name: Option<String>,
    pub rating: Option<u8>,
    pub title: Option<String>,
    pub body: Option<String>,
    /// Seconds since epoch, 0 when the source had no creation date
    pub timestamp: i64,
    pub territory: Option<String>,
    /// Filled by version correlation
    pub app_version: Option<String>,
    pub url: String,
}

impl Review {
    /// Whether version correlation still has to resolve this review
    pub fn needs_version(&self) -> bool {
        self.app_version.is_none()
    }
}

/// Persisted watermark for one platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    /// Newest review timestamp already processed, 0 if never run
    pub last_check_timestamp: i64,
    pub welcome_sent: bool,
}

impl Cursor {
    pub fn is_first_run(&self) -> bool {
        self.last_check_timestamp == 0
    }

    /// First-ever run and the welcome message has not gone out yet
    pub fn needs_welcome(&self) -> bool {
        self.is_first_run() && !self.welcome_sent
    }
}

/// Slack legacy attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub color: String,
    pub fallback: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
}

/// Body of one outgoing Slack message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Payload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    pub attachments: Vec<Attachment>,
}
