use feedcore::reconnect::ReconnectPolicy;
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const DEFAULT_LOAD_MORE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Root of the REST API, e.g. `https://lms.example.com/api`.
    pub base_url: String,
    /// The signed-in user whose feed is synchronised. An empty id means no
    /// session, and the push channel is never opened.
    pub user_id: String,
    pub auth_token: Option<String>,
    pub page_size: u32,
    /// Pause before each load-more fetch, so scroll bursts collapse into one request.
    #[serde(rename = "load_more_delay_ms", with = "duration_millis")]
    pub load_more_delay: Duration,
    pub reconnect: ReconnectPolicy,
    /// A push stream silent for this long is dropped and reconnected. Keep it
    /// above the server's keepalive interval.
    #[serde(rename = "stream_idle_timeout_secs", with = "duration_secs")]
    pub stream_idle_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_id: String::new(),
            auth_token: None,
            page_size: DEFAULT_PAGE_SIZE,
            load_more_delay: DEFAULT_LOAD_MORE_DELAY,
            reconnect: ReconnectPolicy::default(),
            stream_idle_timeout: DEFAULT_STREAM_IDLE_TIMEOUT,
        }
    }
}

impl FeedConfig {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// `base_url` without a trailing slash.
    pub fn api_root(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn stream_url(&self) -> String {
        format!("{}/notifications/stream", self.api_root())
    }

    pub fn has_session(&self) -> bool {
        !self.user_id.trim().is_empty()
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
