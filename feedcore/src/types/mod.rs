pub mod events;

use crate::sanitize;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Opaque notification identifier.
///
/// The backend is free to send ids as JSON strings or integers; both are
/// normalised to their decimal/string form so equality is stable across
/// fetches and push deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NotificationId(String);

impl NotificationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for NotificationId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for NotificationId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Text(String),
            Signed(i64),
            Unsigned(u64),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Text(s) => Self(s),
            RawId::Signed(n) => Self(n.to_string()),
            RawId::Unsigned(n) => Self(n.to_string()),
        })
    }
}

/// A single entry of the notification feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub id: NotificationId,
    #[serde(default, alias = "read")]
    pub is_read: bool,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub title: String,
    /// Rich text; may contain markup. Use [`NotificationItem::safe_message`] before display.
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target_url: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl NotificationItem {
    pub fn new(id: impl Into<NotificationId>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            is_read: false,
            created_at,
            title: String::new(),
            message: String::new(),
            target_url: None,
            avatar_url: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    /// The message reduced to the inline markup subset that is safe to render.
    pub fn safe_message(&self) -> String {
        sanitize::sanitize_markup(&self.message)
    }

    /// The avatar URL, if present and using an allowed scheme.
    pub fn safe_avatar_url(&self) -> Option<url::Url> {
        self.avatar_url
            .as_deref()
            .and_then(sanitize::checked_avatar_url)
    }

    /// The navigation target, if present and using an allowed scheme.
    /// Relative targets are returned untouched since they resolve against the host app.
    pub fn safe_target(&self) -> Option<&str> {
        let target = self.target_url.as_deref()?.trim();
        if target.starts_with('/') && !target.starts_with("//") {
            return Some(target);
        }
        sanitize::checked_url(target).map(|_| target)
    }
}

/// Accepts RFC 3339 strings, zone-less ISO timestamps (taken as UTC), and epoch millis.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Text(String),
        Millis(i64),
    }

    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {ms}"))),
        RawTimestamp::Text(s) => parse_timestamp(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {s}"))),
    }
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedFilter {
    #[default]
    All,
    UnreadOnly,
}

impl FeedFilter {
    pub fn unread_only(self) -> bool {
        matches!(self, FeedFilter::UnreadOnly)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

pub const DEFAULT_SORT_FIELD: &str = "createdAt";

/// Arguments for one call to the paginated list endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub unread_only: bool,
    pub sort_by: String,
    pub sort_dir: SortDirection,
}

impl PageRequest {
    pub fn new(page: u32, size: u32, filter: FeedFilter) -> Self {
        Self {
            page,
            size,
            unread_only: filter.unread_only(),
            sort_by: DEFAULT_SORT_FIELD.to_string(),
            sort_dir: SortDirection::Desc,
        }
    }
}

/// One page of the list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    #[serde(rename = "content", alias = "items", default)]
    pub items: Vec<NotificationItem>,
    #[serde(default)]
    pub total_elements: u64,
    #[serde(default)]
    pub total_pages: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// A bounded reconnect policy ran out of attempts.
    GaveUp,
    /// Torn down by the owner; terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::GaveUp => "gave up",
            ConnectionState::Closed => "closed",
        };
        f.write_str(label)
    }
}
