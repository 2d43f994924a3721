use crate::error::Result;
use crate::types::{NotificationId, Page, PageRequest};
use async_trait::async_trait;

/// Result of a successful delete call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Optional user-facing message supplied by the server.
    pub message: Option<String>,
}

/// Remote collaborator for reading and mutating the notification feed.
#[async_trait]
pub trait NotificationApi: Send + Sync {
    /// Current unread count for the session's user.
    async fn fetch_unread_count(&self) -> Result<u64>;

    async fn fetch_page(&self, request: PageRequest) -> Result<Page>;

    async fn mark_read(&self, id: &NotificationId) -> Result<()>;

    async fn mark_all_read(&self) -> Result<()>;

    async fn delete(&self, id: &NotificationId) -> Result<DeleteOutcome>;
}
