use feedcore::NotificationId;
use feedcore::error::ApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("notification {0} is not in the feed")]
    UnknownNotification(NotificationId),
    #[error("feed client has been shut down")]
    NotRunning,
}

impl FeedError {
    /// A short message suitable for a user-facing toast.
    pub fn user_message(&self) -> String {
        match self {
            FeedError::Api(e) => e.user_message(),
            FeedError::UnknownNotification(_) => "That notification no longer exists.".to_string(),
            FeedError::NotRunning => "Notifications are not available right now.".to_string(),
        }
    }
}
