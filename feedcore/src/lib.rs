pub mod api;
pub mod error;
pub mod grouping;
pub mod net;
pub mod reconnect;
pub mod sanitize;
pub mod sse;
pub mod state;
pub mod types;

pub use error::ApiError;
pub use state::FeedState;
pub use types::{FeedFilter, NotificationId, NotificationItem, Page};
