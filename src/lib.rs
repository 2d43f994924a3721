// Core types and pure feed logic live in feedcore; the runtime pieces live here.
pub use feedcore::{api::NotificationApi, grouping, net, reconnect, sanitize, state, types};

pub mod api;
pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod push;
pub mod test_utils;

pub use client::{FeedClient, FeedSnapshot, FetchOutcome, LoadMoreOutcome};
pub use config::FeedConfig;
pub use error::FeedError;
