use crate::types::{ConnectionState, NotificationId, NotificationItem};
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};

/// Which user action a [`Event::MutationFailed`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MutationAction {
    MarkRead,
    MarkAllRead,
    Delete,
}

#[derive(Debug, Clone, Serialize)]
pub enum Event {
    /// Page 0 was (re)fetched and replaced the cached items.
    FeedReplaced { count: usize },
    /// A later page was appended.
    ItemsAppended { count: usize },
    /// A pushed item was merged at the head of the feed.
    NotificationReceived(Box<NotificationItem>),
    UnreadCountChanged(u64),
    ConnectionStateChanged(ConnectionState),
    MutationFailed {
        action: MutationAction,
        message: String,
    },
    NotificationDeleted {
        id: NotificationId,
        message: Option<String>,
    },
}

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event);
}

#[derive(Default, Clone)]
pub struct CoreEventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl CoreEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&self, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn dispatch(&self, event: &Event) {
        for handler in self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            handler.handle_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl EventHandler for Recorder {
        fn handle_event(&self, event: &Event) {
            self.0
                .lock()
                .expect("recorder lock")
                .push(format!("{event:?}"));
        }
    }

    #[test]
    fn test_dispatch_reaches_every_handler() {
        let bus = CoreEventBus::new();

        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        bus.add_handler(first.clone());
        bus.add_handler(second.clone());

        bus.dispatch(&Event::UnreadCountChanged(4));

        assert_eq!(first.0.lock().expect("lock").len(), 1);
        assert_eq!(
            second.0.lock().expect("lock").as_slice(),
            ["UnreadCountChanged(4)"]
        );
    }
}
