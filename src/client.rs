use crate::config::FeedConfig;
use crate::error::FeedError;
use chrono::{DateTime, TimeZone};
use feedcore::api::{DeleteOutcome, NotificationApi};
use feedcore::error::ApiError;
use feedcore::grouping::{DisplayGroups, group_for_display};
use feedcore::net::{PushChannel, PushChannelFactory, PushEvent};
use feedcore::state::FeedState;
use feedcore::types::events::{CoreEventBus, Event, MutationAction};
use feedcore::types::{ConnectionState, FeedFilter, NotificationId, NotificationItem, PageRequest};
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// How a page fetch ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The page was applied; `added` new items entered the feed.
    Applied { added: usize },
    /// A newer list request was issued meanwhile, so this result was dropped.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMoreOutcome {
    /// Nothing to do: a load is already running or the feed is exhausted.
    Skipped,
    Loaded { added: usize, has_more: bool },
    /// The feed was replaced while this page was in flight.
    Superseded,
}

/// Read-only copy of the feed for rendering.
#[derive(Debug, Clone)]
pub struct FeedSnapshot {
    pub items: Vec<NotificationItem>,
    pub unread_count: u64,
    pub page: u32,
    pub has_more: bool,
    pub active_filter: FeedFilter,
    pub connection: ConnectionState,
    pub is_open: bool,
}

impl FeedSnapshot {
    /// Today/earlier split of this snapshot as seen at `now`. Rebuild it from a
    /// fresh snapshot whenever the feed or filter changes.
    pub fn group_for_display<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DisplayGroups<'_> {
        group_for_display(&self.items, self.active_filter, now)
    }
}

/// Keeps one user's notification feed in sync with the server for as long as
/// the owning view is mounted.
pub struct FeedClient {
    pub(crate) config: FeedConfig,
    pub(crate) api: Arc<dyn NotificationApi>,
    pub(crate) push_factory: Arc<dyn PushChannelFactory>,

    state: Mutex<FeedState>,

    pub(crate) is_running: AtomicBool,
    pub(crate) is_loading_more: AtomicBool,
    pub(crate) push_started: AtomicBool,
    pub(crate) is_open: AtomicBool,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) connection_tx: watch::Sender<ConnectionState>,
    pub(crate) push_channel: Mutex<Option<Arc<dyn PushChannel>>>,
    /// Consecutive push failures since the last successful connect.
    pub(crate) reconnect_errors: AtomicU32,

    pub event_bus: CoreEventBus,
}

impl FeedClient {
    pub fn new(
        config: FeedConfig,
        api: Arc<dyn NotificationApi>,
        push_factory: Arc<dyn PushChannelFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            api,
            push_factory,
            state: Mutex::new(FeedState::new()),
            is_running: AtomicBool::new(true),
            is_loading_more: AtomicBool::new(false),
            push_started: AtomicBool::new(false),
            is_open: AtomicBool::new(false),
            shutdown_tx: watch::channel(false).0,
            connection_tx: watch::channel(ConnectionState::Disconnected).0,
            push_channel: Mutex::new(None),
            reconnect_errors: AtomicU32::new(0),
            event_bus: CoreEventBus::new(),
        })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_tx.borrow()
    }

    /// Watch connection state transitions.
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection_tx.subscribe()
    }

    /// Runs `f` against the feed state. The lock is never held across an await.
    fn with_state<R>(&self, f: impl FnOnce(&mut FeedState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.with_state(|s| FeedSnapshot {
            items: s.items().to_vec(),
            unread_count: s.unread_count(),
            page: s.page(),
            has_more: s.has_more(),
            active_filter: s.active_filter(),
            connection: self.connection_state(),
            is_open: self.is_open.load(Ordering::Relaxed),
        })
    }

    fn ensure_running(&self) -> Result<(), FeedError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(FeedError::NotRunning)
        }
    }

    /// Resolves once [`FeedClient::shutdown`] has been called.
    pub(crate) async fn wait_for_shutdown(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Records a connection transition. `Closed` is terminal: a push task
    /// racing with shutdown cannot move the state back out of it.
    pub(crate) fn set_connection_state(&self, next: ConnectionState) {
        let mut previous = None;
        self.connection_tx.send_if_modified(|state| {
            if *state == next || *state == ConnectionState::Closed {
                return false;
            }
            previous = Some(std::mem::replace(state, next));
            true
        });
        if let Some(previous) = previous {
            debug!(target: "FeedClient/Push", "Connection state {previous} -> {next}");
            self.event_bus
                .dispatch(&Event::ConnectionStateChanged(next));
        }
    }

    /// Fresh mount: clears the feed, loads the first page and the unread
    /// count, then opens the push channel. Fetch failures are only logged; the
    /// feed stays as it was until the user refreshes.
    pub async fn initialize(self: &Arc<Self>) {
        if !self.is_running() {
            warn!(target: "FeedClient", "initialize called after shutdown");
            return;
        }
        info!(target: "FeedClient", "Initializing notification feed for user {:?}", self.config.user_id);
        self.with_state(|s| s.reset());

        let (page, count) = tokio::join!(
            self.fetch_page(0, FeedFilter::All),
            self.refresh_unread_count()
        );
        if let Err(e) = page {
            warn!(target: "FeedClient", "Initial page fetch failed: {e}");
        }
        if let Err(e) = count {
            warn!(target: "FeedClient", "Initial unread count fetch failed: {e}");
        }

        self.start_push();
    }

    /// Fetches one page under `filter`. Page 0 replaces the feed, later pages
    /// append. On failure the feed is untouched and the error is returned for
    /// the caller to surface.
    pub async fn fetch_page(&self, page: u32, filter: FeedFilter) -> Result<FetchOutcome, FeedError> {
        self.ensure_running()?;
        let token = self.with_state(|s| s.begin_list_request());
        let request = PageRequest::new(page, self.config.page_size, filter);

        let fetched = match self.api.fetch_page(request).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!(target: "FeedClient", "Fetching page {page} ({filter:?}) failed: {e}");
                return Err(e.into());
            }
        };
        self.ensure_running()?;

        let applied = self.with_state(|s| {
            s.is_current_list(token)
                .then(|| s.apply_page(page, fetched))
        });
        let Some(added) = applied else {
            debug!(target: "FeedClient", "Discarding stale result for page {page}");
            return Ok(FetchOutcome::Superseded);
        };

        if page == 0 {
            self.event_bus.dispatch(&Event::FeedReplaced { count: added });
        } else {
            self.event_bus.dispatch(&Event::ItemsAppended { count: added });
        }
        Ok(FetchOutcome::Applied { added })
    }

    /// Re-reads the authoritative unread count.
    pub async fn refresh_unread_count(&self) -> Result<u64, FeedError> {
        self.ensure_running()?;
        let token = self.with_state(|s| s.begin_count_request());

        let count = match self.api.fetch_unread_count().await {
            Ok(count) => count,
            Err(e) => {
                warn!(target: "FeedClient", "Fetching unread count failed: {e}");
                return Err(e.into());
            }
        };
        self.ensure_running()?;

        let applied = self.with_state(|s| {
            let current = s.is_current_count(token);
            if current {
                s.set_unread_count(count);
            }
            current
        });
        if applied {
            self.event_bus.dispatch(&Event::UnreadCountChanged(count));
        } else {
            debug!(target: "FeedClient", "Discarding stale unread count {count}");
        }
        Ok(count)
    }

    /// Loads the next page after the configured delay. Calls made while a
    /// load is pending, or once the feed is exhausted, do nothing.
    pub async fn load_more(&self) -> Result<LoadMoreOutcome, FeedError> {
        self.ensure_running()?;
        if !self.with_state(|s| s.has_more()) {
            return Ok(LoadMoreOutcome::Skipped);
        }
        if self.is_loading_more.swap(true, Ordering::SeqCst) {
            debug!(target: "FeedClient", "load_more ignored, a load is already pending");
            return Ok(LoadMoreOutcome::Skipped);
        }
        let _guard = scopeguard::guard((), |_| {
            self.is_loading_more.store(false, Ordering::SeqCst);
        });

        tokio::select! {
            _ = tokio::time::sleep(self.config.load_more_delay) => {}
            _ = self.wait_for_shutdown() => return Err(FeedError::NotRunning),
        }

        let (next, filter) = self.with_state(|s| (s.page() + 1, s.active_filter()));
        match self.fetch_page(next, filter).await? {
            FetchOutcome::Superseded => Ok(LoadMoreOutcome::Superseded),
            FetchOutcome::Applied { added } => {
                let has_more = self.with_state(|s| {
                    s.advance_page(next);
                    // An empty page ends the stream even if the counts disagree.
                    if added == 0 {
                        s.mark_exhausted();
                    }
                    s.has_more()
                });
                Ok(LoadMoreOutcome::Loaded { added, has_more })
            }
        }
    }

    /// Changes the filter and reloads from page 0. "Unread" is decided by the
    /// server, so this is a full reload rather than a local filter.
    pub async fn switch_filter(&self, filter: FeedFilter) -> Result<(), FeedError> {
        self.ensure_running()?;
        info!(target: "FeedClient", "Switching feed filter to {filter:?}");
        self.with_state(|s| s.set_filter(filter));

        let (page, count) = tokio::join!(self.fetch_page(0, filter), self.refresh_unread_count());
        page?;
        count?;
        Ok(())
    }

    /// User-triggered retry of the current view.
    pub async fn refresh(&self) -> Result<(), FeedError> {
        let filter = self.with_state(|s| s.active_filter());
        self.switch_filter(filter).await
    }

    /// Applies one event from the push channel.
    pub async fn handle_push_event(&self, event: PushEvent) {
        if !self.is_running() {
            return;
        }
        match event {
            PushEvent::Connected => {
                info!(target: "FeedClient/Push", "Push channel connected, resynchronizing");
                self.reconnect_errors.store(0, Ordering::SeqCst);
                self.set_connection_state(ConnectionState::Connected);

                // Events may have been missed while disconnected.
                let filter = self.with_state(|s| s.active_filter());
                let (page, count) =
                    tokio::join!(self.fetch_page(0, filter), self.refresh_unread_count());
                if let Err(e) = page {
                    warn!(target: "FeedClient/Push", "Resync page fetch failed: {e}");
                }
                if let Err(e) = count {
                    warn!(target: "FeedClient/Push", "Resync unread count failed: {e}");
                }
            }
            PushEvent::Notification(item) => {
                let id = item.id.clone();
                let merged = self.with_state(|s| {
                    s.merge_pushed((*item).clone())
                        .then(|| s.unread_count())
                });
                match merged {
                    Some(unread) => {
                        debug!(target: "FeedClient/Push", "Merged pushed notification {id}");
                        let was_unread = !item.is_read;
                        self.event_bus.dispatch(&Event::NotificationReceived(item));
                        if was_unread {
                            self.event_bus.dispatch(&Event::UnreadCountChanged(unread));
                        }
                    }
                    None => debug!(target: "FeedClient/Push", "Ignoring duplicate pushed notification {id}"),
                }
            }
            PushEvent::Error(reason) => {
                warn!(target: "FeedClient/Push", "Push channel error: {reason}");
                self.set_connection_state(ConnectionState::Disconnected);
            }
        }
    }

    fn mutation_failed(&self, action: MutationAction, error: ApiError) -> FeedError {
        warn!(target: "FeedClient", "{action:?} failed: {error}");
        self.event_bus.dispatch(&Event::MutationFailed {
            action,
            message: error.user_message(),
        });
        FeedError::Api(error)
    }

    async fn reconcile_unread_count(&self) {
        if let Err(e) = self.refresh_unread_count().await {
            debug!(target: "FeedClient", "Unread count reconciliation failed: {e}");
        }
    }

    /// Marks one cached notification read on the server, then locally, then
    /// reconciles the unread count.
    pub async fn mark_as_read(&self, id: &NotificationId) -> Result<(), FeedError> {
        self.ensure_running()?;
        if !self.with_state(|s| s.contains(id)) {
            return Err(FeedError::UnknownNotification(id.clone()));
        }
        if let Err(e) = self.api.mark_read(id).await {
            return Err(self.mutation_failed(MutationAction::MarkRead, e));
        }

        let changed = self.with_state(|s| {
            s.mark_read(id)
                .filter(|was_unread| *was_unread)
                .map(|_| s.unread_count())
        });
        if let Some(unread) = changed {
            self.event_bus.dispatch(&Event::UnreadCountChanged(unread));
        }
        self.reconcile_unread_count().await;
        Ok(())
    }

    pub async fn mark_all_as_read(&self) -> Result<(), FeedError> {
        self.ensure_running()?;
        if let Err(e) = self.api.mark_all_read().await {
            return Err(self.mutation_failed(MutationAction::MarkAllRead, e));
        }

        self.with_state(|s| s.mark_all_read());
        self.event_bus.dispatch(&Event::UnreadCountChanged(0));
        self.reconcile_unread_count().await;
        Ok(())
    }

    /// Deletes a notification on the server and drops it from the feed.
    /// Returns the server's message for the user, if any.
    pub async fn delete_notification(&self, id: &NotificationId) -> Result<DeleteOutcome, FeedError> {
        self.ensure_running()?;
        let outcome = match self.api.delete(id).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.mutation_failed(MutationAction::Delete, e)),
        };

        let unread_after = self.with_state(|s| {
            s.remove(id)
                .filter(|removed| !removed.is_read)
                .map(|_| s.unread_count())
        });
        self.event_bus.dispatch(&Event::NotificationDeleted {
            id: id.clone(),
            message: outcome.message.clone(),
        });
        if let Some(unread) = unread_after {
            self.event_bus.dispatch(&Event::UnreadCountChanged(unread));
        }
        self.reconcile_unread_count().await;
        Ok(outcome)
    }

    pub fn open_panel(&self) {
        self.is_open.store(true, Ordering::Relaxed);
    }

    pub fn close_panel(&self) {
        self.is_open.store(false, Ordering::Relaxed);
    }

    /// Flips the panel and returns the new state.
    pub fn toggle_panel(&self) -> bool {
        !self.is_open.fetch_xor(true, Ordering::Relaxed)
    }

    /// Unmount. Stops the push loop and any pending reconnect or load-more
    /// delay, closes the channel, and makes later completions no-ops.
    pub async fn shutdown(&self) {
        if !self.is_running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(target: "FeedClient", "Shutting down notification feed");
        self.shutdown_tx.send_replace(true);

        let channel = self
            .push_channel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(channel) = channel {
            channel.disconnect().await;
        }
        self.set_connection_state(ConnectionState::Closed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockNotificationApi, MockPushChannelFactory, RecordingHandler, sample_item};
    use std::time::Duration;

    fn client_with(api: Arc<MockNotificationApi>) -> Arc<FeedClient> {
        let mut config = FeedConfig::new("http://unused", "");
        config.load_more_delay = Duration::from_secs(1);
        FeedClient::new(config, api, Arc::new(MockPushChannelFactory::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_client_starts_empty() {
        let client = client_with(Arc::new(MockNotificationApi::with_unread(0)));
        let snapshot = client.snapshot();
        assert!(snapshot.items.is_empty());
        assert!(snapshot.has_more);
        assert_eq!(snapshot.page, 0);
        assert_eq!(snapshot.connection, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_initial_fetch_leaves_state_untouched() {
        let api = Arc::new(MockNotificationApi::with_unread(5));
        api.fail_reads(true);
        let client = client_with(api.clone());

        client.initialize().await;

        let snapshot = client.snapshot();
        assert!(snapshot.items.is_empty());
        assert!(snapshot.has_more, "a failed fetch must not end pagination");
        assert_eq!(snapshot.unread_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_page_completion_is_discarded() {
        let api = Arc::new(MockNotificationApi::new(
            (0..4).map(|id| sample_item(id, id % 2 == 0)).collect(),
        ));
        let client = client_with(api.clone());

        // The ALL fetch is slow, the UNREAD fetch issued after it is fast.
        api.delay_next_pages([Duration::from_secs(3), Duration::ZERO]);
        let (slow, fast) = tokio::join!(
            client.fetch_page(0, FeedFilter::All),
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                client.with_state(|s| s.set_filter(FeedFilter::UnreadOnly));
                client.fetch_page(0, FeedFilter::UnreadOnly).await
            }
        );

        assert_eq!(slow.expect("slow fetch"), FetchOutcome::Superseded);
        assert_eq!(fast.expect("fast fetch"), FetchOutcome::Applied { added: 2 });
        let snapshot = client.snapshot();
        assert_eq!(snapshot.items.len(), 2);
        assert!(snapshot.items.iter().all(|i| !i.is_read));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mutation_failure_is_surfaced_and_state_kept() {
        let api = Arc::new(MockNotificationApi::with_unread(3));
        let client = client_with(api.clone());
        let events = RecordingHandler::new();
        client.event_bus.add_handler(events.clone());
        client.initialize().await;

        api.fail_mutations(true);
        let id = NotificationId::from(1);
        let err = client.mark_as_read(&id).await.expect_err("must fail");
        assert!(matches!(err, FeedError::Api(_)));

        let snapshot = client.snapshot();
        assert_eq!(snapshot.unread_count, 3);
        assert!(snapshot.items.iter().all(|i| !i.is_read));
        assert!(events.events().iter().any(|e| matches!(
            e,
            Event::MutationFailed { action: MutationAction::MarkRead, .. }
        )));

        assert!(client.mark_all_as_read().await.is_err());
        assert!(client.delete_notification(&id).await.is_err());
        assert_eq!(client.snapshot().items.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_read_of_unknown_id_makes_no_call() {
        let api = Arc::new(MockNotificationApi::with_unread(1));
        let client = client_with(api.clone());
        client.initialize().await;

        let err = client
            .mark_as_read(&NotificationId::from("missing"))
            .await
            .expect_err("unknown id");
        assert!(matches!(err, FeedError::UnknownNotification(_)));
        assert_eq!(api.mutation_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mark_all_read_zeroes_everything() {
        let api = Arc::new(MockNotificationApi::with_unread(4));
        let client = client_with(api.clone());
        client.initialize().await;
        assert_eq!(client.snapshot().unread_count, 4);

        client.mark_all_as_read().await.expect("mark all");

        let snapshot = client.snapshot();
        assert_eq!(snapshot.unread_count, 0);
        assert!(snapshot.items.iter().all(|i| i.is_read));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_after_shutdown_are_rejected() {
        let api = Arc::new(MockNotificationApi::with_unread(2));
        let client = client_with(api.clone());
        client.initialize().await;
        client.shutdown().await;

        assert!(matches!(client.load_more().await, Err(FeedError::NotRunning)));
        assert!(matches!(
            client.switch_filter(FeedFilter::UnreadOnly).await,
            Err(FeedError::NotRunning)
        ));
        assert_eq!(client.connection_state(), ConnectionState::Closed);

        let before = client.snapshot().items.len();
        client
            .handle_push_event(PushEvent::Notification(Box::new(sample_item(50, false))))
            .await;
        assert_eq!(client.snapshot().items.len(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_connection_state_is_terminal() {
        let client = client_with(Arc::new(MockNotificationApi::with_unread(0)));
        let events = RecordingHandler::new();
        client.event_bus.add_handler(events.clone());
        client.set_connection_state(ConnectionState::Connecting);
        client.shutdown().await;

        // A push session finishing late must not reopen the state.
        client.set_connection_state(ConnectionState::Connecting);
        client.set_connection_state(ConnectionState::Disconnected);

        assert_eq!(client.connection_state(), ConnectionState::Closed);
        let transitions: Vec<ConnectionState> = events
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::ConnectionStateChanged(state) => Some(*state),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            [ConnectionState::Connecting, ConnectionState::Closed]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_panel_toggle() {
        let client = client_with(Arc::new(MockNotificationApi::with_unread(0)));
        assert!(client.toggle_panel());
        assert!(client.snapshot().is_open);
        assert!(!client.toggle_panel());
        client.open_panel();
        client.close_panel();
        assert!(!client.snapshot().is_open);
    }
}
