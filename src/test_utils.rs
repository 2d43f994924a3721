//! In-memory collaborators for exercising [`FeedClient`](crate::client::FeedClient)
//! without a server.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use feedcore::api::{DeleteOutcome, NotificationApi};
use feedcore::error::ApiError;
use feedcore::net::{HttpClient, HttpRequest, HttpResponse, PushChannel, PushChannelFactory, PushEvent};
use feedcore::types::events::{Event, EventHandler};
use feedcore::types::{NotificationId, NotificationItem, Page, PageRequest};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A fixed reference time so generated items have stable timestamps.
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 9, 2, 12, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Item `id`, created `id` minutes before [`base_time`], so lower ids are newer.
pub fn sample_item(id: u64, is_read: bool) -> NotificationItem {
    NotificationItem::new(id, base_time() - ChronoDuration::minutes(id as i64))
        .with_title(format!("Notification {id}"))
        .with_message(format!("Challenge <b>#{id}</b> is ready"))
        .read(is_read)
}

/// Replays canned responses in order and records every request.
#[derive(Default)]
pub struct ScriptedHttpClient {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status_code: u16, body: &str) {
        lock(&self.responses).push_back(HttpResponse {
            status_code,
            body: body.as_bytes().to_vec(),
        });
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn execute(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
        lock(&self.requests).push(request);
        lock(&self.responses)
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no scripted response left"))
    }
}

/// Server-side model of one user's notifications, newest first.
pub struct MockNotificationApi {
    items: Mutex<Vec<NotificationItem>>,
    unread_override: Mutex<Option<u64>>,
    page_delays: Mutex<VecDeque<Duration>>,
    scripted_pages: Mutex<VecDeque<Page>>,
    fail_reads: AtomicBool,
    fail_mutations: AtomicBool,
    page_calls: Mutex<Vec<PageRequest>>,
    count_calls: AtomicUsize,
    mutation_calls: AtomicUsize,
}

impl MockNotificationApi {
    pub fn new(mut items: Vec<NotificationItem>) -> Self {
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Self {
            items: Mutex::new(items),
            unread_override: Mutex::new(None),
            page_delays: Mutex::new(VecDeque::new()),
            scripted_pages: Mutex::new(VecDeque::new()),
            fail_reads: AtomicBool::new(false),
            fail_mutations: AtomicBool::new(false),
            page_calls: Mutex::new(Vec::new()),
            count_calls: AtomicUsize::new(0),
            mutation_calls: AtomicUsize::new(0),
        }
    }

    /// `count` unread items with ids `0..count`.
    pub fn with_unread(count: u64) -> Self {
        Self::new((0..count).map(|id| sample_item(id, false)).collect())
    }

    /// Adds an item server-side (e.g. before pushing it).
    pub fn insert(&self, item: NotificationItem) {
        let mut items = lock(&self.items);
        items.push(item);
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    }

    /// Makes the unread-count endpoint report `count` regardless of the items.
    pub fn set_unread_count(&self, count: Option<u64>) {
        *lock(&self.unread_override) = count;
    }

    /// Delays the next page fetches, one entry per call.
    pub fn delay_next_pages(&self, delays: impl IntoIterator<Item = Duration>) {
        lock(&self.page_delays).extend(delays);
    }

    /// Answers the next page fetch with `page` verbatim, whatever the items say.
    pub fn respond_with_page(&self, page: Page) {
        lock(&self.scripted_pages).push_back(page);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn page_calls(&self) -> Vec<PageRequest> {
        lock(&self.page_calls).clone()
    }

    pub fn count_calls(&self) -> usize {
        self.count_calls.load(Ordering::SeqCst)
    }

    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    fn check(flag: &AtomicBool) -> Result<(), ApiError> {
        if flag.load(Ordering::SeqCst) {
            return Err(ApiError::Network(anyhow::anyhow!("connection refused")));
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationApi for MockNotificationApi {
    async fn fetch_unread_count(&self) -> Result<u64, ApiError> {
        self.count_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_reads)?;
        if let Some(count) = *lock(&self.unread_override) {
            return Ok(count);
        }
        Ok(lock(&self.items).iter().filter(|i| !i.is_read).count() as u64)
    }

    async fn fetch_page(&self, request: PageRequest) -> Result<Page, ApiError> {
        lock(&self.page_calls).push(request.clone());
        let delay = lock(&self.page_delays).pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Self::check(&self.fail_reads)?;
        if let Some(page) = lock(&self.scripted_pages).pop_front() {
            return Ok(page);
        }

        let matching: Vec<NotificationItem> = lock(&self.items)
            .iter()
            .filter(|i| !request.unread_only || !i.is_read)
            .cloned()
            .collect();
        let size = request.size.max(1) as usize;
        let total_elements = matching.len() as u64;
        let total_pages = matching.len().div_ceil(size) as u32;
        let items = matching
            .into_iter()
            .skip(request.page as usize * size)
            .take(size)
            .collect();
        Ok(Page {
            items,
            total_elements,
            total_pages,
        })
    }

    async fn mark_read(&self, id: &NotificationId) -> Result<(), ApiError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_mutations)?;
        for item in lock(&self.items).iter_mut().filter(|i| &i.id == id) {
            item.is_read = true;
        }
        Ok(())
    }

    async fn mark_all_read(&self) -> Result<(), ApiError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_mutations)?;
        for item in lock(&self.items).iter_mut() {
            item.is_read = true;
        }
        Ok(())
    }

    async fn delete(&self, id: &NotificationId) -> Result<DeleteOutcome, ApiError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        Self::check(&self.fail_mutations)?;
        lock(&self.items).retain(|i| &i.id != id);
        Ok(DeleteOutcome {
            message: Some("Notification deleted".to_string()),
        })
    }
}

pub struct MockPushChannel {
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl PushChannel for MockPushChannel {
    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out in-memory push channels; tests inject events through [`MockPushChannelFactory::push`].
#[derive(Default)]
pub struct MockPushChannelFactory {
    senders: Mutex<Vec<mpsc::Sender<PushEvent>>>,
    failing_opens: AtomicUsize,
    always_fail: AtomicBool,
    opens: AtomicUsize,
    disconnects: Arc<AtomicUsize>,
}

impl MockPushChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` open attempts fail.
    pub fn fail_next_opens(&self, count: usize) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn fail_all_opens(&self, fail: bool) {
        self.always_fail.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Delivers `event` on the most recently opened channel.
    pub async fn push(&self, event: PushEvent) -> bool {
        let sender = lock(&self.senders).last().cloned();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl PushChannelFactory for MockPushChannelFactory {
    async fn open(
        &self,
        _user_id: &str,
    ) -> anyhow::Result<(Arc<dyn PushChannel>, mpsc::Receiver<PushEvent>)> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.always_fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("push endpoint unavailable"));
        }
        let remaining = self.failing_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failing_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("push endpoint unavailable"));
        }

        let (tx, rx) = mpsc::channel(16);
        lock(&self.senders).push(tx);
        let channel = MockPushChannel {
            disconnects: self.disconnects.clone(),
        };
        Ok((Arc::new(channel), rx))
    }
}

/// Collects every dispatched event.
#[derive(Default)]
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        lock(&self.events).clone()
    }

    pub fn unread_counts(&self) -> Vec<u64> {
        lock(&self.events)
            .iter()
            .filter_map(|e| match e {
                Event::UnreadCountChanged(n) => Some(*n),
                _ => None,
            })
            .collect()
    }
}

impl EventHandler for RecordingHandler {
    fn handle_event(&self, event: &Event) {
        lock(&self.events).push(event.clone());
    }
}
