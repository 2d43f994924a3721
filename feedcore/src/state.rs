use crate::types::{FeedFilter, NotificationId, NotificationItem, Page};
use log::debug;
use std::collections::HashSet;

/// Sequence number handed out when a request is issued. Only the completion
/// carrying the most recently issued token of its kind may touch the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestToken(u64);

/// Client-side cache of the notification feed for one mounted view.
#[derive(Debug, Clone)]
pub struct FeedState {
    items: Vec<NotificationItem>,
    known_ids: HashSet<NotificationId>,
    unread_count: u64,
    page: u32,
    has_more: bool,
    active_filter: FeedFilter,
    last_list_token: u64,
    last_count_token: u64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedState {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            known_ids: HashSet::new(),
            unread_count: 0,
            page: 0,
            has_more: true,
            active_filter: FeedFilter::All,
            last_list_token: 0,
            last_count_token: 0,
        }
    }

    /// Back to the freshly-mounted shape. Outstanding request tokens are
    /// invalidated so late completions are dropped.
    pub fn reset(&mut self) {
        self.items.clear();
        self.known_ids.clear();
        self.unread_count = 0;
        self.page = 0;
        self.has_more = true;
        self.active_filter = FeedFilter::All;
        self.last_list_token += 1;
        self.last_count_token += 1;
    }

    pub fn items(&self) -> &[NotificationItem] {
        &self.items
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn active_filter(&self) -> FeedFilter {
        self.active_filter
    }

    pub fn contains(&self, id: &NotificationId) -> bool {
        self.known_ids.contains(id)
    }

    pub fn get(&self, id: &NotificationId) -> Option<&NotificationItem> {
        self.items.iter().find(|item| &item.id == id)
    }

    pub fn begin_list_request(&mut self) -> RequestToken {
        self.last_list_token += 1;
        RequestToken(self.last_list_token)
    }

    pub fn is_current_list(&self, token: RequestToken) -> bool {
        token.0 == self.last_list_token
    }

    pub fn begin_count_request(&mut self) -> RequestToken {
        self.last_count_token += 1;
        RequestToken(self.last_count_token)
    }

    pub fn is_current_count(&self, token: RequestToken) -> bool {
        token.0 == self.last_count_token
    }

    /// Switching filters restarts pagination; the caller fetches page 0 next.
    pub fn set_filter(&mut self, filter: FeedFilter) {
        self.active_filter = filter;
        self.page = 0;
    }

    /// Applies a fetched page. Page 0 replaces the cache, later pages append
    /// while skipping ids already present. Returns the number of new items.
    pub fn apply_page(&mut self, page: u32, fetched: Page) -> usize {
        if page == 0 {
            self.items.clear();
            self.known_ids.clear();
            self.page = 0;
        }
        let added = self.append_unique(fetched.items);

        let loaded = self.items.len() as u64;
        self.has_more = loaded < fetched.total_elements && page + 1 < fetched.total_pages;
        added
    }

    fn append_unique(&mut self, incoming: Vec<NotificationItem>) -> usize {
        let before = self.items.len();
        for item in incoming {
            if self.known_ids.insert(item.id.clone()) {
                self.items.push(item);
            } else {
                debug!(target: "FeedState", "Skipping duplicate notification {}", item.id);
            }
        }
        self.items.len() - before
    }

    /// Records a successful load-more of `page`.
    pub fn advance_page(&mut self, page: u32) {
        self.page = page;
    }

    /// Forces end-of-stream, e.g. when a page came back empty.
    pub fn mark_exhausted(&mut self) {
        self.has_more = false;
    }

    /// Prepends a pushed item unless its id is already cached. An unread item
    /// bumps the unread count. Returns whether the item was inserted.
    pub fn merge_pushed(&mut self, item: NotificationItem) -> bool {
        if !self.known_ids.insert(item.id.clone()) {
            return false;
        }
        if !item.is_read {
            self.unread_count += 1;
        }
        self.items.insert(0, item);
        true
    }

    /// Marks one item read. `None` if the id is unknown, otherwise whether it was unread.
    pub fn mark_read(&mut self, id: &NotificationId) -> Option<bool> {
        let item = self.items.iter_mut().find(|item| &item.id == id)?;
        let was_unread = !item.is_read;
        item.is_read = true;
        if was_unread {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        Some(was_unread)
    }

    pub fn mark_all_read(&mut self) {
        for item in &mut self.items {
            item.is_read = true;
        }
        self.unread_count = 0;
    }

    /// Removes an item; an unread one also lowers the unread count (floored at 0).
    pub fn remove(&mut self, id: &NotificationId) -> Option<NotificationItem> {
        let idx = self.items.iter().position(|item| &item.id == id)?;
        let removed = self.items.remove(idx);
        self.known_ids.remove(id);
        if !removed.is_read {
            self.unread_count = self.unread_count.saturating_sub(1);
        }
        Some(removed)
    }

    pub fn set_unread_count(&mut self, count: u64) {
        self.unread_count = count;
    }
}
