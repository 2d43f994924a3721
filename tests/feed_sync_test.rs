use chrono::{Duration as ChronoDuration, FixedOffset, TimeZone};
use feedsync::net::PushEvent;
use feedsync::test_utils::{
    MockNotificationApi, MockPushChannelFactory, RecordingHandler, base_time, sample_item,
};
use feedsync::types::events::Event;
use feedsync::types::{FeedFilter, NotificationId, NotificationItem, Page};
use feedsync::{FeedClient, FeedConfig, LoadMoreOutcome};
use std::sync::Arc;
use std::time::Duration;

/// A client without a user session, so no push channel is opened.
fn offline_client(api: Arc<MockNotificationApi>) -> Arc<FeedClient> {
    FeedClient::new(
        FeedConfig::new("http://unused", ""),
        api,
        Arc::new(MockPushChannelFactory::new()),
    )
}

fn ids(client: &FeedClient) -> Vec<String> {
    client
        .snapshot()
        .items
        .iter()
        .map(|i| i.id.to_string())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_initialize_loads_first_page_and_count() {
    let api = Arc::new(MockNotificationApi::with_unread(3));
    let client = offline_client(api.clone());

    client.initialize().await;

    let snapshot = client.snapshot();
    assert_eq!(snapshot.items.len(), 3);
    assert_eq!(snapshot.unread_count, 3);
    assert_eq!(snapshot.active_filter, FeedFilter::All);
    assert!(!snapshot.has_more);

    let calls = api.page_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].page, 0);
    assert_eq!(calls[0].size, 10);
    assert!(!calls[0].unread_only);
    assert_eq!(api.count_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pagination_stops_at_total_elements() {
    let api = Arc::new(MockNotificationApi::new(
        (0..25).map(|id| sample_item(id, false)).collect(),
    ));
    let client = offline_client(api.clone());
    client.initialize().await;
    assert_eq!(client.snapshot().items.len(), 10);
    assert!(client.snapshot().has_more);

    let first = client.load_more().await.expect("page 1");
    assert_eq!(first, LoadMoreOutcome::Loaded { added: 10, has_more: true });
    assert_eq!(client.snapshot().items.len(), 20);

    let second = client.load_more().await.expect("page 2");
    assert_eq!(second, LoadMoreOutcome::Loaded { added: 5, has_more: false });

    let snapshot = client.snapshot();
    assert_eq!(snapshot.items.len(), 25);
    assert_eq!(snapshot.page, 2);
    assert!(!snapshot.has_more);

    // Exhausted: no further requests.
    assert_eq!(client.load_more().await.expect("noop"), LoadMoreOutcome::Skipped);
    let pages: Vec<u32> = api.page_calls().iter().map(|r| r.page).collect();
    assert_eq!(pages, vec![0, 1, 2]);

    // Newest first, no duplicates.
    let expected: Vec<String> = (0..25).map(|id| id.to_string()).collect();
    assert_eq!(ids(&client), expected);
}

#[tokio::test(start_paused = true)]
async fn test_empty_page_ends_pagination_despite_totals() {
    let api = Arc::new(MockNotificationApi::new(
        (0..25).map(|id| sample_item(id, false)).collect(),
    ));
    let client = offline_client(api.clone());
    client.initialize().await;
    assert!(client.snapshot().has_more);

    // The server's totals still promise more, but the page is empty.
    api.respond_with_page(Page {
        items: Vec::new(),
        total_elements: 25,
        total_pages: 3,
    });
    let outcome = client.load_more().await.expect("page 1");
    assert_eq!(outcome, LoadMoreOutcome::Loaded { added: 0, has_more: false });

    let snapshot = client.snapshot();
    assert!(!snapshot.has_more);
    assert_eq!(snapshot.page, 1);
    assert_eq!(snapshot.items.len(), 10);

    assert_eq!(client.load_more().await.expect("noop"), LoadMoreOutcome::Skipped);
    assert_eq!(api.page_calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_load_more_waits_for_delay() {
    let api = Arc::new(MockNotificationApi::new(
        (0..15).map(|id| sample_item(id, false)).collect(),
    ));
    let client = offline_client(api.clone());
    client.initialize().await;

    let started = tokio::time::Instant::now();
    client.load_more().await.expect("page 1");
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_load_more_issues_one_request() {
    let api = Arc::new(MockNotificationApi::new(
        (0..30).map(|id| sample_item(id, false)).collect(),
    ));
    let client = offline_client(api.clone());
    client.initialize().await;

    let (a, b) = tokio::join!(client.load_more(), async {
        tokio::time::sleep(Duration::from_millis(300)).await;
        client.load_more().await
    });

    let outcomes = [a.expect("first"), b.expect("second")];
    assert!(outcomes.contains(&LoadMoreOutcome::Skipped));
    assert!(outcomes.contains(&LoadMoreOutcome::Loaded { added: 10, has_more: true }));
    assert_eq!(api.page_calls().len(), 2, "initial page plus one load-more");

    // The guard is released afterwards.
    let third = client.load_more().await.expect("third");
    assert_eq!(third, LoadMoreOutcome::Loaded { added: 10, has_more: false });
}

#[tokio::test(start_paused = true)]
async fn test_switch_filter_restarts_from_first_page() {
    let api = Arc::new(MockNotificationApi::new(
        (0..30).map(|id| sample_item(id, id % 3 == 0)).collect(),
    ));
    let client = offline_client(api.clone());
    client.initialize().await;
    client.load_more().await.expect("page 1");
    assert_eq!(client.snapshot().page, 1);

    client
        .switch_filter(FeedFilter::UnreadOnly)
        .await
        .expect("unread view");
    let snapshot = client.snapshot();
    assert_eq!(snapshot.page, 0);
    assert_eq!(snapshot.active_filter, FeedFilter::UnreadOnly);
    assert_eq!(snapshot.items.len(), 10);
    assert!(snapshot.items.iter().all(|i| !i.is_read));
    let last = api.page_calls().pop().expect("request");
    assert_eq!((last.page, last.unread_only), (0, true));

    // Paging continues under the new filter.
    client.load_more().await.expect("unread page 1");
    let last = api.page_calls().pop().expect("request");
    assert_eq!((last.page, last.unread_only), (1, true));
    assert_eq!(client.snapshot().items.len(), 20);

    client.switch_filter(FeedFilter::All).await.expect("all view");
    let snapshot = client.snapshot();
    assert_eq!(snapshot.page, 0);
    assert_eq!(snapshot.items.len(), 10);
    assert!(snapshot.items.iter().any(|i| i.is_read));
}

#[tokio::test(start_paused = true)]
async fn test_pushed_notification_is_merged_once() {
    let api = Arc::new(MockNotificationApi::with_unread(3));
    let client = offline_client(api.clone());
    let events = RecordingHandler::new();
    client.event_bus.add_handler(events.clone());
    client.initialize().await;

    let fresh = NotificationItem::new("fresh", base_time() + ChronoDuration::minutes(1))
        .with_title("New challenge");
    client
        .handle_push_event(PushEvent::Notification(Box::new(fresh.clone())))
        .await;
    client
        .handle_push_event(PushEvent::Notification(Box::new(fresh)))
        .await;

    let snapshot = client.snapshot();
    assert_eq!(snapshot.items.len(), 4);
    assert_eq!(snapshot.items[0].id, NotificationId::from("fresh"));
    assert_eq!(snapshot.unread_count, 4);

    let received = events
        .events()
        .iter()
        .filter(|e| matches!(e, Event::NotificationReceived(_)))
        .count();
    assert_eq!(received, 1);
}

#[tokio::test(start_paused = true)]
async fn test_pushed_read_notification_keeps_count() {
    let api = Arc::new(MockNotificationApi::with_unread(2));
    let client = offline_client(api);
    client.initialize().await;

    client
        .handle_push_event(PushEvent::Notification(Box::new(
            sample_item(99, true),
        )))
        .await;

    let snapshot = client.snapshot();
    assert_eq!(snapshot.items.len(), 3);
    assert_eq!(snapshot.unread_count, 2);
}

#[tokio::test(start_paused = true)]
async fn test_mark_read_then_reconciles_with_server() {
    let api = Arc::new(MockNotificationApi::with_unread(3));
    let client = offline_client(api.clone());
    let events = RecordingHandler::new();
    client.event_bus.add_handler(events.clone());
    client.initialize().await;

    // The server knows about notifications this client has not seen.
    api.set_unread_count(Some(7));
    client
        .mark_as_read(&NotificationId::from(1))
        .await
        .expect("mark read");

    assert_eq!(events.unread_counts(), vec![3, 2, 7]);
    let snapshot = client.snapshot();
    assert_eq!(snapshot.unread_count, 7);
    let item = snapshot
        .items
        .iter()
        .find(|i| i.id == NotificationId::from(1))
        .expect("item kept");
    assert!(item.is_read);
    assert_eq!(api.count_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_marking_a_read_item_does_not_decrement() {
    let api = Arc::new(MockNotificationApi::new(vec![
        sample_item(1, true),
        sample_item(2, false),
    ]));
    let client = offline_client(api.clone());
    client.initialize().await;

    client
        .mark_as_read(&NotificationId::from(1))
        .await
        .expect("mark read");

    assert_eq!(client.snapshot().unread_count, 1);
    assert_eq!(api.mutation_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_delete_adjusts_unread_only_for_unread_items() {
    let api = Arc::new(MockNotificationApi::new(vec![
        sample_item(1, false),
        sample_item(2, false),
        sample_item(3, true),
    ]));
    let client = offline_client(api.clone());
    let events = RecordingHandler::new();
    client.event_bus.add_handler(events.clone());
    client.initialize().await;
    assert_eq!(client.snapshot().unread_count, 2);

    let outcome = client
        .delete_notification(&NotificationId::from(3))
        .await
        .expect("delete read");
    assert_eq!(outcome.message.as_deref(), Some("Notification deleted"));
    assert_eq!(client.snapshot().unread_count, 2);
    assert_eq!(ids(&client), vec!["1", "2"]);

    client
        .delete_notification(&NotificationId::from(1))
        .await
        .expect("delete unread");
    let snapshot = client.snapshot();
    assert_eq!(snapshot.unread_count, 1);
    assert_eq!(ids(&client), vec!["2"]);

    let deleted = events
        .events()
        .iter()
        .filter(|e| matches!(e, Event::NotificationDeleted { .. }))
        .count();
    assert_eq!(deleted, 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_retries_after_failure() {
    let api = Arc::new(MockNotificationApi::with_unread(4));
    api.fail_reads(true);
    let client = offline_client(api.clone());
    client.initialize().await;
    assert!(client.snapshot().items.is_empty());

    assert!(client.refresh().await.is_err());

    api.fail_reads(false);
    client.refresh().await.expect("refresh");
    let snapshot = client.snapshot();
    assert_eq!(snapshot.items.len(), 4);
    assert_eq!(snapshot.unread_count, 4);
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_groups_by_local_day() {
    let api = Arc::new(MockNotificationApi::new(vec![
        sample_item(0, false),
        NotificationItem::new("old", base_time() - ChronoDuration::days(2)).read(true),
    ]));
    let client = offline_client(api);
    client.initialize().await;

    let zone = FixedOffset::east_opt(0).expect("offset");
    let now = zone.from_utc_datetime(&(base_time() + ChronoDuration::hours(1)).naive_utc());
    let snapshot = client.snapshot();
    let groups = snapshot.group_for_display(&now);
    assert_eq!(groups.today.len(), 1);
    assert_eq!(groups.earlier.len(), 1);
    assert_eq!(groups.earlier[0].id, NotificationId::from("old"));

    client
        .switch_filter(FeedFilter::UnreadOnly)
        .await
        .expect("unread view");
    let snapshot = client.snapshot();
    let groups = snapshot.group_for_display(&now);
    assert_eq!(groups.len(), 1);
    assert!(groups.earlier.is_empty());
}
