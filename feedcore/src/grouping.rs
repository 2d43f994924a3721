use crate::types::{FeedFilter, NotificationItem};
use chrono::{DateTime, TimeZone};

/// The feed split into "today" and "earlier" for one render pass. Borrows the
/// items it was built from, so it cannot outlive a change to them.
#[derive(Debug, Default, PartialEq)]
pub struct DisplayGroups<'a> {
    pub today: Vec<&'a NotificationItem>,
    pub earlier: Vec<&'a NotificationItem>,
}

impl DisplayGroups<'_> {
    pub fn len(&self) -> usize {
        self.today.len() + self.earlier.len()
    }

    pub fn is_empty(&self) -> bool {
        self.today.is_empty() && self.earlier.is_empty()
    }
}

/// Partitions `items` by the calendar day of `now` in `now`'s time zone,
/// keeping the incoming order inside each group. With `UnreadOnly` read items
/// are left out.
pub fn group_for_display<'a, Tz: TimeZone>(
    items: &'a [NotificationItem],
    filter: FeedFilter,
    now: &DateTime<Tz>,
) -> DisplayGroups<'a> {
    let zone = now.timezone();
    let today = now.date_naive();

    let mut groups = DisplayGroups::default();
    for item in items
        .iter()
        .filter(|item| !filter.unread_only() || !item.is_read)
    {
        if item.created_at.with_timezone(&zone).date_naive() >= today {
            groups.today.push(item);
        } else {
            groups.earlier.push(item);
        }
    }
    groups
}
