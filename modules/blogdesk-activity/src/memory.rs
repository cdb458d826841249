//! In-memory activity log. No database required.

use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use blogdesk_common::{
    clamp_page_size, ActivityLogRecord, ActivityPage, ActivityQuery, ActivityStatus,
    ActivityType, NewActivity,
};

use crate::error::Result;
use crate::store::ActivityLogStore;

/// Thread-safe in-memory log.
///
/// `created_at` is kept strictly increasing across appends: when the clock
/// has not moved since the previous record, the new one is nudged forward
/// by a microsecond.
#[derive(Default)]
pub struct MemoryActivityLog {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    records: Vec<ActivityLogRecord>,
    last_created_at: Option<DateTime<Utc>>,
}

impl MemoryActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append with an explicit timestamp, e.g. to backfill history.
    pub fn append_at(&self, activity: NewActivity, created_at: DateTime<Utc>) -> ActivityLogRecord {
        let record = to_record(activity, created_at);
        let mut inner = self.lock();
        inner.last_created_at = inner.last_created_at.max(Some(created_at));
        inner.records.push(record.clone());
        record
    }

    /// Every record in insertion order (for test assertions).
    pub fn records(&self) -> Vec<ActivityLogRecord> {
        self.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn filtered_newest_first(
        &self,
        activity_type: Option<ActivityType>,
        status: Option<ActivityStatus>,
    ) -> Vec<ActivityLogRecord> {
        let filter = ActivityQuery {
            limit: None,
            activity_type,
            status,
        };
        let mut matching: Vec<ActivityLogRecord> = self
            .lock()
            .records
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        // Stable sort keeps insertion order among equal timestamps; reverse
        // afterwards so later inserts win ties.
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        matching.reverse();
        matching
    }
}

fn to_record(activity: NewActivity, created_at: DateTime<Utc>) -> ActivityLogRecord {
    ActivityLogRecord {
        id: Uuid::new_v4(),
        activity_type: activity.activity_type,
        status: activity.status,
        message: activity.message,
        details: activity.details,
        created_at,
    }
}

#[async_trait]
impl ActivityLogStore for MemoryActivityLog {
    async fn append(&self, activity: NewActivity) -> Result<ActivityLogRecord> {
        let mut inner = self.lock();
        let mut created_at = Utc::now();
        if let Some(last) = inner.last_created_at {
            if created_at <= last {
                created_at = last + Duration::microseconds(1);
            }
        }
        inner.last_created_at = Some(created_at);

        let record = to_record(activity, created_at);
        inner.records.push(record.clone());
        Ok(record)
    }

    async fn list_recent(&self, query: &ActivityQuery) -> Result<Vec<ActivityLogRecord>> {
        let mut records = self.filtered_newest_first(query.activity_type, query.status);
        records.truncate(query.effective_limit() as usize);
        Ok(records)
    }

    async fn list_page(
        &self,
        page: u32,
        page_size: u32,
        activity_type: Option<ActivityType>,
        status: Option<ActivityStatus>,
    ) -> Result<ActivityPage> {
        let page = page.max(1);
        let page_size = clamp_page_size(page_size);
        let records = self.filtered_newest_first(activity_type, status);
        let total = records.len() as u64;
        let offset = (page as usize - 1) * page_size as usize;

        let items = records
            .into_iter()
            .skip(offset)
            .take(page_size as usize)
            .collect();

        Ok(ActivityPage::new(items, total, page, page_size))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock();
        let before = inner.records.len();
        inner.records.retain(|r| r.created_at >= cutoff);
        Ok((before - inner.records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_get_strictly_increasing_timestamps() {
        let log = MemoryActivityLog::new();
        let mut previous = None;
        for i in 0..200 {
            let record = log
                .append(NewActivity::running(ActivityType::Scrape, format!("tick {i}")))
                .await
                .unwrap();
            if let Some(prev) = previous {
                assert!(record.created_at > prev);
            }
            previous = Some(record.created_at);
        }
    }

    #[tokio::test]
    async fn later_insert_wins_timestamp_ties() {
        let log = MemoryActivityLog::new();
        let at = Utc::now();
        log.append_at(NewActivity::running(ActivityType::Pipeline, "first"), at);
        log.append_at(NewActivity::success(ActivityType::Pipeline, "second"), at);

        let recent = log.list_recent(&ActivityQuery::recent(10)).await.unwrap();
        assert_eq!(recent[0].message, "second");
        assert_eq!(recent[1].message, "first");
    }
}
