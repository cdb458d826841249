//! The activity log contract shared by every backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use blogdesk_common::{
    ActivityLogRecord, ActivityPage, ActivityQuery, ActivityStatus, ActivityType, NewActivity,
};

use crate::error::Result;

/// Durable record of task activity.
///
/// Implemented by [`PgActivityLog`](crate::PgActivityLog) (production) and
/// [`MemoryActivityLog`](crate::MemoryActivityLog) (tests, local runs).
#[async_trait]
pub trait ActivityLogStore: Send + Sync {
    /// Append a record. The store assigns `id` and `created_at`.
    async fn append(&self, activity: NewActivity) -> Result<ActivityLogRecord>;

    /// Most recent records first, strictly descending by `created_at`,
    /// capped at the query's clamped limit.
    async fn list_recent(&self, query: &ActivityQuery) -> Result<Vec<ActivityLogRecord>>;

    /// Offset/limit listing. `page` is 1-based; `page_size` is clamped.
    async fn list_page(
        &self,
        page: u32,
        page_size: u32,
        activity_type: Option<ActivityType>,
        status: Option<ActivityStatus>,
    ) -> Result<ActivityPage>;

    /// Delete records created before `cutoff`. Returns how many were removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
impl<S: ActivityLogStore + ?Sized> ActivityLogStore for Arc<S> {
    async fn append(&self, activity: NewActivity) -> Result<ActivityLogRecord> {
        (**self).append(activity).await
    }

    async fn list_recent(&self, query: &ActivityQuery) -> Result<Vec<ActivityLogRecord>> {
        (**self).list_recent(query).await
    }

    async fn list_page(
        &self,
        page: u32,
        page_size: u32,
        activity_type: Option<ActivityType>,
        status: Option<ActivityStatus>,
    ) -> Result<ActivityPage> {
        (**self)
            .list_page(page, page_size, activity_type, status)
            .await
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        (**self).delete_older_than(cutoff).await
    }
}
