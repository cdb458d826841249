//! Postgres-backed activity log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{debug, info};
use uuid::Uuid;

use blogdesk_common::{
    clamp_page_size, ActivityLogRecord, ActivityPage, ActivityQuery, ActivityStatus,
    ActivityType, NewActivity,
};

use crate::error::{ActivityLogError, Result};
use crate::store::ActivityLogStore;

const SELECT_COLUMNS: &str = "id, type, status, message, details, created_at";
const MAX_CONNECTIONS: u32 = 5;

#[derive(Clone)]
pub struct PgActivityLog {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ActivityRow {
    id: Uuid,
    #[sqlx(rename = "type")]
    activity_type: String,
    status: String,
    message: String,
    details: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<ActivityRow> for ActivityLogRecord {
    type Error = ActivityLogError;

    fn try_from(row: ActivityRow) -> Result<Self> {
        let id = row.id;
        let corrupt = |e: blogdesk_common::BlogdeskError| ActivityLogError::Corrupt {
            id,
            reason: e.to_string(),
        };
        Ok(ActivityLogRecord {
            id: row.id,
            activity_type: row.activity_type.parse().map_err(corrupt)?,
            status: row.status.parse().map_err(corrupt)?,
            message: row.message,
            details: row.details,
            created_at: row.created_at,
        })
    }
}

impl PgActivityLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect, then apply migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect(database_url)
            .await?;
        let log = Self::new(pool);
        log.migrate().await?;
        info!(max_connections = MAX_CONNECTIONS, "Activity log connected to Postgres");
        Ok(log)
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await?;
        Ok(())
    }
}

fn into_records(rows: Vec<ActivityRow>) -> Result<Vec<ActivityLogRecord>> {
    rows.into_iter().map(ActivityLogRecord::try_from).collect()
}

#[async_trait]
impl ActivityLogStore for PgActivityLog {
    async fn append(&self, activity: NewActivity) -> Result<ActivityLogRecord> {
        let row = sqlx::query_as::<_, ActivityRow>(&format!(
            r#"
            INSERT INTO activity_logs (id, type, status, message, details, created_at)
            VALUES ($1, $2, $3, $4, $5, clock_timestamp())
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(activity.activity_type.as_str())
        .bind(activity.status.as_str())
        .bind(&activity.message)
        .bind(&activity.details)
        .fetch_one(&self.pool)
        .await?;

        debug!(
            activity_type = %activity.activity_type,
            status = %activity.status,
            "Activity recorded"
        );
        row.try_into()
    }

    async fn list_recent(&self, query: &ActivityQuery) -> Result<Vec<ActivityLogRecord>> {
        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM activity_logs
            WHERE ($1::text IS NULL OR type = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#
        ))
        .bind(query.activity_type.map(|t| t.as_str()))
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.effective_limit() as i64)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
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
        let type_filter = activity_type.map(|t| t.as_str());
        let status_filter = status.map(|s| s.as_str());

        let (total,) = sqlx::query_as::<_, (i64,)>(
            r#"
            SELECT COUNT(*)
            FROM activity_logs
            WHERE ($1::text IS NULL OR type = $1)
              AND ($2::text IS NULL OR status = $2)
            "#,
        )
        .bind(type_filter)
        .bind(status_filter)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, ActivityRow>(&format!(
            r#"
            SELECT {SELECT_COLUMNS}
            FROM activity_logs
            WHERE ($1::text IS NULL OR type = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(type_filter)
        .bind(status_filter)
        .bind(page_size as i64)
        .bind((page as i64 - 1) * page_size as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ActivityPage::new(
            into_records(rows)?,
            total.max(0) as u64,
            page,
            page_size,
        ))
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM activity_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
