//! Activity log reads used to reconcile after a stream ends.

use blogdesk_common::{
    ActivityLogRecord, ActivityQuery, ActivityStatus, ActivityType, DEFAULT_RECENT_LIMIT,
};
use tracing::{info, warn};

use crate::client::StreamOutcome;
use crate::error::{check_status, StreamError};

#[derive(Clone)]
pub struct ActivityLogClient {
    http: reqwest::Client,
    base_url: String,
}

impl ActivityLogClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Most recent records first.
    pub async fn list_recent(
        &self,
        query: &ActivityQuery,
    ) -> Result<Vec<ActivityLogRecord>, StreamError> {
        let url = format!("{}/activity-logs/recent", self.base_url);
        let response = self.http.get(&url).query(query).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Succeeded,
    Failed,
    StillRunning,
    Unknown,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::StillRunning => "still running",
            Self::Unknown => "unknown",
        }
    }
}

impl From<ActivityStatus> for Verdict {
    fn from(status: ActivityStatus) -> Self {
        match status {
            ActivityStatus::Success => Self::Succeeded,
            ActivityStatus::Error => Self::Failed,
            ActivityStatus::Running => Self::StillRunning,
        }
    }
}

/// In-band terminal markers decide when present; otherwise the newest
/// record of `activity_type` does.
pub fn verdict_for<E>(
    outcome: &StreamOutcome<E>,
    activity_type: ActivityType,
    records: &[ActivityLogRecord],
) -> Verdict {
    match outcome {
        StreamOutcome::Finished(_) => Verdict::Succeeded,
        StreamOutcome::Failed(_) => Verdict::Failed,
        StreamOutcome::Unterminated | StreamOutcome::Cancelled => records
            .iter()
            .find(|r| r.activity_type == activity_type)
            .map(|r| Verdict::from(r.status))
            .unwrap_or(Verdict::Unknown),
    }
}

#[derive(Debug, Clone)]
pub struct Reconciliation<E> {
    pub outcome: StreamOutcome<E>,
    pub verdict: Verdict,
    pub records: Vec<ActivityLogRecord>,
}

/// Pull the latest records for `activity_type` and settle the run's verdict.
///
/// A failed log read degrades to an empty record list.
pub async fn reconcile<E>(
    outcome: StreamOutcome<E>,
    activity_type: ActivityType,
    client: &ActivityLogClient,
) -> Reconciliation<E> {
    let query = ActivityQuery::recent(DEFAULT_RECENT_LIMIT).of_type(activity_type);
    let records = match client.list_recent(&query).await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, activity_type = %activity_type, "Could not read activity log");
            Vec::new()
        }
    };

    let verdict = verdict_for(&outcome, activity_type, &records);
    info!(
        outcome = outcome.label(),
        verdict = verdict.as_str(),
        records = records.len(),
        "Reconciled with activity log"
    );

    Reconciliation {
        outcome,
        verdict,
        records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blogdesk_common::PipelineEvent;
    use chrono::Utc;
    use uuid::Uuid;

    fn record(activity_type: ActivityType, status: ActivityStatus) -> ActivityLogRecord {
        ActivityLogRecord {
            id: Uuid::new_v4(),
            activity_type,
            status,
            message: String::new(),
            details: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn terminal_event_wins_over_log() {
        let records = vec![record(ActivityType::Pipeline, ActivityStatus::Error)];
        let outcome = StreamOutcome::Finished(PipelineEvent::done("Pipeline finished"));
        assert_eq!(
            verdict_for(&outcome, ActivityType::Pipeline, &records),
            Verdict::Succeeded
        );
    }

    #[test]
    fn unterminated_reads_newest_matching_record() {
        let records = vec![
            record(ActivityType::Scrape, ActivityStatus::Success),
            record(ActivityType::Pipeline, ActivityStatus::Running),
            record(ActivityType::Pipeline, ActivityStatus::Success),
        ];
        let outcome: StreamOutcome<PipelineEvent> = StreamOutcome::Unterminated;
        assert_eq!(
            verdict_for(&outcome, ActivityType::Pipeline, &records),
            Verdict::StillRunning
        );
    }

    #[test]
    fn no_records_is_unknown() {
        let outcome: StreamOutcome<PipelineEvent> = StreamOutcome::Cancelled;
        assert_eq!(
            verdict_for(&outcome, ActivityType::Evaluate, &[]),
            Verdict::Unknown
        );
    }
}
