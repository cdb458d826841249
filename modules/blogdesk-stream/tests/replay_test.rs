use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::extract::Query;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use chrono::{Duration, Utc};
use tokio::net::TcpListener;
use uuid::Uuid;

use blogdesk_common::{
    ActivityLogRecord, ActivityQuery, ActivityStatus, ActivityType, PipelineEvent,
};
use blogdesk_stream::{reconcile, ActivityLogClient, StreamOutcome, Verdict};

type Seen = Arc<Mutex<Vec<HashMap<String, String>>>>;

fn record(status: ActivityStatus, message: &str, minutes_ago: i64) -> ActivityLogRecord {
    ActivityLogRecord {
        id: Uuid::new_v4(),
        activity_type: ActivityType::Pipeline,
        status,
        message: message.to_string(),
        details: serde_json::json!({}),
        created_at: Utc::now() - Duration::minutes(minutes_ago),
    }
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Serves `records` as-is and remembers every query string it was given.
async fn log_server(records: Vec<ActivityLogRecord>) -> (String, Seen) {
    let seen: Seen = Arc::default();
    let captured = seen.clone();
    let app = Router::new().route(
        "/api/activity-logs/recent",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let records = records.clone();
            let captured = captured.clone();
            async move {
                captured.lock().unwrap().push(params);
                Json(records)
            }
        }),
    );
    let addr = spawn(app).await;
    (format!("http://{addr}/api"), seen)
}

#[tokio::test]
async fn list_recent_sends_filters_and_keeps_order() {
    let (base, seen) = log_server(vec![
        record(ActivityStatus::Error, "Pipeline finished with errors in: scrape", 1),
        record(ActivityStatus::Error, "Pipeline finished with errors in: generate", 5),
    ])
    .await;

    let query = ActivityQuery::recent(5)
        .of_type(ActivityType::Pipeline)
        .with_status(ActivityStatus::Error);
    let records = ActivityLogClient::new(&base).list_recent(&query).await.unwrap();

    assert_eq!(records.len(), 2);
    assert!(records[0].created_at > records[1].created_at);
    assert_eq!(records[0].message, "Pipeline finished with errors in: scrape");

    let params = seen.lock().unwrap()[0].clone();
    assert_eq!(params.get("limit").map(String::as_str), Some("5"));
    assert_eq!(params.get("type").map(String::as_str), Some("pipeline"));
    assert_eq!(params.get("status").map(String::as_str), Some("error"));
}

#[tokio::test]
async fn unterminated_run_is_settled_by_newest_record() {
    let (base, seen) = log_server(vec![
        record(ActivityStatus::Success, "Full pipeline completed successfully", 0),
        record(ActivityStatus::Running, "Starting full pipeline", 2),
    ])
    .await;

    let reconciliation = reconcile(
        StreamOutcome::<PipelineEvent>::Unterminated,
        ActivityType::Pipeline,
        &ActivityLogClient::new(&base),
    )
    .await;

    assert_eq!(reconciliation.verdict, Verdict::Succeeded);
    assert_eq!(reconciliation.records.len(), 2);
    assert_eq!(reconciliation.outcome, StreamOutcome::Unterminated);

    let params = seen.lock().unwrap()[0].clone();
    assert_eq!(params.get("limit").map(String::as_str), Some("50"));
    assert_eq!(params.get("type").map(String::as_str), Some("pipeline"));
    assert!(!params.contains_key("status"));
}

#[tokio::test]
async fn failing_log_read_is_unknown_with_no_records() {
    let app = Router::new().route(
        "/api/activity-logs/recent",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "database offline").into_response() }),
    );
    let base = format!("http://{}/api", spawn(app).await);

    let reconciliation = reconcile(
        StreamOutcome::<PipelineEvent>::Unterminated,
        ActivityType::Pipeline,
        &ActivityLogClient::new(&base),
    )
    .await;

    assert_eq!(reconciliation.verdict, Verdict::Unknown);
    assert!(reconciliation.records.is_empty());
}

#[tokio::test]
async fn unreachable_log_is_unknown_with_no_records() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = listener.local_addr().unwrap();
    drop(listener);

    let reconciliation = reconcile(
        StreamOutcome::<PipelineEvent>::Cancelled,
        ActivityType::Evaluate,
        &ActivityLogClient::new(format!("http://{closed}/api")),
    )
    .await;

    assert_eq!(reconciliation.verdict, Verdict::Unknown);
    assert!(reconciliation.records.is_empty());
    assert!(reconciliation.outcome.is_cancelled());
}

#[tokio::test]
async fn in_band_marker_wins_even_when_log_is_unreadable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = listener.local_addr().unwrap();
    drop(listener);

    let reconciliation = reconcile(
        StreamOutcome::Finished(PipelineEvent::done("Pipeline finished")),
        ActivityType::Pipeline,
        &ActivityLogClient::new(format!("http://{closed}/api")),
    )
    .await;

    assert_eq!(reconciliation.verdict, Verdict::Succeeded);
}
