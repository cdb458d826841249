//! Runner behind the proxy, observed through the stream client.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use blogdesk_common::{ActivityStatus, ActivityType, BatchEvent, PipelineEvent, PipelineStep};
use blogdesk_proxy::{proxy_router, ProxyConfig, ProxyState};
use blogdesk_runner::{runner_router_at, RunnerState};
use blogdesk_stream::{
    reconcile, ActivityLogClient, BatchProgress, PipelineProgress, RunFinish, StageStatus,
    StreamClient, StreamOutcome, StreamRequest, Verdict,
};

use common::{runner_with, FakeBackend};

const KEY: &str = "runner-admin-key";

async fn spawn(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Runner under `/api` with a required key, and a proxy in front of it.
/// Returns the base URL a caller uses.
async fn deployment(backend: FakeBackend, proxy_key: Option<&str>) -> String {
    let (runner, _log) = runner_with(backend);
    let state = Arc::new(RunnerState {
        runner,
        api_key: Some(KEY.to_string()),
    });
    let runner_addr = spawn(runner_router_at("/api", state)).await;

    let mut config = ProxyConfig::new(format!("http://{runner_addr}"));
    config.api_key = proxy_key.map(str::to_string);
    let proxy_addr = spawn(proxy_router(ProxyState::new(config).unwrap())).await;

    format!("http://{proxy_addr}/api")
}

#[tokio::test]
async fn pipeline_flows_from_runner_to_reducer() {
    let base = deployment(FakeBackend::default(), Some(KEY)).await;

    let stream = StreamClient::new(&base)
        .open::<PipelineEvent>(StreamRequest::post("tasks/pipeline/stream"))
        .await
        .unwrap();
    let mut progress = PipelineProgress::new();
    let outcome = stream.watch(|event| {
        progress.apply(event);
    })
    .await
    .unwrap();

    assert!(matches!(outcome, StreamOutcome::Finished(_)));
    for step in PipelineStep::STAGES {
        assert_eq!(progress.step(step).unwrap().status, StageStatus::Completed);
    }
    assert_eq!(
        progress.finish(),
        Some(&RunFinish::Succeeded("Pipeline finished".to_string()))
    );

    let reconciliation = reconcile(outcome, ActivityType::Pipeline, &ActivityLogClient::new(&base)).await;
    assert_eq!(reconciliation.verdict, Verdict::Succeeded);
    assert_eq!(reconciliation.records.len(), 2);
    assert_eq!(reconciliation.records[0].status, ActivityStatus::Success);
    assert_eq!(reconciliation.records[1].status, ActivityStatus::Running);
}

#[tokio::test]
async fn batch_evaluation_flows_through_proxy() {
    let backend = FakeBackend::default().with_sources(&[
        ("a", "Attention Is All You Need", Some(9.1)),
        ("b", "Flaky source", None),
        ("c", "Minor update", Some(4.0)),
    ]);
    let base = deployment(backend, Some(KEY)).await;

    let stream = StreamClient::new(&base)
        .open::<BatchEvent>(StreamRequest::get("sources/evaluate/pending/stream"))
        .await
        .unwrap();
    let mut progress = BatchProgress::new();
    let outcome = stream.watch(|event| {
        progress.apply(event);
    })
    .await
    .unwrap();

    assert!(matches!(outcome, StreamOutcome::Finished(_)));
    assert_eq!(progress.total, Some(3));
    assert_eq!(progress.evaluated, 2);
    assert_eq!(progress.selected, 1);
    assert_eq!(progress.failures.len(), 1);
    assert_eq!(progress.failures[0].source_id, "b");

    let reconciliation = reconcile(outcome, ActivityType::Evaluate, &ActivityLogClient::new(&base)).await;
    assert_eq!(reconciliation.verdict, Verdict::Succeeded);
    assert_eq!(reconciliation.records[0].status, ActivityStatus::Success);
}

#[tokio::test]
async fn proxy_without_credential_is_unauthorized() {
    let base = deployment(FakeBackend::default(), None).await;

    let err = StreamClient::new(&base)
        .open::<PipelineEvent>(StreamRequest::get("tasks/pipeline/stream"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}
