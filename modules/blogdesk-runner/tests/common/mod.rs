#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};

use blogdesk_activity::MemoryActivityLog;
use blogdesk_runner::{
    PendingSource, RunnerError, RunnerSettings, SourceEvaluation, StageReport, TaskBackend,
    TaskRunner,
};

/// Scripted stage work for tests.
#[derive(Default)]
pub struct FakeBackend {
    pub failing_stages: Vec<&'static str>,
    pub pending: Vec<PendingSource>,
    pub pending_error: Option<String>,
    /// Score per source id; a missing id fails that item.
    pub scores: HashMap<String, f64>,
    /// When set, scrape waits for a notification.
    pub scrape_gate: Option<Arc<Notify>>,
}

impl FakeBackend {
    fn stage(&self, name: &'static str, report: StageReport) -> Result<StageReport, RunnerError> {
        if self.failing_stages.contains(&name) {
            Err(RunnerError::task(format!("{name} backend unavailable")))
        } else {
            Ok(report)
        }
    }

    pub fn with_sources(mut self, sources: &[(&str, &str, Option<f64>)]) -> Self {
        for (id, title, score) in sources {
            self.pending.push(PendingSource {
                id: id.to_string(),
                title: title.to_string(),
                url: None,
            });
            if let Some(score) = score {
                self.scores.insert(id.to_string(), *score);
            }
        }
        self
    }
}

#[async_trait]
impl TaskBackend for FakeBackend {
    async fn scrape(&self) -> Result<StageReport, RunnerError> {
        if let Some(gate) = &self.scrape_gate {
            gate.notified().await;
        }
        self.stage(
            "scrape",
            StageReport::new("Scraped 12 sources")
                .with("rss_scraped", 9)
                .with("arxiv_scraped", 3),
        )
    }

    async fn evaluate(&self) -> Result<StageReport, RunnerError> {
        self.stage(
            "evaluate",
            StageReport::new("Evaluated 12 sources, 3 selected")
                .with("evaluated", 12)
                .with("auto_selected", 3),
        )
    }

    async fn generate(&self) -> Result<StageReport, RunnerError> {
        self.stage(
            "generate",
            StageReport::new("Generated 3 articles").with("generated", 3),
        )
    }

    async fn pending_sources(&self) -> Result<Vec<PendingSource>, RunnerError> {
        match &self.pending_error {
            Some(e) => Err(RunnerError::task(e.clone())),
            None => Ok(self.pending.clone()),
        }
    }

    async fn evaluate_source(&self, source: &PendingSource) -> Result<SourceEvaluation, RunnerError> {
        match self.scores.get(&source.id) {
            Some(score) => Ok(SourceEvaluation {
                score: *score,
                reason: None,
            }),
            None => Err(RunnerError::task("rate limited")),
        }
    }
}

pub fn fast_settings() -> RunnerSettings {
    RunnerSettings {
        evaluate_delay: Duration::ZERO,
        auto_select_min_score: 7.0,
        observer_timeout: Duration::from_secs(5),
    }
}

pub fn runner_with(backend: FakeBackend) -> (TaskRunner, Arc<MemoryActivityLog>) {
    let log = Arc::new(MemoryActivityLog::new());
    let runner = TaskRunner::new(Arc::new(backend), log.clone(), fast_settings());
    (runner, log)
}

pub async fn drain<E>(mut rx: mpsc::Receiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}
