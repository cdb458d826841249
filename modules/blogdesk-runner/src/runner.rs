use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use blogdesk_activity::ActivityLogStore;
use blogdesk_common::{
    ActivityType, BatchEvent, BatchEventKind, Config, NewActivity, PipelineEvent, PipelineStep,
    ProgressEvent, TaskStage, TriggerSummary,
};

use crate::backend::{PendingSource, StageReport, TaskBackend};
use crate::error::RunnerError;

/// Frames buffered between a run and its observer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long a full channel may block a run before its observer is dropped.
const OBSERVER_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest source title carried on a batch frame.
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Pause between batch evaluations, to stay under provider rate limits.
    pub evaluate_delay: Duration,
    /// Sources scoring at or above this are counted as selected.
    pub auto_select_min_score: f64,
    /// A run waits at most this long on a full channel, then detaches the observer.
    pub observer_timeout: Duration,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            evaluate_delay: Duration::from_secs(4),
            auto_select_min_score: 7.0,
            observer_timeout: OBSERVER_STALL_TIMEOUT,
        }
    }
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            evaluate_delay: Duration::from_secs(config.evaluate_delay_secs),
            auto_select_min_score: config.auto_generate_min_score,
            observer_timeout: OBSERVER_STALL_TIMEOUT,
        }
    }
}

/// Runs stages and batch evaluations, one observer per run.
///
/// Every spawned run is decoupled from its observer: when the receiver is
/// dropped the run keeps going and still writes its activity records.
#[derive(Clone)]
pub struct TaskRunner {
    backend: Arc<dyn TaskBackend>,
    activity: Arc<dyn ActivityLogStore>,
    settings: RunnerSettings,
    pipeline_lock: Arc<Mutex<()>>,
}

impl TaskRunner {
    pub fn new(
        backend: Arc<dyn TaskBackend>,
        activity: Arc<dyn ActivityLogStore>,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            backend,
            activity,
            settings,
            pipeline_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn activity(&self) -> &Arc<dyn ActivityLogStore> {
        &self.activity
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Start a full pipeline run and return its event feed.
    ///
    /// A run already in progress makes this one a single error frame.
    pub fn spawn_pipeline(&self) -> mpsc::Receiver<PipelineEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let guard = match self.pipeline_lock.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                warn!("Pipeline already running, rejecting new run");
                // Fresh channel, so there is room for one frame.
                let _ = tx.try_send(PipelineEvent::error(RunnerError::PipelineBusy.to_string()));
                return rx;
            }
        };

        let runner = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let mut out = Emitter::new(tx, runner.settings.observer_timeout);
            runner.run_pipeline(&mut out).await;
        });
        rx
    }

    /// Start evaluating every pending source and return the event feed.
    pub fn spawn_pending_evaluation(&self) -> mpsc::Receiver<BatchEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let runner = self.clone();
        tokio::spawn(async move {
            let mut out = Emitter::new(tx, runner.settings.observer_timeout);
            runner.run_pending_evaluation(&mut out).await;
        });
        rx
    }

    /// Run one stage, or the whole pipeline, without streaming.
    pub async fn trigger(&self, stage: TaskStage) -> Result<TriggerSummary, RunnerError> {
        if stage == TaskStage::Pipeline {
            let _guard = self
                .pipeline_lock
                .try_lock()
                .map_err(|_| RunnerError::PipelineBusy)?;
            let mut out = Emitter::collecting();
            let data = self.run_pipeline(&mut out).await;
            let message = out
                .last_message()
                .unwrap_or("Pipeline finished")
                .to_string();
            return Ok(TriggerSummary {
                message,
                data: Some(data),
            });
        }

        let report = self.run_stage(stage).await?;
        Ok(TriggerSummary {
            message: report.message,
            data: Some(report.data),
        })
    }

    /// Returns the per-stage summaries.
    async fn run_pipeline(&self, out: &mut Emitter<PipelineEvent>) -> Map<String, Value> {
        info!("Starting full pipeline run");
        self.record(NewActivity::running(
            ActivityType::Pipeline,
            "Starting full pipeline (scrape → evaluate → generate)",
        ))
        .await;

        let mut summary = Map::new();
        let mut failed: Vec<&'static str> = Vec::new();

        for step in PipelineStep::STAGES {
            let Some(stage) = step.task_stage() else {
                continue;
            };
            out.emit(PipelineEvent::running(step, running_message(stage)))
                .await;

            match self.run_stage(stage).await {
                Ok(report) => {
                    summary.insert(stage.as_str().to_string(), Value::Object(report.data.clone()));
                    out.emit(PipelineEvent::completed(step, report.message).with_data(report.data))
                        .await;
                }
                Err(e) => {
                    // Later stages still run.
                    failed.push(stage.as_str());
                    out.emit(PipelineEvent::failed(step, format!("{} failed: {e}", stage_title(stage))))
                        .await;
                }
            }
        }

        if failed.is_empty() {
            self.record(
                NewActivity::success(ActivityType::Pipeline, "Full pipeline completed successfully")
                    .with_details(Value::Object(summary.clone())),
            )
            .await;
        } else {
            self.record(
                NewActivity::error(
                    ActivityType::Pipeline,
                    format!("Pipeline finished with errors in: {}", failed.join(", ")),
                )
                .with_details(json!({ "failed": failed })),
            )
            .await;
        }

        info!(failed = failed.len(), "Full pipeline run finished");
        out.emit(PipelineEvent::done("Pipeline finished")).await;
        summary
    }

    /// One stage with its running and success/error activity records.
    async fn run_stage(&self, stage: TaskStage) -> Result<StageReport, RunnerError> {
        let work = match stage {
            TaskStage::Scrape => self.backend.scrape(),
            TaskStage::Evaluate => self.backend.evaluate(),
            TaskStage::Generate => self.backend.generate(),
            TaskStage::Pipeline => return Err(RunnerError::task("pipeline is not a single stage")),
        };

        let activity_type = stage.activity_type();
        self.record(NewActivity::running(activity_type, running_message(stage)))
            .await;
        let result = work.await;

        match &result {
            Ok(report) => {
                info!(stage = %stage, message = %report.message, "Stage completed");
                self.record(
                    NewActivity::success(activity_type, report.message.clone())
                        .with_details(Value::Object(report.data.clone())),
                )
                .await;
            }
            Err(e) => {
                error!(stage = %stage, error = %e, "Stage failed");
                self.record(NewActivity::error(
                    activity_type,
                    format!("{} failed: {e}", stage_title(stage)),
                ))
                .await;
            }
        }
        result
    }

    async fn run_pending_evaluation(&self, out: &mut Emitter<BatchEvent>) {
        let sources = match self.backend.pending_sources().await {
            Ok(sources) => sources,
            Err(e) => {
                error!(error = %e, "Failed to load pending sources");
                let message = format!("Failed to load pending sources: {e}");
                self.record(NewActivity::error(ActivityType::Evaluate, message.clone()))
                    .await;
                out.emit(BatchEvent::new(BatchEventKind::Error, message)).await;
                return;
            }
        };

        if sources.is_empty() {
            out.emit(
                BatchEvent::new(BatchEventKind::Complete, "No pending sources to evaluate")
                    .with("evaluated", 0)
                    .with("total", 0)
                    .with("selected", 0),
            )
            .await;
            return;
        }

        let total = sources.len();
        info!(total, "Evaluating pending sources");
        self.record(NewActivity::running(
            ActivityType::Evaluate,
            format!("Evaluating {total} pending sources"),
        ))
        .await;
        out.emit(
            BatchEvent::new(
                BatchEventKind::Start,
                format!("Starting evaluation of {total} sources"),
            )
            .with("total", total),
        )
        .await;

        let mut evaluated = 0usize;
        let mut selected = 0usize;
        let mut errors = 0usize;

        for (i, source) in sources.iter().enumerate() {
            let current = i + 1;
            let title = short_title(source);
            out.emit(
                BatchEvent::new(
                    BatchEventKind::Progress,
                    format!("Evaluating {current}/{total}: {title}..."),
                )
                .with("current", current)
                .with("total", total)
                .with("source_title", title.clone()),
            )
            .await;

            match self.backend.evaluate_source(source).await {
                Ok(evaluation) => {
                    let is_selected = evaluation.score >= self.settings.auto_select_min_score;
                    evaluated += 1;
                    if is_selected {
                        selected += 1;
                    }
                    out.emit(
                        BatchEvent::new(BatchEventKind::Evaluated, "")
                            .with("current", current)
                            .with("total", total)
                            .with("source_id", source.id.clone())
                            .with("source_title", title)
                            .with("score", evaluation.score)
                            .with("selected", is_selected)
                            .with("evaluated_count", evaluated)
                            .with("selected_count", selected),
                    )
                    .await;
                }
                Err(e) => {
                    warn!(source_id = %source.id, error = %e, "Source evaluation failed");
                    errors += 1;
                    out.emit(
                        BatchEvent::new(BatchEventKind::Error, "")
                            .with("current", current)
                            .with("total", total)
                            .with("source_id", source.id.clone())
                            .with("source_title", title)
                            .with("error", e.to_string()),
                    )
                    .await;
                }
            }

            if current < total && !self.settings.evaluate_delay.is_zero() {
                tokio::time::sleep(self.settings.evaluate_delay).await;
            }
        }

        let message = format!("Evaluation complete. {evaluated} evaluated, {selected} selected.");
        info!(evaluated, selected, errors, "Pending source evaluation finished");
        self.record(
            NewActivity::success(ActivityType::Evaluate, message.clone()).with_details(json!({
                "evaluated": evaluated,
                "selected": selected,
                "errors": errors,
                "total": total,
            })),
        )
        .await;
        out.emit(
            BatchEvent::new(BatchEventKind::Complete, message)
                .with("evaluated", evaluated)
                .with("total", total)
                .with("selected", selected)
                .with("errors", errors),
        )
        .await;
    }

    /// Activity writes never abort a run.
    async fn record(&self, activity: NewActivity) {
        if let Err(e) = self.activity.append(activity).await {
            warn!(error = %e, "Failed to write activity record");
        }
    }
}

/// Delivers a run's events to its observer, if it still has one.
///
/// An observer that stops reading is dropped after `stall_timeout`, so a run
/// holding the pipeline lock never waits on it indefinitely.
struct Emitter<E> {
    tx: Option<mpsc::Sender<E>>,
    stall_timeout: Duration,
    last_message: Option<String>,
}

impl<E: ProgressEvent> Emitter<E> {
    fn new(tx: mpsc::Sender<E>, stall_timeout: Duration) -> Self {
        Self {
            tx: Some(tx),
            stall_timeout,
            last_message: None,
        }
    }

    /// No observer at all; only the last message is kept.
    fn collecting() -> Self {
        Self {
            tx: None,
            stall_timeout: OBSERVER_STALL_TIMEOUT,
            last_message: None,
        }
    }

    async fn emit(&mut self, event: E) {
        self.last_message = Some(event.message().to_string());
        let Some(tx) = &self.tx else {
            return;
        };
        match tokio::time::timeout(self.stall_timeout, tx.send(event)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                info!("Observer detached, run continues");
                self.tx = None;
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.stall_timeout.as_millis() as u64,
                    "Observer stopped reading, detaching it"
                );
                self.tx = None;
            }
        }
    }

    fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }
}

fn stage_title(stage: TaskStage) -> &'static str {
    match stage {
        TaskStage::Scrape => "Scrape",
        TaskStage::Evaluate => "Evaluation",
        TaskStage::Generate => "Generation",
        TaskStage::Pipeline => "Pipeline",
    }
}

fn running_message(stage: TaskStage) -> &'static str {
    match stage {
        TaskStage::Scrape => "Scraping sources from RSS feeds and arXiv...",
        TaskStage::Evaluate => "Evaluating sources with AI...",
        TaskStage::Generate => "Generating articles from selected sources...",
        TaskStage::Pipeline => "Starting full pipeline...",
    }
}

fn short_title(source: &PendingSource) -> String {
    source.title.chars().take(TITLE_MAX_CHARS).collect()
}
