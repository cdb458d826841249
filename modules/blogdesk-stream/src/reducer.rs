//! Folds decoded progress events into per-stage status and a rolling log.

use std::collections::VecDeque;

use blogdesk_common::{
    BatchEvent, BatchEventKind, PipelineEvent, PipelineStep, ProgressEvent, StepStatus,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default number of entries kept by a [`RollingLog`].
pub const DEFAULT_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl StageStatus {
    // Completed and Error share a rank: neither can replace the other.
    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Error => 2,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.rank() == 2
    }
}

impl From<StepStatus> for StageStatus {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Running => Self::Running,
            StepStatus::Completed => Self::Completed,
            StepStatus::Error => Self::Error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineStepState {
    pub step: PipelineStep,
    pub label: &'static str,
    pub status: StageStatus,
    pub message: Option<String>,
}

impl PipelineStepState {
    pub fn pending(step: PipelineStep) -> Self {
        Self {
            step,
            label: stage_label(step),
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// Moves forward only. A running stage may refresh its message.
    fn advance(&mut self, status: StageStatus, message: &str) -> bool {
        let forward = status.rank() > self.status.rank();
        let refresh = status == StageStatus::Running && self.status == StageStatus::Running;
        if forward || refresh {
            self.status = status;
            self.message = Some(message.to_string());
        }
        forward || refresh
    }
}

fn stage_label(step: PipelineStep) -> &'static str {
    match step {
        PipelineStep::Scrape => "Scrape sources",
        PipelineStep::Evaluate => "Evaluate sources",
        PipelineStep::Generate => "Generate articles",
        PipelineStep::Done => "Done",
        PipelineStep::Error => "Error",
    }
}

/// The declared stages of a fresh run, all pending.
pub fn initial_steps() -> Vec<PipelineStepState> {
    PipelineStep::STAGES
        .iter()
        .map(|step| PipelineStepState::pending(*step))
        .collect()
}

/// Pure transition: only the stage named by the event can change.
pub fn reduce(steps: &[PipelineStepState], event: &PipelineEvent) -> Vec<PipelineStepState> {
    steps
        .iter()
        .cloned()
        .map(|mut state| {
            if state.step == event.step {
                state.advance(event.status.into(), &event.message);
            }
            state
        })
        .collect()
}

/// Bounded FIFO; the oldest entry goes once capacity is reached.
#[derive(Debug, Clone)]
pub struct RollingLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> Default for RollingLog<T> {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl<T> RollingLog<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    /// Pipeline step or batch event type.
    pub tag: &'static str,
    pub status: StepStatus,
    pub message: String,
}

impl LogEntry {
    fn now(tag: &'static str, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            tag,
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Continue,
    Finished,
}

/// How a run ended, as reported in-band.
#[derive(Debug, Clone, PartialEq)]
pub enum RunFinish {
    Succeeded(String),
    Failed(String),
}

impl RunFinish {
    fn from_terminal(event: &impl ProgressEvent, message: String) -> Self {
        if event.is_failure() {
            Self::Failed(message)
        } else {
            Self::Succeeded(message)
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Succeeded(m) | Self::Failed(m) => m,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Observer-side view of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineProgress {
    steps: Vec<PipelineStepState>,
    log: RollingLog<LogEntry>,
    finish: Option<RunFinish>,
}

impl Default for PipelineProgress {
    fn default() -> Self {
        Self {
            steps: initial_steps(),
            log: RollingLog::default(),
            finish: None,
        }
    }
}

impl PipelineProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log_capacity(capacity: usize) -> Self {
        Self {
            log: RollingLog::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Start of a new run. The raw log is kept.
    pub fn reset(&mut self) {
        self.steps = initial_steps();
        self.finish = None;
    }

    pub fn apply(&mut self, event: &PipelineEvent) -> Signal {
        self.steps = reduce(&self.steps, event);
        self.log
            .push(LogEntry::now(event.step.as_str(), event.status, event.message.clone()));

        if event.is_terminal() {
            self.finish = Some(RunFinish::from_terminal(event, event.message.clone()));
            Signal::Finished
        } else {
            Signal::Continue
        }
    }

    pub fn steps(&self) -> &[PipelineStepState] {
        &self.steps
    }

    pub fn step(&self, step: PipelineStep) -> Option<&PipelineStepState> {
        self.steps.iter().find(|s| s.step == step)
    }

    pub fn log(&self) -> &RollingLog<LogEntry> {
        &self.log
    }

    pub fn finish(&self) -> Option<&RunFinish> {
        self.finish.as_ref()
    }
}

/// A single item that failed during a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub source_id: String,
    pub source_title: Option<String>,
    pub error: String,
}

/// Observer-side view of a batch evaluation run.
#[derive(Debug, Clone, Default)]
pub struct BatchProgress {
    pub total: Option<u64>,
    pub current: u64,
    pub evaluated: u64,
    pub selected: u64,
    pub failures: Vec<ItemFailure>,
    pub last_message: Option<String>,
    finish: Option<RunFinish>,
    log: RollingLog<LogEntry>,
}

impl BatchProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &BatchEvent) -> Signal {
        if let Some(total) = event.total() {
            self.total = Some(total);
        }
        if let Some(current) = event.current() {
            self.current = current;
        }

        let message = describe(event);
        match event.kind {
            BatchEventKind::Start | BatchEventKind::Progress => {}
            BatchEventKind::Evaluated => {
                self.evaluated = event.evaluated_count().unwrap_or(self.evaluated + 1);
                self.selected = event
                    .selected_count()
                    .unwrap_or(self.selected + u64::from(event.selected() == Some(true)));
            }
            BatchEventKind::Error if event.is_item_error() => {
                self.failures.push(ItemFailure {
                    source_id: event.source_id().unwrap_or_default().to_string(),
                    source_title: event.source_title().map(str::to_string),
                    error: event.error().unwrap_or(&event.message).to_string(),
                });
            }
            BatchEventKind::Error => {}
            BatchEventKind::Complete => {
                if let Some(evaluated) = event.evaluated_count() {
                    self.evaluated = evaluated;
                }
                if let Some(selected) = event.selected_count() {
                    self.selected = selected;
                }
            }
        }

        self.log
            .push(LogEntry::now(event.kind.as_str(), event.status(), message.clone()));
        self.last_message = Some(message.clone());

        if event.is_terminal() {
            self.finish = Some(RunFinish::from_terminal(event, message));
            Signal::Finished
        } else {
            Signal::Continue
        }
    }

    pub fn finish(&self) -> Option<&RunFinish> {
        self.finish.as_ref()
    }

    pub fn log(&self) -> &RollingLog<LogEntry> {
        &self.log
    }
}

/// Log text for a batch frame. `evaluated` and item `error` frames carry no message.
fn describe(event: &BatchEvent) -> String {
    if !event.message.is_empty() {
        return event.message.clone();
    }
    let title = event.source_title().unwrap_or("source");
    match event.kind {
        BatchEventKind::Evaluated => {
            let score = event
                .score()
                .map(|s| format!("{s:.1}"))
                .unwrap_or_else(|| "?".to_string());
            let mark = if event.selected() == Some(true) {
                " (selected)"
            } else {
                ""
            };
            format!("{title}: score {score}{mark}")
        }
        BatchEventKind::Error => {
            format!("{title}: {}", event.error().unwrap_or("evaluation failed"))
        }
        kind => kind.as_str().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(steps: &[PipelineStepState], step: PipelineStep) -> StageStatus {
        steps.iter().find(|s| s.step == step).unwrap().status
    }

    #[test]
    fn stages_start_pending() {
        let steps = initial_steps();
        assert_eq!(steps.len(), 3);
        assert!(steps.iter().all(|s| s.status == StageStatus::Pending));
        assert_eq!(steps[2].label, "Generate articles");
    }

    #[test]
    fn completed_never_regresses() {
        let mut steps = initial_steps();
        for event in [
            PipelineEvent::running(PipelineStep::Scrape, "Starting scraping..."),
            PipelineEvent::completed(PipelineStep::Scrape, "Scraped 12 sources"),
            PipelineEvent::running(PipelineStep::Scrape, "late"),
            PipelineEvent::failed(PipelineStep::Scrape, "late failure"),
        ] {
            steps = reduce(&steps, &event);
        }
        let scrape = &steps[0];
        assert_eq!(scrape.status, StageStatus::Completed);
        assert_eq!(scrape.message.as_deref(), Some("Scraped 12 sources"));
    }

    #[test]
    fn running_refreshes_message() {
        let steps = reduce(
            &initial_steps(),
            &PipelineEvent::running(PipelineStep::Evaluate, "Evaluating 1/3"),
        );
        let steps = reduce(
            &steps,
            &PipelineEvent::running(PipelineStep::Evaluate, "Evaluating 2/3"),
        );
        assert_eq!(steps[1].message.as_deref(), Some("Evaluating 2/3"));
    }

    #[test]
    fn error_only_touches_named_stage() {
        let steps = reduce(
            &initial_steps(),
            &PipelineEvent::completed(PipelineStep::Scrape, "ok"),
        );
        let steps = reduce(
            &steps,
            &PipelineEvent::failed(PipelineStep::Evaluate, "Evaluation failed: quota"),
        );
        assert_eq!(status_of(&steps, PipelineStep::Scrape), StageStatus::Completed);
        assert_eq!(status_of(&steps, PipelineStep::Evaluate), StageStatus::Error);
        assert_eq!(status_of(&steps, PipelineStep::Generate), StageStatus::Pending);
    }

    #[test]
    fn terminal_markers_leave_stages_alone() {
        let before = reduce(
            &initial_steps(),
            &PipelineEvent::running(PipelineStep::Generate, "Generating..."),
        );
        let after = reduce(&before, &PipelineEvent::error("Pipeline crashed"));
        assert_eq!(before, after);
    }

    #[test]
    fn rolling_log_evicts_oldest() {
        let mut log = RollingLog::with_capacity(3);
        for i in 0..5 {
            log.push(i);
        }
        assert_eq!(log.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(log.latest(), Some(&4));
    }

    #[test]
    fn progress_reset_keeps_log() {
        let mut progress = PipelineProgress::new();
        progress.apply(&PipelineEvent::completed(PipelineStep::Scrape, "ok"));
        assert_eq!(
            progress.apply(&PipelineEvent::done("Pipeline finished")),
            Signal::Finished
        );
        assert!(progress.finish().is_some());

        progress.reset();
        assert!(progress.finish().is_none());
        assert_eq!(
            progress.step(PipelineStep::Scrape).unwrap().status,
            StageStatus::Pending
        );
        assert_eq!(progress.log().len(), 2);
    }

    #[test]
    fn log_is_capped_at_fifty() {
        let mut progress = PipelineProgress::new();
        for i in 0..80 {
            progress.apply(&PipelineEvent::running(PipelineStep::Evaluate, format!("tick {i}")));
        }
        assert_eq!(progress.log().len(), 50);
        assert_eq!(progress.log().iter().next().unwrap().message, "tick 30");
    }

    #[test]
    fn batch_counts_and_item_failures() {
        let mut batch = BatchProgress::new();
        let events = [
            BatchEvent::new(BatchEventKind::Start, "Starting evaluation of 3 sources").with("total", 3),
            BatchEvent::new(BatchEventKind::Progress, "Evaluating 1/3: A...")
                .with("current", 1)
                .with("total", 3),
            BatchEvent::new(BatchEventKind::Evaluated, "")
                .with("current", 1)
                .with("source_id", "a")
                .with("source_title", "A")
                .with("score", 8.0)
                .with("selected", true)
                .with("evaluated_count", 1)
                .with("selected_count", 1),
            BatchEvent::new(BatchEventKind::Error, "")
                .with("current", 2)
                .with("source_id", "b")
                .with("source_title", "B")
                .with("error", "rate limited"),
        ];
        for event in &events {
            assert_eq!(batch.apply(event), Signal::Continue);
        }
        assert_eq!(batch.total, Some(3));
        assert_eq!(batch.current, 2);
        assert_eq!(batch.evaluated, 1);
        assert_eq!(batch.selected, 1);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].error, "rate limited");
        assert_eq!(batch.last_message.as_deref(), Some("B: rate limited"));

        let complete = BatchEvent::new(BatchEventKind::Complete, "Evaluation complete. 2 evaluated, 1 selected.")
            .with("evaluated", 2)
            .with("selected", 1)
            .with("total", 3);
        assert_eq!(batch.apply(&complete), Signal::Finished);
        assert_eq!(batch.evaluated, 2);
        assert!(!batch.finish().unwrap().is_failure());
    }

    #[test]
    fn batch_run_error_finishes_as_failure() {
        let mut batch = BatchProgress::new();
        let signal = batch.apply(&BatchEvent::new(
            BatchEventKind::Error,
            "Failed to load pending sources",
        ));
        assert_eq!(signal, Signal::Finished);
        assert!(batch.finish().unwrap().is_failure());
        assert!(batch.failures.is_empty());
    }
}
