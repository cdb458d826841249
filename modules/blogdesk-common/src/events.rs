//! Wire protocol for long-running task progress.
//!
//! Every frame on a progress stream carries one of two event families:
//! [`PipelineEvent`] for scrape → evaluate → generate runs, and
//! [`BatchEvent`] for bulk evaluation of pending sources. Both implement
//! [`ProgressEvent`] so the encoder, the decoder and the client can stay
//! generic over the family.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::activity::ActivityType;
use crate::error::BlogdeskError;

/// Disposition of a step at the moment an event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Completed,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common surface of every progress event family.
pub trait ProgressEvent: Serialize + DeserializeOwned + Clone + Send + 'static {
    /// Human-readable text, always present (possibly empty).
    fn message(&self) -> &str;

    fn status(&self) -> StepStatus;

    /// True for the marker that ends a stream.
    fn is_terminal(&self) -> bool;

    /// Terminal and reporting a task-level failure.
    fn is_failure(&self) -> bool {
        self.is_terminal() && self.status() == StepStatus::Error
    }
}

// ---------------------------------------------------------------------------
// Pipeline runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStep {
    Scrape,
    Evaluate,
    Generate,
    Done,
    Error,
}

impl PipelineStep {
    /// Declared stages, in run order.
    pub const STAGES: [PipelineStep; 3] = [Self::Scrape, Self::Evaluate, Self::Generate];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Evaluate => "evaluate",
            Self::Generate => "generate",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn is_stage(&self) -> bool {
        !self.is_terminal()
    }

    /// The triggerable stage behind a declared step.
    pub fn task_stage(&self) -> Option<TaskStage> {
        match self {
            Self::Scrape => Some(TaskStage::Scrape),
            Self::Evaluate => Some(TaskStage::Evaluate),
            Self::Generate => Some(TaskStage::Generate),
            Self::Done | Self::Error => None,
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame of a pipeline progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub step: PipelineStep,
    pub status: StepStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl PipelineEvent {
    pub fn new(step: PipelineStep, status: StepStatus, message: impl Into<String>) -> Self {
        Self {
            step,
            status,
            message: message.into(),
            data: None,
        }
    }

    pub fn running(step: PipelineStep, message: impl Into<String>) -> Self {
        Self::new(step, StepStatus::Running, message)
    }

    pub fn completed(step: PipelineStep, message: impl Into<String>) -> Self {
        Self::new(step, StepStatus::Completed, message)
    }

    pub fn failed(step: PipelineStep, message: impl Into<String>) -> Self {
        Self::new(step, StepStatus::Error, message)
    }

    /// Terminal success marker.
    pub fn done(message: impl Into<String>) -> Self {
        Self::new(PipelineStep::Done, StepStatus::Completed, message)
    }

    /// Terminal run-level failure marker.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(PipelineStep::Error, StepStatus::Error, message)
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }
}

impl ProgressEvent for PipelineEvent {
    fn message(&self) -> &str {
        &self.message
    }

    fn status(&self) -> StepStatus {
        self.status
    }

    fn is_terminal(&self) -> bool {
        self.step.is_terminal()
    }
}

// ---------------------------------------------------------------------------
// Batch evaluation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchEventKind {
    Start,
    Progress,
    Evaluated,
    Error,
    Complete,
}

impl BatchEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Progress => "progress",
            Self::Evaluated => "evaluated",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }
}

impl fmt::Display for BatchEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One frame of a batch evaluation stream.
///
/// Everything besides `type` and `message` lives in an open map; the typed
/// accessors narrow it for the handlers that know which keys to expect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEvent {
    #[serde(rename = "type")]
    pub kind: BatchEventKind,
    #[serde(default)]
    pub message: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl BatchEvent {
    pub fn new(kind: BatchEventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            fields: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    fn u64_field(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn current(&self) -> Option<u64> {
        self.u64_field("current")
    }

    pub fn total(&self) -> Option<u64> {
        self.u64_field("total")
    }

    pub fn source_id(&self) -> Option<&str> {
        self.str_field("source_id")
    }

    pub fn source_title(&self) -> Option<&str> {
        self.str_field("source_title")
    }

    pub fn score(&self) -> Option<f64> {
        self.fields.get("score").and_then(Value::as_f64)
    }

    pub fn selected(&self) -> Option<bool> {
        self.fields.get("selected").and_then(Value::as_bool)
    }

    pub fn error(&self) -> Option<&str> {
        self.str_field("error")
    }

    /// Running count carried by `evaluated` frames, or the final count on `complete`.
    pub fn evaluated_count(&self) -> Option<u64> {
        self.u64_field("evaluated_count")
            .or_else(|| self.u64_field("evaluated"))
    }

    pub fn selected_count(&self) -> Option<u64> {
        match self.fields.get("selected_count") {
            Some(v) => v.as_u64(),
            // On `complete`, `selected` is a count rather than a flag.
            None if self.kind == BatchEventKind::Complete => self.u64_field("selected"),
            None => None,
        }
    }

    /// An `error` frame naming a single failed item. The run continues after it.
    pub fn is_item_error(&self) -> bool {
        self.kind == BatchEventKind::Error && self.fields.contains_key("source_id")
    }
}

impl ProgressEvent for BatchEvent {
    fn message(&self) -> &str {
        &self.message
    }

    fn status(&self) -> StepStatus {
        match self.kind {
            BatchEventKind::Start | BatchEventKind::Progress => StepStatus::Running,
            BatchEventKind::Evaluated | BatchEventKind::Complete => StepStatus::Completed,
            BatchEventKind::Error => StepStatus::Error,
        }
    }

    fn is_terminal(&self) -> bool {
        match self.kind {
            BatchEventKind::Complete => true,
            BatchEventKind::Error => !self.is_item_error(),
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Trigger targets
// ---------------------------------------------------------------------------

/// Work that can be triggered on the task runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStage {
    Scrape,
    Evaluate,
    Generate,
    Pipeline,
}

impl TaskStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scrape => "scrape",
            Self::Evaluate => "evaluate",
            Self::Generate => "generate",
            Self::Pipeline => "pipeline",
        }
    }

    /// Activity log type that records this work.
    pub fn activity_type(&self) -> ActivityType {
        match self {
            Self::Scrape => ActivityType::Scrape,
            Self::Evaluate => ActivityType::Evaluate,
            Self::Generate => ActivityType::Generate,
            Self::Pipeline => ActivityType::Pipeline,
        }
    }
}

impl fmt::Display for TaskStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStage {
    type Err = BlogdeskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scrape" => Ok(Self::Scrape),
            "evaluate" => Ok(Self::Evaluate),
            "generate" => Ok(Self::Generate),
            "pipeline" => Ok(Self::Pipeline),
            other => Err(BlogdeskError::UnknownStage(other.to_string())),
        }
    }
}

/// Synchronous result of a non-streaming trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSummary {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}
