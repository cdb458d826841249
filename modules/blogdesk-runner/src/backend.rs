use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RunnerError;

/// Summary of one finished stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl StageReport {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }
}

/// A source waiting for evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSource {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEvaluation {
    pub score: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// The actual stage work: scraping feeds, scoring sources, writing articles.
#[async_trait]
pub trait TaskBackend: Send + Sync {
    async fn scrape(&self) -> Result<StageReport, RunnerError>;

    async fn evaluate(&self) -> Result<StageReport, RunnerError>;

    async fn generate(&self) -> Result<StageReport, RunnerError>;

    async fn pending_sources(&self) -> Result<Vec<PendingSource>, RunnerError>;

    async fn evaluate_source(&self, source: &PendingSource) -> Result<SourceEvaluation, RunnerError>;
}
