use blogdesk_activity::ActivityLogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunnerError {
    /// A stage or item failed inside the backend.
    #[error("{0}")]
    Task(String),

    #[error("Pipeline already running")]
    PipelineBusy,

    #[error("Activity log error: {0}")]
    Activity(#[from] ActivityLogError),
}

impl RunnerError {
    pub fn task(message: impl Into<String>) -> Self {
        Self::Task(message.into())
    }
}
