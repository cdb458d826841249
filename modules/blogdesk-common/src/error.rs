use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlogdeskError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },

    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
