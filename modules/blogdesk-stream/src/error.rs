use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Authentication required (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("Request failed (HTTP {status}): {body}")]
    Status { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Cancelled before the stream opened")]
    Cancelled,
}

impl StreamError {
    /// Intentional detachment, never shown as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

impl From<reqwest::Error> for StreamError {
    fn from(err: reqwest::Error) -> Self {
        StreamError::Transport(err.to_string())
    }
}

/// Map a non-2xx response to the matching error; pass 2xx through.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, StreamError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StreamError::Unauthorized {
            status: status.as_u16(),
        });
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StreamError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response)
}
