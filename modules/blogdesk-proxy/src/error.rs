use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("Backend URL points at this proxy")]
    SelfReference,

    #[error("Failed to reach backend")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid backend URL: {0}")]
    InvalidBackendUrl(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SelfReference => StatusCode::SERVICE_UNAVAILABLE,
            Self::Transport(_) => StatusCode::BAD_GATEWAY,
            Self::InvalidBackendUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let detail = self.to_string();
        (self.status(), Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
