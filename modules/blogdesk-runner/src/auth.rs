use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::warn;

use blogdesk_common::API_KEY_HEADER;

use crate::routes::{detail, RunnerState};

/// Rejects requests whose `X-API-Key` does not match the configured key.
/// With no key configured every request passes.
pub async fn require_api_key(
    State(state): State<Arc<RunnerState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(expected) = &state.api_key {
        let provided = request
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            warn!(path = %request.uri().path(), "Rejected request with invalid API key");
            return detail(StatusCode::UNAUTHORIZED, "Invalid or missing API key");
        }
    }
    next.run(request).await
}

pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compares_whole_value() {
        assert!(constant_time_eq(b"secret", b"secret"));
        assert!(!constant_time_eq(b"secret", b"secreT"));
        assert!(!constant_time_eq(b"secret", b"secret2"));
        assert!(!constant_time_eq(b"", b"secret"));
    }
}
