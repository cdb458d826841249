use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{
        header::{ACCEPT, CONTENT_TYPE, HOST},
        HeaderMap, Method, Uri,
    },
    response::{IntoResponse, Json, Response},
    routing::any,
    Router,
};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use blogdesk_common::API_KEY_HEADER;
use blogdesk_stream::{EVENT_STREAM, STREAM_HEADERS};

use crate::error::ProxyError;
use crate::guard::points_at_self;
use crate::relay::relay_body;
use crate::state::ProxyState;

/// `{prefix}` and `{prefix}/{*path}`, any method, both into [`forward`].
pub fn proxy_router(state: ProxyState) -> Router {
    let prefix = state.config.prefix.clone();
    let (bare, nested) = if prefix.is_empty() {
        ("/".to_string(), "/{*path}".to_string())
    } else {
        (prefix.clone(), format!("{prefix}/{{*path}}"))
    };

    Router::new()
        .route(&bare, any(forward))
        .route(&nested, any(forward))
        .with_state(Arc::new(state))
}

/// `{backend}{path}{?query}`. The inbound path already starts with the prefix.
pub fn backend_url_for(backend_url: &str, uri: &Uri) -> String {
    match uri.query() {
        Some(query) => format!("{backend_url}{}?{query}", uri.path()),
        None => format!("{backend_url}{}", uri.path()),
    }
}

pub async fn forward(
    State(state): State<Arc<ProxyState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let host = headers.get(HOST).and_then(|v| v.to_str().ok());
    if points_at_self(&state.backend_origin, state.public_origin.as_ref(), host) {
        error!(
            backend = %state.config.backend_url,
            "Backend URL points at this proxy, refusing to forward"
        );
        return ProxyError::SelfReference.into_response();
    }

    let url = backend_url_for(&state.config.backend_url, &uri);
    let path = uri.path().to_string();

    let mut request = state.http.request(method.clone(), &url);
    for name in [CONTENT_TYPE, ACCEPT] {
        if let Some(value) = headers.get(&name) {
            request = request.header(name, value.clone());
        }
    }
    if let Some(key) = &state.config.api_key {
        request = request.header(API_KEY_HEADER, key.as_str());
    }
    if method != Method::GET && method != Method::HEAD {
        request = request.body(body);
    }

    debug!(method = %method, path = %path, "Forwarding request");
    let upstream = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(method = %method, path = %path, error = %e, "Backend request failed");
            return ProxyError::Transport(e).into_response();
        }
    };

    let status = upstream.status();
    if is_event_stream(upstream.headers()) {
        info!(path = %path, status = %status, "Relaying event stream");
        return (status, STREAM_HEADERS, relay_body(upstream.bytes_stream(), path)).into_response();
    }

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(path = %path, error = %e, "Failed to read backend response");
            return ProxyError::Transport(e).into_response();
        }
    };

    // Unparseable bodies become `{}` and keep their status.
    let payload = match serde_json::from_slice::<Value>(&bytes) {
        Ok(value) => value,
        Err(e) => {
            if !bytes.is_empty() {
                debug!(path = %path, status = %status, error = %e, "Backend body is not JSON");
            }
            Value::Object(Map::new())
        }
    };
    (status, Json(payload)).into_response()
}

fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.trim_start().starts_with(EVENT_STREAM))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn backend_url_keeps_path_and_query() {
        let uri: Uri = "/api/activity-logs/recent?limit=5&type=pipeline".parse().unwrap();
        assert_eq!(
            backend_url_for("http://backend:8000", &uri),
            "http://backend:8000/api/activity-logs/recent?limit=5&type=pipeline"
        );

        let bare: Uri = "/api".parse().unwrap();
        assert_eq!(backend_url_for("http://backend:8000", &bare), "http://backend:8000/api");
    }

    #[test]
    fn event_stream_detection_ignores_parameters() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream; charset=utf-8"),
        );
        assert!(is_event_stream(&headers));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!is_event_stream(&headers));
    }
}
