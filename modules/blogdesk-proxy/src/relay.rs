use axum::body::Body;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use tracing::{debug, info, warn};

/// Lives inside a relay body. Dropped early means the caller went away.
pub struct RelayGuard {
    path: String,
    chunks: u64,
    finished: bool,
}

impl RelayGuard {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            chunks: 0,
            finished: false,
        }
    }
}

impl Drop for RelayGuard {
    fn drop(&mut self) {
        if self.finished {
            debug!(path = %self.path, chunks = self.chunks, "Stream relay finished");
        } else {
            info!(
                path = %self.path,
                chunks = self.chunks,
                "Caller disconnected, closing upstream stream"
            );
        }
    }
}

/// Pass upstream chunks through as they arrive.
///
/// Dropping the returned body drops `upstream`, which closes the backend
/// connection. An upstream read error ends the body with that error, so
/// the caller's connection is aborted rather than closed cleanly.
pub fn relay_body<S>(upstream: S, path: impl Into<String>) -> Body
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let mut guard = RelayGuard::new(path);
    let body = async_stream::stream! {
        let mut upstream = Box::pin(upstream);
        while let Some(chunk) = upstream.next().await {
            match chunk {
                Ok(bytes) => {
                    guard.chunks += 1;
                    yield Ok(bytes);
                }
                Err(e) => {
                    warn!(path = %guard.path, error = %e, "Upstream stream failed mid-relay");
                    guard.finished = true;
                    yield Err(e);
                    return;
                }
            }
        }
        guard.finished = true;
    };
    Body::from_stream(body)
}
