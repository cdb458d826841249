//! Producer side of the progress protocol.
//!
//! Each event becomes exactly one `data: <json>\n\n` frame, yielded as its
//! own body chunk the moment it is produced. The body ends right after the
//! terminal frame.

use std::convert::Infallible;

use axum::body::Body;
use axum::http::header::{self, HeaderName};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use blogdesk_common::ProgressEvent;

pub const EVENT_STREAM: &str = "text/event-stream";

/// Response headers for an unbuffered event stream. The last one switches
/// off response buffering in nginx-style reverse proxies.
pub const STREAM_HEADERS: [(HeaderName, &str); 4] = [
    (header::CONTENT_TYPE, EVENT_STREAM),
    (header::CACHE_CONTROL, "no-cache"),
    (header::CONNECTION, "keep-alive"),
    (HeaderName::from_static("x-accel-buffering"), "no"),
];

/// Serialize one event as a complete frame.
pub fn encode_frame<E: Serialize>(event: &E) -> Result<Bytes, serde_json::Error> {
    let json = serde_json::to_vec(event)?;
    let mut frame = Vec::with_capacity(json.len() + 8);
    frame.extend_from_slice(b"data: ");
    frame.extend_from_slice(&json);
    frame.extend_from_slice(b"\n\n");
    Ok(Bytes::from(frame))
}

/// Frames for every event received, ending after the terminal one.
///
/// An event that fails to serialize is logged and skipped.
pub fn frame_stream<E: ProgressEvent>(
    mut events: mpsc::Receiver<E>,
) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    async_stream::stream! {
        while let Some(event) = events.recv().await {
            let terminal = event.is_terminal();
            match encode_frame(&event) {
                Ok(frame) => yield Ok(frame),
                Err(e) => warn!(error = %e, "Dropping progress event that failed to serialize"),
            }
            if terminal {
                debug!("Terminal frame written, closing stream");
                break;
            }
        }
    }
}

/// An HTTP response streaming every event from `events`.
pub fn event_stream_response<E: ProgressEvent>(events: mpsc::Receiver<E>) -> Response {
    (STREAM_HEADERS, Body::from_stream(frame_stream(events))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use blogdesk_common::{PipelineEvent, PipelineStep};
    use futures::StreamExt;

    #[test]
    fn frame_is_single_data_line() {
        let frame = encode_frame(&PipelineEvent::running(
            PipelineStep::Scrape,
            "Starting scraping...",
        ))
        .unwrap();
        assert_eq!(
            &frame[..],
            b"data: {\"step\":\"scrape\",\"status\":\"running\",\"message\":\"Starting scraping...\"}\n\n"
        );
    }

    #[tokio::test]
    async fn stream_stops_after_terminal_event() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(PipelineEvent::running(PipelineStep::Scrape, "a")).await.unwrap();
        tx.send(PipelineEvent::done("Pipeline finished")).await.unwrap();
        tx.send(PipelineEvent::running(PipelineStep::Generate, "late")).await.unwrap();

        let frames: Vec<Bytes> = frame_stream(rx).map(|f| f.unwrap()).collect().await;

        assert_eq!(frames.len(), 2);
        assert!(frames[1].starts_with(br#"data: {"step":"done""#));
        // Sender is still open: the stream ended because of the marker.
        drop(tx);
    }

    #[tokio::test]
    async fn stream_ends_when_producer_goes_away() {
        let (tx, rx) = mpsc::channel(8);
        tx.send(PipelineEvent::running(PipelineStep::Scrape, "a")).await.unwrap();
        drop(tx);

        let frames: Vec<_> = frame_stream(rx).collect().await;
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn response_carries_streaming_headers() {
        let (_tx, rx) = mpsc::channel::<PipelineEvent>(1);
        let response = event_stream_response(rx);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], EVENT_STREAM);
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers["x-accel-buffering"], "no");
    }
}
