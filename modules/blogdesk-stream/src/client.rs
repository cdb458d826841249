//! Single-shot observer side of a progress stream.
//!
//! One request, one sequential reader, no retry. Recovery after a dropped
//! stream goes through the activity log (see [`crate::replay`]).

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use blogdesk_common::{ProgressEvent, TaskStage, TriggerSummary};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::ACCEPT;
use reqwest::Method;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::decoder::FrameDecoder;
use crate::encoder::EVENT_STREAM;
use crate::error::{check_status, StreamError};

/// Detaches an observer from its stream. The producer is never told.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl StreamRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: None,
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// HTTP entry point for streams and non-streaming triggers.
#[derive(Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    base_url: String,
}

impl StreamClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn open<E: ProgressEvent>(
        &self,
        request: StreamRequest,
    ) -> Result<EventStream<E>, StreamError> {
        self.open_cancellable(request, CancelHandle::new()).await
    }

    /// Like [`open`](Self::open), but `cancel` also aborts the wait for
    /// response headers.
    pub async fn open_cancellable<E: ProgressEvent>(
        &self,
        request: StreamRequest,
        cancel: CancelHandle,
    ) -> Result<EventStream<E>, StreamError> {
        let url = self.url(&request.path);
        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header(ACCEPT, EVENT_STREAM);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        info!(method = %request.method, url = %url, "Opening progress stream");
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            response = builder.send() => response?,
        };
        let response = check_status(response).await?;

        Ok(EventStream::from_byte_stream(response.bytes_stream(), cancel))
    }

    /// Run a stage synchronously and return its summary.
    pub async fn trigger(&self, stage: TaskStage) -> Result<TriggerSummary, StreamError> {
        let url = self.url(&format!("tasks/{stage}"));
        info!(stage = %stage, "Triggering task");
        let response = self.http.post(&url).send().await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }
}

/// How a stream ended, from the observer's point of view.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamOutcome<E> {
    /// Terminal success marker received.
    Finished(E),
    /// Terminal in-band task error received.
    Failed(E),
    /// Transport closed without a terminal marker. The real outcome has to
    /// come from the activity log.
    Unterminated,
    Cancelled,
}

impl<E> StreamOutcome<E> {
    pub fn terminal_event(&self) -> Option<&E> {
        match self {
            Self::Finished(event) | Self::Failed(event) => Some(event),
            Self::Unterminated | Self::Cancelled => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Finished(_) => "finished",
            Self::Failed(_) => "failed",
            Self::Unterminated => "unterminated",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Callback form of the decode loop.
pub trait StreamObserver<E> {
    /// Runs inline; the next read waits for it to return.
    fn on_event(&mut self, event: &E);

    fn on_complete(&mut self, outcome: StreamOutcome<E>);

    fn on_error(&mut self, error: StreamError);
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StreamError>> + Send>>;

enum Read {
    Cancelled,
    Chunk(Option<Result<Bytes, StreamError>>),
}

/// An open progress stream: OPEN, then events, then CLOSED.
pub struct EventStream<E> {
    transport: Option<ByteStream>,
    decoder: FrameDecoder<E>,
    ready: VecDeque<E>,
    cancel: CancelHandle,
    outcome: Option<StreamOutcome<E>>,
}

impl<E> std::fmt::Debug for EventStream<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl<E: ProgressEvent> EventStream<E> {
    pub fn from_byte_stream<S, X>(stream: S, cancel: CancelHandle) -> Self
    where
        S: Stream<Item = Result<Bytes, X>> + Send + 'static,
        X: Display,
    {
        let transport = stream.map(|chunk| chunk.map_err(|e| StreamError::Transport(e.to_string())));
        Self {
            transport: Some(Box::pin(transport)),
            decoder: FrameDecoder::new(),
            ready: VecDeque::new(),
            cancel,
            outcome: None,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Set once the stream has closed for any reason other than a transport error.
    pub fn outcome(&self) -> Option<&StreamOutcome<E>> {
        self.outcome.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_none() && self.ready.is_empty()
    }

    /// Next decoded event, or `None` once the stream is closed.
    ///
    /// Nothing is read past the first terminal event.
    pub async fn next_event(&mut self) -> Result<Option<E>, StreamError> {
        loop {
            if self.cancel.is_cancelled() && !self.is_closed() {
                self.close(StreamOutcome::Cancelled);
                return Ok(None);
            }

            if let Some(event) = self.ready.pop_front() {
                if event.is_terminal() {
                    let outcome = if event.is_failure() {
                        StreamOutcome::Failed(event.clone())
                    } else {
                        StreamOutcome::Finished(event.clone())
                    };
                    self.close(outcome);
                }
                return Ok(Some(event));
            }

            let Some(transport) = self.transport.as_mut() else {
                return Ok(None);
            };

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Read::Cancelled,
                chunk = transport.next() => Read::Chunk(chunk),
            };

            match read {
                Read::Cancelled => {
                    self.close(StreamOutcome::Cancelled);
                    return Ok(None);
                }
                Read::Chunk(Some(Ok(bytes))) => {
                    let events = self.decoder.push(&bytes);
                    self.ready.extend(events);
                }
                Read::Chunk(Some(Err(err))) => {
                    if self.cancel.is_cancelled() {
                        self.close(StreamOutcome::Cancelled);
                        return Ok(None);
                    }
                    self.transport = None;
                    self.ready.clear();
                    return Err(err);
                }
                Read::Chunk(None) => {
                    if self.decoder.pending() > 0 {
                        debug!(bytes = self.decoder.pending(), "Discarding unterminated trailing line");
                    }
                    self.close(StreamOutcome::Unterminated);
                    return Ok(None);
                }
            }
        }
    }

    fn close(&mut self, outcome: StreamOutcome<E>) {
        // Dropping the transport closes the connection.
        self.transport = None;
        self.ready.clear();
        if self.outcome.is_none() {
            debug!(outcome = outcome.label(), "Progress stream closed");
            self.outcome = Some(outcome);
        }
    }

    /// Consume every event, then report how the stream ended.
    pub async fn watch(
        mut self,
        mut on_event: impl FnMut(&E),
    ) -> Result<StreamOutcome<E>, StreamError> {
        while let Some(event) = self.next_event().await? {
            on_event(&event);
        }
        Ok(self.outcome.take().unwrap_or(StreamOutcome::Unterminated))
    }

    /// Exactly one of `on_complete` or `on_error` fires, once.
    pub async fn drive<O: StreamObserver<E>>(self, observer: &mut O) {
        let result = self.watch(|event| observer.on_event(event)).await;
        match result {
            Ok(outcome) => observer.on_complete(outcome),
            Err(error) => observer.on_error(error),
        }
    }
}
