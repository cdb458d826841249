//! Long-running task progress protocol.
//!
//! - [`encoder`]: producer side, one `data: <json>\n\n` frame per event.
//! - [`decoder`] and [`client`]: observer side, a single sequential consumer
//!   of the byte stream with cancellation and terminal-marker detection.
//! - [`reducer`]: folds decoded events into per-stage status plus a rolling log.
//! - [`replay`]: reconciles with the activity log once a stream ends.

pub mod client;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod reducer;
pub mod replay;

pub use client::{CancelHandle, EventStream, StreamClient, StreamObserver, StreamOutcome, StreamRequest};
pub use decoder::FrameDecoder;
pub use encoder::{encode_frame, event_stream_response, frame_stream, STREAM_HEADERS, EVENT_STREAM};
pub use error::StreamError;
pub use reducer::{
    initial_steps, reduce, BatchProgress, ItemFailure, LogEntry, PipelineProgress,
    PipelineStepState, RollingLog, RunFinish, Signal, StageStatus,
};
pub use replay::{reconcile, verdict_for, ActivityLogClient, Reconciliation, Verdict};
