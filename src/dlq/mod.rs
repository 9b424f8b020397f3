//! Rejected-records sink.
//!
//! Row-level and file-level malformed data is routed here instead of
//! failing the batch.
//!
//! # Components
//!
//! - [`RejectedRecordSink`] - Writes one NDJSON file of rejections per batch
//! - [`RejectionTracker`] - Metrics, logging and per-batch limit enforcement

mod queue;
mod tracker;
mod types;

pub use queue::RejectedRecordSink;
pub use tracker::RejectionTracker;
pub use types::{RejectStats, RejectedRecord};
