//! WebSocket Bounceback Client Library
//!
//! Measures round-trip latency over a persistent WebSocket when replies arrive
//! out of band and interleaved with unrelated traffic. Each request is tagged
//! with a unique identifier and send timestamp; the reply carrying the same
//! identifier is matched on the receive side and reported as a measurement.
//!
//! # Modules
//!
//! - `config`: Configuration loading and validation from .properties files
//! - `protocol`: Envelope construction and inbound frame decoding
//! - `events`: Measurement events and the sink trait they are reported to
//! - `connection`: WebSocket lifecycle and the background receive task
//! - `tracker`: Correlation of inbound frames with the outstanding request
//! - `client`: Per-iteration orchestration (connect, send, wait, close)
//! - `stats`: Histogram-based statistics sink
//! - `runner`: Virtual user loop with think time

pub mod config;
pub mod protocol;
pub mod events;
pub mod connection;
pub mod tracker;
pub mod client;
pub mod stats;
pub mod runner;

// Re-export main types for convenience
pub use config::Config;
pub use client::{BouncebackClient, IterationOutcome};
pub use connection::Connection;
pub use events::{ChannelSink, EventSink, MeasurementEvent};
pub use stats::HistogramSink;
pub use tracker::CorrelationTracker;
