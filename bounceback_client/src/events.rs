//! Measurement Events
//!
//! The records handed to the metrics sink, one per request/response exchange.
//! Sinks are fire-and-forget: `record` never blocks the caller and never
//! reports back.

use serde::Serialize;
use std::fmt;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Kind of exchange an event describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventCategory {
    /// A reply was matched, or the wait for one timed out
    #[serde(rename = "WSR")]
    ResponseReceived,
    /// The connection could not be opened
    #[serde(rename = "WSC")]
    ConnectFailed,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::ResponseReceived => "WSR",
            EventCategory::ConnectFailed => "WSC",
        }
    }
}

impl fmt::Display for EventCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of the virtual user that produced an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventContext {
    pub user_id: String,
}

/// One latency or outcome sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementEvent {
    pub category: EventCategory,
    /// Metric bucket key; the reply body for matches, the sent payload otherwise
    pub name: String,
    pub elapsed_ms: f64,
    pub byte_length: usize,
    pub failure: Option<String>,
    pub context: EventContext,
}

impl MeasurementEvent {
    pub fn response_received(
        name: impl Into<String>,
        elapsed_ms: f64,
        byte_length: usize,
        context: EventContext,
    ) -> Self {
        Self {
            category: EventCategory::ResponseReceived,
            name: name.into(),
            elapsed_ms,
            byte_length,
            failure: None,
            context,
        }
    }

    pub fn connect_failed(
        name: impl Into<String>,
        elapsed_ms: f64,
        reason: impl Into<String>,
        context: EventContext,
    ) -> Self {
        Self {
            category: EventCategory::ConnectFailed,
            name: name.into(),
            elapsed_ms,
            byte_length: 0,
            failure: Some(reason.into()),
            context,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }
}

/// Append-only destination for measurement events
pub trait EventSink: Send + Sync {
    fn record(&self, event: MeasurementEvent);
}

/// Sink that forwards events over an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: UnboundedSender<MeasurementEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, UnboundedReceiver<MeasurementEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn record(&self, event: MeasurementEvent) {
        // Nobody listening is not our problem.
        let _ = self.tx.send(event);
    }
}
