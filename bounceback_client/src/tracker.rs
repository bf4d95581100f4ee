//! Correlation Tracker Module
//!
//! Tags outgoing requests and matches inbound frames against the single
//! request currently in flight. The tracker is not a router: a frame is only
//! of interest when it carries the identifier of the most recent request, and
//! everything else arriving on the socket is dropped.
//!
//! The outstanding request is shared between the sending side and the
//! connection's receive task, so identifier and status live behind one mutex
//! and are always read and written together.

use crate::connection::InboundHandler;
use crate::events::{EventContext, EventSink, MeasurementEvent};
use crate::protocol::{self, EnvelopeError, FrameError};

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Why an inbound frame did not produce a measurement
#[derive(Debug, Error)]
pub enum InboundError {
    #[error("frame is not valid JSON: {0}")]
    Decode(serde_json::Error),

    #[error("frame has no message field")]
    MissingMessage,

    #[error("malformed envelope: {0}")]
    Malformed(EnvelopeError),

    #[error("reply {received} does not match outstanding request {expected:?}")]
    Mismatch {
        expected: Option<String>,
        received: String,
    },

    #[error("request {0} was already settled")]
    Settled(String),
}

impl From<FrameError> for InboundError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Decode(e) => InboundError::Decode(e),
            FrameError::MissingMessage => InboundError::MissingMessage,
            FrameError::Malformed(e) => InboundError::Malformed(e),
        }
    }
}

/// Lifecycle of the outstanding request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Awaiting,
    Accepted,
    /// Timed out, or the connection went away before a reply
    Abandoned,
}

/// The single request the client is waiting to see echoed back
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutstandingRequest {
    pub id: String,
    pub issued_at_ns: u64,
    pub status: RequestStatus,
}

/// A tagged request ready to be written to the connection
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub id: String,
    pub envelope: String,
}

/// Correlates replies with the latest request and emits measurements
pub struct CorrelationTracker {
    outstanding: Mutex<Option<OutstandingRequest>>,
    sink: Arc<dyn EventSink>,
    context: EventContext,
}

impl CorrelationTracker {
    pub fn new(sink: Arc<dyn EventSink>, context: EventContext) -> Self {
        Self {
            outstanding: Mutex::new(None),
            sink,
            context,
        }
    }

    /// Tag a payload and make it the outstanding request.
    ///
    /// Any previous request is overwritten and its replies become unmatchable.
    pub fn begin(&self, payload: &str) -> Result<PreparedRequest, serde_json::Error> {
        let id = protocol::generate_request_id();
        let issued_at_ns = protocol::unix_nanos();
        let envelope = protocol::encode_envelope(&id, issued_at_ns, payload)?;

        *self.lock() = Some(OutstandingRequest {
            id: id.clone(),
            issued_at_ns,
            status: RequestStatus::Awaiting,
        });

        Ok(PreparedRequest { id, envelope })
    }

    /// Try to match a frame against the outstanding request.
    ///
    /// On a match the request is marked accepted and the emitted event is
    /// returned. Every other outcome is reported as an `InboundError` and has
    /// no side effects.
    pub fn handle_frame(&self, frame: &str) -> Result<MeasurementEvent, InboundError> {
        let parts = protocol::parse_frame(frame)?;

        let event = {
            let mut guard = self.lock();
            let outstanding = match guard.as_mut() {
                Some(o) if o.id == parts.request_id => o,
                other => {
                    return Err(InboundError::Mismatch {
                        expected: other.as_ref().map(|o| o.id.clone()),
                        received: parts.request_id,
                    })
                }
            };

            if outstanding.status != RequestStatus::Awaiting {
                return Err(InboundError::Settled(parts.request_id));
            }
            outstanding.status = RequestStatus::Accepted;

            let elapsed_ns = protocol::unix_nanos() as i128 - parts.issued_at_ns as i128;
            MeasurementEvent::response_received(
                parts.body,
                elapsed_ns as f64 / 1_000_000.0,
                frame.len(),
                self.context.clone(),
            )
        };

        self.sink.record(event.clone());
        Ok(event)
    }

    /// Give up on the outstanding request.
    ///
    /// Returns true only if it was still awaiting a reply, in which case the
    /// caller owns reporting the outcome.
    pub fn expire(&self) -> bool {
        match self.lock().as_mut() {
            Some(o) if o.status == RequestStatus::Awaiting => {
                o.status = RequestStatus::Abandoned;
                true
            }
            _ => false,
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(
            self.lock().as_ref(),
            Some(o) if o.status == RequestStatus::Accepted
        )
    }

    pub fn current_request_id(&self) -> Option<String> {
        self.lock().as_ref().map(|o| o.id.clone())
    }

    pub fn outstanding(&self) -> Option<OutstandingRequest> {
        self.lock().clone()
    }

    pub fn context(&self) -> &EventContext {
        &self.context
    }

    fn lock(&self) -> MutexGuard<'_, Option<OutstandingRequest>> {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl InboundHandler for CorrelationTracker {
    fn on_inbound(&self, frame: &str) {
        match self.handle_frame(frame) {
            Ok(event) => {
                log::debug!("Matched reply '{}' in {:.3} ms", event.name, event.elapsed_ms);
            }
            Err(InboundError::Mismatch { .. }) => {}
            Err(e @ InboundError::Malformed(_)) => {
                log::error!("Discarding inbound frame: {}", e);
            }
            Err(e) => {
                log::debug!("Discarding inbound frame: {} - {}", e, frame);
            }
        }
    }
}
