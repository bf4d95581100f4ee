//! Bounceback Client Module
//!
//! Drives one request/response exchange per iteration:
//! connect → send → wait for the matching reply or timeout → close.
//! The wait is a coarse poll over state the connection's receive task
//! updates through the [`CorrelationTracker`].

use crate::config::Config;
use crate::connection::{Connection, ConnectionError, InboundHandler};
use crate::events::{EventSink, MeasurementEvent};
use crate::tracker::CorrelationTracker;

use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Per-iteration state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationState {
    Idle,
    Connecting,
    Connected,
    AwaitingMatch,
    Matched,
    TimedOut,
    ConnectionLost,
    Closed,
}

/// How an iteration's wait ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// The reply arrived; its event was emitted by the tracker
    Matched,
    /// No reply in time; a timeout event was emitted
    TimedOut,
    /// The connection closed first; no event
    ConnectionLost,
}

/// WebSocket client measuring bounceback latency for one virtual user
pub struct BouncebackClient {
    config: Config,
    headers: Vec<String>,
    poll_interval: Duration,
    tracker: Arc<CorrelationTracker>,
    sink: Arc<dyn EventSink>,
    state: IterationState,
}

impl BouncebackClient {
    /// Create a new client reporting to `sink`
    pub fn new(config: &Config, sink: Arc<dyn EventSink>) -> Self {
        let context = crate::events::EventContext {
            user_id: config.user_id.to_string(),
        };
        let tracker = Arc::new(CorrelationTracker::new(Arc::clone(&sink), context));

        Self {
            config: config.clone(),
            headers: vec![config.user_header()],
            poll_interval: config.poll_interval(),
            tracker,
            sink,
            state: IterationState::Idle,
        }
    }

    pub fn state(&self) -> IterationState {
        self.state
    }

    pub fn tracker(&self) -> &CorrelationTracker {
        &self.tracker
    }

    /// Tag `payload`, make it the outstanding request and write it.
    ///
    /// Returns the request identifier.
    pub async fn send(&self, conn: &Connection, payload: &str) -> Result<String, ClientError> {
        let request = self.tracker.begin(payload)?;
        log::debug!("Sending: {}", request.envelope);
        conn.send_text(request.envelope).await?;
        Ok(request.id)
    }

    /// Run one iteration against `path` with the timeout in whole seconds
    pub async fn run_iteration(
        &mut self,
        path: &str,
        payload: &str,
        timeout_seconds: u64,
    ) -> Result<IterationOutcome, ClientError> {
        self.send_and_wait(path, payload, Duration::from_secs(timeout_seconds))
            .await
    }

    /// Connect, send `payload`, wait for its reply or `timeout`, then close.
    ///
    /// Only a failed connect or an unserializable envelope is an error.
    /// Timeouts and lost connections are ordinary outcomes.
    pub async fn send_and_wait(
        &mut self,
        path: &str,
        payload: &str,
        timeout: Duration,
    ) -> Result<IterationOutcome, ClientError> {
        let url = self.config.target_url(path);
        self.transition(IterationState::Connecting);

        let handler: Arc<dyn InboundHandler> = self.tracker.clone();
        let connect_started = Instant::now();
        let mut conn = match Connection::open(&url, &self.headers, handler).await {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Failed to connect to {}: {}", url, e);
                self.sink.record(MeasurementEvent::connect_failed(
                    payload,
                    millis(connect_started.elapsed()),
                    e.to_string(),
                    self.tracker.context().clone(),
                ));
                self.transition(IterationState::Closed);
                return Err(e.into());
            }
        };
        self.transition(IterationState::Connected);

        let result = self.await_reply(&conn, payload, timeout).await;

        conn.close().await;
        // Whatever is still outstanding can no longer be answered.
        self.tracker.expire();
        self.transition(IterationState::Closed);
        result
    }

    async fn await_reply(
        &mut self,
        conn: &Connection,
        payload: &str,
        timeout: Duration,
    ) -> Result<IterationOutcome, ClientError> {
        match self.send(conn, payload).await {
            Ok(id) => log::debug!("Awaiting reply for {}", id),
            // The write failure closed the connection; the poll below sees it.
            Err(ClientError::Connection(e)) => log::warn!("Send failed: {}", e),
            Err(e) => return Err(e),
        }
        let sent_at = Instant::now();
        self.transition(IterationState::AwaitingMatch);

        loop {
            if self.tracker.is_accepted() {
                self.transition(IterationState::Matched);
                return Ok(IterationOutcome::Matched);
            }

            if !conn.is_open() {
                // The receive task may have accepted the reply just before the close.
                if !self.tracker.expire() {
                    self.transition(IterationState::Matched);
                    return Ok(IterationOutcome::Matched);
                }
                self.transition(IterationState::ConnectionLost);
                return Ok(IterationOutcome::ConnectionLost);
            }

            let waited = sent_at.elapsed();
            if waited > timeout {
                // A reply may have been accepted since the check above.
                if !self.tracker.expire() {
                    self.transition(IterationState::Matched);
                    return Ok(IterationOutcome::Matched);
                }

                self.sink.record(MeasurementEvent::response_received(
                    payload,
                    millis(waited),
                    payload.len(),
                    self.tracker.context().clone(),
                ));
                self.transition(IterationState::TimedOut);
                return Ok(IterationOutcome::TimedOut);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn transition(&mut self, next: IterationState) {
        log::debug!("Iteration state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
