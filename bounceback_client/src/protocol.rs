//! Protocol Module
//!
//! Handles the JSON envelope exchanged with the chat server. Every outgoing
//! message packs the request identifier, the issue timestamp and the payload
//! into a single `message` field:
//!
//! ```text
//! {"message":"<uuid>__<unix_nanos>__<payload>","type":1}
//! ```
//!
//! The server broadcasts the `message` field back verbatim, so the same
//! composite string is decoded on the inbound side to correlate replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Separator between identifier, timestamp and payload.
///
/// Identifiers are hyphenated UUIDs and timestamps are decimal, so neither can
/// contain it. Payloads are assumed not to.
pub const DELIMITER: &str = "__";

/// Message type tag for plain text messages.
pub const TEXT_MESSAGE_TYPE: u8 = 1;

// ============================================================================
// Wire Types
// ============================================================================

/// Outgoing wire envelope
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub message: String,
    #[serde(rename = "type")]
    pub msg_type: u8,
}

/// The three fields recovered from a composite `message` string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeParts {
    pub request_id: String,
    pub issued_at_ns: u64,
    pub body: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Reasons a composite `message` string cannot be split
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("expected 3 parts separated by '__', found {0}")]
    PartCount(usize),

    #[error("invalid sent time: {0:?}")]
    InvalidTimestamp(String),
}

/// Reasons an inbound frame is not a usable reply
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("frame has no string 'message' field")]
    MissingMessage,

    #[error("malformed envelope: {0}")]
    Malformed(#[from] EnvelopeError),
}

// ============================================================================
// Protocol Functions
// ============================================================================

/// Generate a new UUID v4 request identifier
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

/// Wall clock time in nanoseconds since the UNIX epoch
pub fn unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Build the JSON envelope for a request
pub fn encode_envelope(
    request_id: &str,
    issued_at_ns: u64,
    payload: &str,
) -> Result<String, serde_json::Error> {
    let envelope = Envelope {
        message: format!("{request_id}{DELIMITER}{issued_at_ns}{DELIMITER}{payload}"),
        msg_type: TEXT_MESSAGE_TYPE,
    };
    serde_json::to_string(&envelope)
}

/// Split a composite `message` string into its identifier, timestamp and body
pub fn split_envelope(message: &str) -> Result<EnvelopeParts, EnvelopeError> {
    let parts: Vec<&str> = message.split(DELIMITER).collect();
    let [request_id, issued_at, body] = parts.as_slice() else {
        return Err(EnvelopeError::PartCount(parts.len()));
    };

    let issued_at_ns = issued_at
        .parse::<u64>()
        .map_err(|_| EnvelopeError::InvalidTimestamp(issued_at.to_string()))?;

    Ok(EnvelopeParts {
        request_id: request_id.to_string(),
        issued_at_ns,
        body: body.to_string(),
    })
}

/// Decode an inbound text frame down to its envelope parts.
///
/// Any JSON value is accepted at the top level; frames that are not objects
/// simply have no `message` field.
pub fn parse_frame(frame: &str) -> Result<EnvelopeParts, FrameError> {
    let payload: Value = serde_json::from_str(frame)?;
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .ok_or(FrameError::MissingMessage)?;
    Ok(split_envelope(message)?)
}
