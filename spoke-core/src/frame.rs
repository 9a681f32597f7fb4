//! Wire-agnostic frames exchanged with the platform.
//!
//! The gRPC layer maps these onto CloudEvents envelopes; the core only
//! cares about their semantics. Every inbound request produces exactly one
//! [`ResponseFrame`] carrying the same correlation id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::ModelKey;
use crate::handler::HandlerKind;
use crate::registry::HandlerDescriptor;

/// Failure categories surfaced to the platform in response frames. The
/// variant names are the wire strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    HandlerNotFound,
    MalformedPayload,
    Overloaded,
    Timeout,
    HandlerFailed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::HandlerNotFound => "HandlerNotFound",
            ErrorKind::MalformedPayload => "MalformedPayload",
            ErrorKind::Overloaded => "Overloaded",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::HandlerFailed => "HandlerFailed",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded calculation request.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub request_id: String,
    pub kind: HandlerKind,
    pub handler_name: String,
    /// `Some` when the platform pins an exact handler version.
    pub handler_version: Option<u32>,
    pub model: ModelKey,
    pub payload: Value,
    /// Platform-supplied deadline hint, milliseconds.
    pub deadline_millis: Option<u64>,
}

/// Result of one calculation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Mutated entity payload (processors).
    Entity(Value),
    /// Predicate verdict (criteria).
    Matches(bool),
    /// The request failed; `kind` and `message` go back to the platform.
    Error { kind: ErrorKind, message: String },
}

/// The single response produced for an inbound request.
#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub request_id: String,
    pub kind: HandlerKind,
    pub outcome: Outcome,
}

impl ResponseFrame {
    pub fn error(
        request_id: impl Into<String>,
        kind: HandlerKind,
        error: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            kind,
            outcome: Outcome::Error {
                kind: error,
                message: message.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, Outcome::Error { .. })
    }
}

/// Handshake announcement: who we are and what we can compute.
#[derive(Debug, Clone)]
pub struct JoinFrame {
    pub process_id: String,
    pub handlers: Vec<HandlerDescriptor>,
    pub schema_version: u32,
}

/// Everything the client ever puts on the stream.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    Join(JoinFrame),
    Response(ResponseFrame),
    KeepAlive { timestamp_millis: u64 },
    KeepAliveAck { timestamp_millis: u64 },
    ReAuth { token: String },
}
