//! Transport- and session-level error types.

use spoke_auth::AuthError;

/// Errors from the stream transport.
#[derive(Debug)]
pub enum TransportError {
    /// The endpoint could not be parsed or the request assembled.
    Config(String),
    /// The connection could not be established.
    Connect(String),
    /// The RPC failed or the stream yielded an error status.
    Rpc { code: String, message: String },
    /// The peer closed the stream.
    Closed,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Config(msg) => write!(f, "transport configuration error: {msg}"),
            TransportError::Connect(msg) => write!(f, "connect failed: {msg}"),
            TransportError::Rpc { code, message } => write!(f, "rpc error ({code}): {message}"),
            TransportError::Closed => write!(f, "stream closed by peer"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<tonic::Status> for TransportError {
    fn from(status: tonic::Status) -> Self {
        TransportError::Rpc {
            code: format!("{:?}", status.code()),
            message: status.message().to_string(),
        }
    }
}

/// Why a session ended. Everything except [`SessionError::HandshakeMismatch`]
/// is retryable; auth failures additionally count against the retry budget.
#[derive(Debug)]
pub enum SessionError {
    /// Token acquisition or mid-stream refresh failed.
    Auth(AuthError),
    /// The transport could not connect.
    Connect(TransportError),
    /// No `Greet` arrived within the handshake timeout.
    HandshakeTimeout,
    /// The platform answered the handshake with something we cannot talk
    /// to. Fatal: exit code 3.
    HandshakeMismatch(String),
    /// No keepalive acknowledgment (or any other inbound traffic) for two
    /// keepalive intervals.
    KeepAliveLost,
    /// The inbound stream ended.
    StreamClosed,
    /// The inbound stream yielded an error.
    Stream(TransportError),
}

impl SessionError {
    /// Fatal errors end the supervisor loop instead of triggering a
    /// reconnect.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::HandshakeMismatch(_))
    }

    /// Auth failures are retryable but budgeted.
    pub fn is_auth(&self) -> bool {
        matches!(self, SessionError::Auth(_))
    }
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::Auth(err) => write!(f, "authentication failed: {err}"),
            SessionError::Connect(err) => write!(f, "connect failed: {err}"),
            SessionError::HandshakeTimeout => write!(f, "handshake timed out"),
            SessionError::HandshakeMismatch(msg) => write!(f, "handshake mismatch: {msg}"),
            SessionError::KeepAliveLost => write!(f, "keepalive acknowledgments stopped"),
            SessionError::StreamClosed => write!(f, "stream closed"),
            SessionError::Stream(err) => write!(f, "stream error: {err}"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Errors mapping frames onto the CloudEvents envelope.
#[derive(Debug)]
pub enum WireError {
    /// A known event type carried an undecodable payload.
    Malformed {
        event_type: String,
        message: String,
    },
    /// An outbound frame could not be serialized.
    Encode(String),
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireError::Malformed {
                event_type,
                message,
            } => write!(f, "malformed {event_type} event: {message}"),
            WireError::Encode(msg) => write!(f, "event encode error: {msg}"),
        }
    }
}

impl std::error::Error for WireError {}
