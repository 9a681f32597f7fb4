//! # spoke-grpc — the stream side of the Spoke runtime
//!
//! One bidirectional gRPC stream multiplexes every exchange with the
//! platform: handshake, calculation requests and responses, keepalives,
//! and mid-stream re-authentication, all framed as CloudEvents over
//! protobuf.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`proto`] | The CloudEvents envelope message |
//! | [`client`] | Thin tonic client for the single bidirectional RPC |
//! | [`events`] | Event payloads and the envelope ⇄ frame mapping |
//! | [`transport`] | [`EventTransport`] — the seam the session connects through |
//! | [`session`] | One handshake-to-close stream lifecycle |
//! | [`supervisor`] | Reconnection with backoff, readiness observables, shutdown |
//!
//! The [`transport::EventTransport`] trait is what makes the session
//! testable without a network: production wires
//! [`transport::GrpcEventTransport`], tests wire `spoke-test`'s in-memory
//! platform.

pub mod backoff;
pub mod client;
pub mod error;
pub mod events;
pub mod proto;
pub mod session;
pub mod supervisor;
pub mod transport;

pub use client::EventStreamClient;
pub use error::{SessionError, TransportError};
pub use proto::CloudEvent;
pub use session::SessionPhase;
pub use supervisor::{Supervisor, SupervisorHandle};
pub use transport::{EventTransport, GrpcEventTransport, InboundEvents, OutboundEvents};
