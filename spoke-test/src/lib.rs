//! # spoke-test — an in-process platform for session tests
//!
//! [`MockPlatform`] implements the
//! [`EventTransport`](spoke_grpc::EventTransport) seam with in-memory
//! channels and a scripted peer: it greets joins, acknowledges keepalives,
//! records everything the client sends, and lets a test inject calculation
//! requests or kill the stream mid-session. No sockets, no protoc, no
//! timing cliffs beyond the ones a test asks for.
//!
//! ```ignore
//! let platform = MockPlatform::new();
//! let supervisor = Supervisor::with_parts(runtime, config, auth, platform.transport());
//! let handle = supervisor.handle();
//! tokio::spawn(supervisor.run());
//! // drive the session through `platform`
//! ```

mod platform;

pub use platform::MockPlatform;
