//! # spoke-core — runtime core for the Spoke workflow client
//!
//! Spoke is the compute side of a remotely-orchestrated workflow platform:
//! the platform drives entity state machines centrally and calls back into
//! this runtime to compute individual steps. This crate holds everything
//! that is independent of the wire:
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`entity`] | Typed entities, model identity, and the reserved `meta` slot |
//! | [`codec`] | [`EntityCodec`] — payload ⇄ typed entity with verbatim passthrough of unknown fields |
//! | [`registry`] | Immutable [`HandlerRegistry`] of processors and criteria keyed by `(name, version)` |
//! | [`handler`] | Handler contexts, errors, and the closure-registration plumbing |
//! | [`dispatch`] | [`Dispatcher`] — bounded worker pools, deadlines, exactly-one-response bookkeeping |
//! | [`outbox`] | Single-consumer ordered queue in front of the stream's send half |
//! | [`frame`] | Wire-agnostic request/response frames |
//! | [`entity_api`] | The narrow seam handlers use to reach the platform's entity CRUD API |
//! | [`config`] | Environment-driven runtime configuration |
//! | [`runtime`] | [`CoreRuntime`] — the root context object wiring codec + registry + entity API |
//!
//! The transport half (gRPC stream session, reconnection, supervisor) lives
//! in `spoke-grpc`; this crate never touches a socket.

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod entity;
pub mod entity_api;
pub mod error;
pub mod frame;
pub mod handler;
pub mod outbox;
pub mod registry;
pub mod runtime;

pub use codec::{CodecError, EntityCodec, EntityDescriptor};
pub use config::{
    AuthConfig, ConfigError, DataConfig, DispatchConfig, OverflowPolicy, RuntimeConfig,
    SessionConfig,
};
pub use dispatch::Dispatcher;
pub use entity::{Entity, EntityMeta, EntityType, ModelKey};
pub use entity_api::{EntityApi, EntityApiError, UnconfiguredEntityApi};
pub use error::FatalError;
pub use frame::{
    ErrorKind, InboundRequest, JoinFrame, Outcome, OutboundFrame, ResponseFrame,
};
pub use handler::{HandlerContext, HandlerError, HandlerKind};
pub use outbox::{outbox, Outbox, OutboxClosed, OutboxReceiver};
pub use registry::{HandlerDescriptor, HandlerRegistry, RegistryBuilder};
pub use runtime::{CoreRuntime, CoreRuntimeBuilder};

/// Re-exports of the most commonly used core types.
pub mod prelude {
    pub use crate::codec::EntityCodec;
    pub use crate::entity::{Entity, EntityType, ModelKey};
    pub use crate::entity_api::EntityApi;
    pub use crate::handler::{HandlerContext, HandlerError};
    pub use crate::runtime::{CoreRuntime, CoreRuntimeBuilder};
    pub use crate::RuntimeConfig;
}
