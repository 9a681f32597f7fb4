//! Handler kinds, contexts, and the closure-erasure plumbing.
//!
//! User code registers plain async closures; the registry stores them
//! type-erased so the dispatcher can route by `(kind, name, version)`
//! without knowing entity types. The erased closure owns the typed
//! downcast *and* the result encoding, so the dispatcher only ever sees
//! payloads and booleans.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::codec::BoxedEntity;
use crate::entity::ModelKey;
use crate::entity_api::{EntityApi, EntityApiError};

/// Discriminates the two kinds of business-logic units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandlerKind {
    Processor,
    Criterion,
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Processor => write!(f, "processor"),
            HandlerKind::Criterion => write!(f, "criterion"),
        }
    }
}

/// Failure reported by user handler code. Carries a message only; the
/// dispatcher maps it to a `HandlerFailed` response at the boundary.
#[derive(Debug)]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<EntityApiError> for HandlerError {
    fn from(err: EntityApiError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Per-invocation context handed to every handler.
///
/// The cancellation token fires on deadline, session reset, and process
/// shutdown; I/O-heavy processors should observe it and return early.
#[derive(Clone)]
pub struct HandlerContext {
    request_id: String,
    model: ModelKey,
    deadline: Instant,
    cancellation: CancellationToken,
    entities: Arc<dyn EntityApi>,
}

impl HandlerContext {
    pub(crate) fn new(
        request_id: String,
        model: ModelKey,
        deadline: Instant,
        cancellation: CancellationToken,
        entities: Arc<dyn EntityApi>,
    ) -> Self {
        Self {
            request_id,
            model,
            deadline,
            cancellation,
            entities,
        }
    }

    /// Correlation id of the request being computed.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Model the inbound entity was declared under.
    pub fn model(&self) -> &ModelKey {
        &self.model
    }

    /// Effective deadline of this invocation.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Token cancelled on deadline, session reset, or shutdown.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// The platform's entity CRUD surface.
    pub fn entities(&self) -> &Arc<dyn EntityApi> {
        &self.entities
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("request_id", &self.request_id)
            .field("model", &self.model)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// What an erased handler hands back to the dispatcher.
pub(crate) enum HandlerOutput {
    /// Re-encoded entity payload (processors).
    Payload(Value),
    /// Predicate verdict (criteria).
    Matches(bool),
}

pub(crate) type ErasedFuture = Pin<Box<dyn Future<Output = Result<HandlerOutput, HandlerError>> + Send>>;

/// Type-erased handler invocation: context + decoded entity in, output or
/// failure out.
pub(crate) type ErasedHandlerFn =
    Arc<dyn Fn(HandlerContext, BoxedEntity) -> ErasedFuture + Send + Sync>;

/// One registered handler: identity, bound model, and the erased closure.
pub(crate) struct HandlerEntry {
    pub kind: HandlerKind,
    pub name: String,
    pub version: u32,
    pub model: ModelKey,
    pub invoke: ErasedHandlerFn,
}

impl std::fmt::Debug for HandlerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerEntry")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}
