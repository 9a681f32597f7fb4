//! The narrow seam between handlers and the platform's entity store.
//!
//! Processors routinely read and write *other* entities while computing a
//! step. Those operations round-trip through the platform's REST surface,
//! not the gRPC stream; the concrete client lives in `spoke-data`. The core
//! only defines the interface so that handler code and tests never depend
//! on an HTTP stack.

use futures_core::future::BoxFuture;
use serde_json::Value;

use crate::entity::ModelKey;

/// Errors surfaced by [`EntityApi`] implementations.
#[derive(Debug)]
pub enum EntityApiError {
    /// The request never produced a response (connect, TLS, timeout, ...).
    Transport(String),
    /// The platform answered with a non-success status.
    Status { code: u16, message: String },
    /// The response body could not be decoded.
    Decode(String),
    /// No entity service was wired into the runtime.
    Unconfigured,
}

impl std::fmt::Display for EntityApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityApiError::Transport(msg) => write!(f, "entity API transport error: {msg}"),
            EntityApiError::Status { code, message } => {
                write!(f, "entity API returned {code}: {message}")
            }
            EntityApiError::Decode(msg) => write!(f, "entity API decode error: {msg}"),
            EntityApiError::Unconfigured => {
                write!(f, "entity API not configured for this runtime")
            }
        }
    }
}

impl std::error::Error for EntityApiError {}

/// Entity CRUD and transition triggering, as exposed to handlers through
/// their [`HandlerContext`](crate::handler::HandlerContext).
///
/// Payloads cross this seam as raw JSON; typed decoding belongs to the
/// [`EntityCodec`](crate::codec::EntityCodec).
pub trait EntityApi: Send + Sync + 'static {
    /// Fetch one entity by technical id.
    fn get<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>>;

    /// Create an entity; returns the persisted payload (with its assigned
    /// technical id).
    fn create<'a>(
        &'a self,
        model: &'a ModelKey,
        payload: Value,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>>;

    /// Update an entity, optionally applying a workflow transition as part
    /// of the write.
    fn update<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
        payload: Value,
        transition: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>>;

    /// Delete an entity by technical id.
    fn delete<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
    ) -> BoxFuture<'a, Result<(), EntityApiError>>;

    /// Search entities of one model with a platform-interpreted query.
    fn search<'a>(
        &'a self,
        model: &'a ModelKey,
        query: Value,
    ) -> BoxFuture<'a, Result<Vec<Value>, EntityApiError>>;

    /// List the workflow transitions currently available for an entity.
    fn list_transitions<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, EntityApiError>>;

    /// Trigger a named workflow transition without changing fields.
    fn trigger_transition<'a>(
        &'a self,
        model: &'a ModelKey,
        id: &'a str,
        transition: &'a str,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>>;
}

/// Placeholder wired into runtimes built without an entity service; every
/// call fails with [`EntityApiError::Unconfigured`]. Criteria-only clients
/// and most tests never notice.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredEntityApi;

impl EntityApi for UnconfiguredEntityApi {
    fn get<'a>(
        &'a self,
        _model: &'a ModelKey,
        _id: &'a str,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>> {
        Box::pin(async { Err(EntityApiError::Unconfigured) })
    }

    fn create<'a>(
        &'a self,
        _model: &'a ModelKey,
        _payload: Value,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>> {
        Box::pin(async { Err(EntityApiError::Unconfigured) })
    }

    fn update<'a>(
        &'a self,
        _model: &'a ModelKey,
        _id: &'a str,
        _payload: Value,
        _transition: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>> {
        Box::pin(async { Err(EntityApiError::Unconfigured) })
    }

    fn delete<'a>(
        &'a self,
        _model: &'a ModelKey,
        _id: &'a str,
    ) -> BoxFuture<'a, Result<(), EntityApiError>> {
        Box::pin(async { Err(EntityApiError::Unconfigured) })
    }

    fn search<'a>(
        &'a self,
        _model: &'a ModelKey,
        _query: Value,
    ) -> BoxFuture<'a, Result<Vec<Value>, EntityApiError>> {
        Box::pin(async { Err(EntityApiError::Unconfigured) })
    }

    fn list_transitions<'a>(
        &'a self,
        _model: &'a ModelKey,
        _id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, EntityApiError>> {
        Box::pin(async { Err(EntityApiError::Unconfigured) })
    }

    fn trigger_transition<'a>(
        &'a self,
        _model: &'a ModelKey,
        _id: &'a str,
        _transition: &'a str,
    ) -> BoxFuture<'a, Result<Value, EntityApiError>> {
        Box::pin(async { Err(EntityApiError::Unconfigured) })
    }
}
