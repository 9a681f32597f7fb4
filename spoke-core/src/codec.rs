//! Payload ⇄ entity mapping keyed by model identity.
//!
//! The codec is populated during the registration phase and frozen into an
//! `Arc` before the supervisor starts; after that it is read-only and safe
//! to share across the dispatcher's worker tasks.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::entity::{Entity, EntityType, ModelKey};

/// A decoded entity with its concrete type erased. Produced by
/// [`EntityCodec::decode`] and consumed by the handler adapter that knows
/// which `Entity<E>` to downcast to.
pub type BoxedEntity = Box<dyn Any + Send>;

type DecodeFn = Arc<dyn Fn(&Value) -> Result<BoxedEntity, CodecError> + Send + Sync>;
type EncodeFn = Arc<dyn Fn(BoxedEntity) -> Result<Value, CodecError> + Send + Sync>;

/// Errors from entity registration and payload mapping.
#[derive(Debug)]
pub enum CodecError {
    /// A descriptor for this `(modelName, modelVersion)` already exists.
    DuplicateModel(ModelKey),
    /// No descriptor registered for the requested model.
    UnknownModel(ModelKey),
    /// The payload does not satisfy the descriptor's schema.
    MalformedPayload(String),
    /// The mutated entity could not be re-encoded.
    Encode(String),
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::DuplicateModel(model) => {
                write!(f, "entity model already registered: {model}")
            }
            CodecError::UnknownModel(model) => write!(f, "unknown entity model: {model}"),
            CodecError::MalformedPayload(msg) => write!(f, "malformed payload: {msg}"),
            CodecError::Encode(msg) => write!(f, "entity encode error: {msg}"),
        }
    }
}

impl std::error::Error for CodecError {}

/// Registration record for one entity type: model identity plus the
/// type-erased constructor and serializer.
#[derive(Clone)]
pub struct EntityDescriptor {
    model: ModelKey,
    decode: DecodeFn,
    encode: EncodeFn,
}

impl EntityDescriptor {
    /// Build the descriptor for a typed entity.
    pub fn of<E: EntityType>() -> Self {
        Self {
            model: E::model(),
            decode: Arc::new(|payload| {
                Entity::<E>::from_payload(payload).map(|entity| Box::new(entity) as BoxedEntity)
            }),
            encode: Arc::new(|boxed| {
                let entity = boxed
                    .downcast::<Entity<E>>()
                    .map_err(|_| CodecError::Encode("entity type mismatch".into()))?;
                entity.into_payload()
            }),
        }
    }

    pub fn model(&self) -> &ModelKey {
        &self.model
    }
}

impl std::fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityDescriptor")
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Bidirectional mapping between wire payloads and typed entities,
/// registered by `(modelName, modelVersion)`.
#[derive(Default)]
pub struct EntityCodec {
    descriptors: HashMap<ModelKey, EntityDescriptor>,
}

impl EntityCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Duplicate `(modelName, modelVersion)` pairs
    /// are rejected.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> Result<(), CodecError> {
        let model = descriptor.model().clone();
        if self.descriptors.contains_key(&model) {
            return Err(CodecError::DuplicateModel(model));
        }
        tracing::debug!(model = %model, "Registered entity model");
        self.descriptors.insert(model, descriptor);
        Ok(())
    }

    /// Register `E` if no descriptor for its model exists yet. Used by the
    /// runtime builder so that registering a handler implies its entity.
    pub fn ensure<E: EntityType>(&mut self) {
        let model = E::model();
        if !self.descriptors.contains_key(&model) {
            self.descriptors.insert(model, EntityDescriptor::of::<E>());
        }
    }

    pub fn contains(&self, model: &ModelKey) -> bool {
        self.descriptors.contains_key(model)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// Decode a payload into the typed entity registered for `model`.
    pub fn decode(&self, model: &ModelKey, payload: &Value) -> Result<BoxedEntity, CodecError> {
        let descriptor = self
            .descriptors
            .get(model)
            .ok_or_else(|| CodecError::UnknownModel(model.clone()))?;
        (descriptor.decode)(payload)
    }

    /// Encode a typed entity back into its wire payload.
    pub fn encode(&self, model: &ModelKey, entity: BoxedEntity) -> Result<Value, CodecError> {
        let descriptor = self
            .descriptors
            .get(model)
            .ok_or_else(|| CodecError::UnknownModel(model.clone()))?;
        (descriptor.encode)(entity)
    }
}
