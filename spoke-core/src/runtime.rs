//! The root context object.
//!
//! No module-global registries: everything a session needs — codec,
//! registry, entity API — is wired through [`CoreRuntimeBuilder`] and
//! frozen into a [`CoreRuntime`]. Tests instantiate their own runtime the
//! same way production code does.

use std::future::Future;
use std::sync::Arc;

use crate::codec::{CodecError, EntityCodec, EntityDescriptor};
use crate::entity::{Entity, EntityType};
use crate::entity_api::{EntityApi, UnconfiguredEntityApi};
use crate::handler::{HandlerContext, HandlerError};
use crate::registry::{HandlerRegistry, RegistryBuilder};

/// Immutable bundle of codec, registry, and entity API shared by the
/// dispatcher and every session. Cheap to clone.
#[derive(Clone)]
pub struct CoreRuntime {
    codec: Arc<EntityCodec>,
    registry: Arc<HandlerRegistry>,
    entities: Arc<dyn EntityApi>,
}

impl CoreRuntime {
    pub fn builder() -> CoreRuntimeBuilder {
        CoreRuntimeBuilder::new()
    }

    pub fn codec(&self) -> &Arc<EntityCodec> {
        &self.codec
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn entities(&self) -> &Arc<dyn EntityApi> {
        &self.entities
    }

    /// Replace the entity API wiring. Codec and registry stay shared and
    /// immutable; this exists so hosts can construct the entity service
    /// (which needs the shared token provider) after handler registration.
    pub fn with_entities(mut self, api: Arc<dyn EntityApi>) -> Self {
        self.entities = api;
        self
    }
}

impl std::fmt::Debug for CoreRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreRuntime")
            .field("models", &self.codec.len())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

/// Registration phase for a [`CoreRuntime`].
///
/// # Example
///
/// ```ignore
/// let runtime = CoreRuntime::builder()
///     .processor::<Item, _, _>("TagAdder", 1, |_ctx, mut item| async move {
///         item.fields.tags.push("tagged".into());
///         Ok(item)
///     })
///     .criterion::<Item, _, _>("IsHeavy", 1, |_ctx, item| async move {
///         Ok(item.fields.weight > 10.0)
///     })
///     .build();
/// ```
pub struct CoreRuntimeBuilder {
    codec: EntityCodec,
    registry: RegistryBuilder,
    entities: Option<Arc<dyn EntityApi>>,
}

impl CoreRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            codec: EntityCodec::new(),
            registry: RegistryBuilder::new(),
            entities: None,
        }
    }

    /// Register an entity type explicitly. Only needed for models that no
    /// handler is bound to (e.g. entities only reached through the entity
    /// API); registering a handler implies its entity type.
    pub fn entity<E: EntityType>(mut self) -> Result<Self, CodecError> {
        self.codec.register(EntityDescriptor::of::<E>())?;
        Ok(self)
    }

    /// Register a processor and (if needed) its entity type.
    pub fn processor<E, F, Fut>(mut self, name: impl Into<String>, version: u32, f: F) -> Self
    where
        E: EntityType,
        F: Fn(HandlerContext, Entity<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Entity<E>, HandlerError>> + Send + 'static,
    {
        self.codec.ensure::<E>();
        self.registry = self.registry.processor::<E, F, Fut>(name, version, f);
        self
    }

    /// Register a criterion and (if needed) its entity type.
    pub fn criterion<E, F, Fut>(mut self, name: impl Into<String>, version: u32, f: F) -> Self
    where
        E: EntityType,
        F: Fn(HandlerContext, Entity<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, HandlerError>> + Send + 'static,
    {
        self.codec.ensure::<E>();
        self.registry = self.registry.criterion::<E, F, Fut>(name, version, f);
        self
    }

    /// Wire the platform's entity CRUD client into handler contexts.
    pub fn entities(mut self, api: Arc<dyn EntityApi>) -> Self {
        self.entities = Some(api);
        self
    }

    /// Freeze everything into an immutable runtime.
    pub fn build(self) -> CoreRuntime {
        let runtime = CoreRuntime {
            codec: Arc::new(self.codec),
            registry: Arc::new(self.registry.build()),
            entities: self
                .entities
                .unwrap_or_else(|| Arc::new(UnconfiguredEntityApi)),
        };
        tracing::info!(
            models = runtime.codec.len(),
            processors = runtime.registry.processor_count(),
            criteria = runtime.registry.criterion_count(),
            "Core runtime assembled"
        );
        runtime
    }
}

impl Default for CoreRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
