//! The immutable handler registry.
//!
//! Discovery is build-time: the registry is populated through
//! [`RegistryBuilder`] before the supervisor starts and never mutated
//! afterwards, which removes the initialization-order bugs that come with
//! import-time side effects. Registration mistakes (duplicate keys) are
//! startup bugs and panic immediately.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::entity::{Entity, EntityType};
use crate::handler::{
    ErasedHandlerFn, HandlerContext, HandlerEntry, HandlerError, HandlerKind, HandlerOutput,
};

/// Advertised identity of one handler, as sent to the platform on
/// handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerDescriptor {
    pub kind: HandlerKind,
    pub name: String,
    pub version: u32,
}

type VersionMap = BTreeMap<u32, Arc<HandlerEntry>>;

/// Collects processor and criterion registrations before the runtime is
/// frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    processors: HashMap<String, VersionMap>,
    criteria: HashMap<String, VersionMap>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor: a side-effecting transformation of an entity.
    ///
    /// # Panics
    ///
    /// Panics if a processor with the same `(name, version)` is already
    /// registered.
    pub fn processor<E, F, Fut>(mut self, name: impl Into<String>, version: u32, f: F) -> Self
    where
        E: EntityType,
        F: Fn(HandlerContext, Entity<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Entity<E>, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        let invoke: ErasedHandlerFn = Arc::new(move |ctx, boxed| {
            // The dispatcher decoded via the descriptor bound at
            // registration, so the downcast cannot fail.
            let entity = *boxed
                .downcast::<Entity<E>>()
                .expect("entity type mismatch");
            let fut = f(ctx, entity);
            Box::pin(async move {
                let entity = fut.await?;
                let payload = entity
                    .into_payload()
                    .map_err(|e| HandlerError::new(format!("failed to encode result: {e}")))?;
                Ok(HandlerOutput::Payload(payload))
            })
        });
        self.insert(HandlerKind::Processor, name, version, invoke, E::model());
        self
    }

    /// Register a criterion: a cheap, side-effect-free predicate gating a
    /// workflow transition.
    ///
    /// # Panics
    ///
    /// Panics if a criterion with the same `(name, version)` is already
    /// registered.
    pub fn criterion<E, F, Fut>(mut self, name: impl Into<String>, version: u32, f: F) -> Self
    where
        E: EntityType,
        F: Fn(HandlerContext, Entity<E>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, HandlerError>> + Send + 'static,
    {
        let name = name.into();
        let invoke: ErasedHandlerFn = Arc::new(move |ctx, boxed| {
            let entity = *boxed
                .downcast::<Entity<E>>()
                .expect("entity type mismatch");
            let fut = f(ctx, entity);
            Box::pin(async move { fut.await.map(HandlerOutput::Matches) })
        });
        self.insert(HandlerKind::Criterion, name, version, invoke, E::model());
        self
    }

    fn insert(
        &mut self,
        kind: HandlerKind,
        name: String,
        version: u32,
        invoke: ErasedHandlerFn,
        model: crate::entity::ModelKey,
    ) {
        assert!(version > 0, "handler version must be positive: {name}");
        let map = match kind {
            HandlerKind::Processor => &mut self.processors,
            HandlerKind::Criterion => &mut self.criteria,
        };
        let versions = map.entry(name.clone()).or_default();
        assert!(
            !versions.contains_key(&version),
            "duplicate {kind} registration: {name}/v{version}"
        );
        versions.insert(
            version,
            Arc::new(HandlerEntry {
                kind,
                name,
                version,
                model,
                invoke,
            }),
        );
    }

    /// Freeze the registrations into an immutable registry.
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            processors: self.processors,
            criteria: self.criteria,
        }
    }
}

/// The frozen set of handlers, keyed by `(kind, name, version)`.
///
/// Immutable once the supervisor holds it, so the `Join` frame replayed on
/// every reconnect always advertises the same set.
pub struct HandlerRegistry {
    processors: HashMap<String, VersionMap>,
    criteria: HashMap<String, VersionMap>,
}

impl HandlerRegistry {
    /// Advertised handlers, ordered by kind then name then version.
    /// Handlers whose name starts with `_` are private: resolvable but
    /// never advertised.
    pub fn list(&self) -> Vec<HandlerDescriptor> {
        let mut out = Vec::new();
        for (kind, map) in [
            (HandlerKind::Processor, &self.processors),
            (HandlerKind::Criterion, &self.criteria),
        ] {
            let mut names: Vec<&String> = map.keys().filter(|n| !n.starts_with('_')).collect();
            names.sort();
            for name in names {
                for version in map[name].keys() {
                    out.push(HandlerDescriptor {
                        kind,
                        name: name.clone(),
                        version: *version,
                    });
                }
            }
        }
        out
    }

    /// Resolve a handler by kind and name. A pinned version requires an
    /// exact match; otherwise the highest registered version wins.
    pub(crate) fn resolve(
        &self,
        kind: HandlerKind,
        name: &str,
        version: Option<u32>,
    ) -> Option<Arc<HandlerEntry>> {
        let map = match kind {
            HandlerKind::Processor => &self.processors,
            HandlerKind::Criterion => &self.criteria,
        };
        let versions = map.get(name)?;
        match version {
            Some(pinned) => versions.get(&pinned).cloned(),
            None => versions.values().next_back().cloned(),
        }
    }

    pub fn contains(&self, kind: HandlerKind, name: &str) -> bool {
        let map = match kind {
            HandlerKind::Processor => &self.processors,
            HandlerKind::Criterion => &self.criteria,
        };
        map.contains_key(name)
    }

    pub fn processor_count(&self) -> usize {
        self.processors.values().map(BTreeMap::len).sum()
    }

    pub fn criterion_count(&self) -> usize {
        self.criteria.values().map(BTreeMap::len).sum()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("processors", &self.processor_count())
            .field("criteria", &self.criterion_count())
            .finish()
    }
}
