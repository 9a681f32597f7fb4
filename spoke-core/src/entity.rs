//! Typed entities and model identity.
//!
//! The platform addresses every domain object by `(modelName, modelVersion,
//! technicalId)`. Payload shapes evolve on the platform side independently
//! of this client, so a decoded [`Entity`] keeps two layers: the typed
//! `fields` a handler works with, and a passthrough map holding every
//! payload member the schema does not cover. Encoding re-attaches the
//! passthrough verbatim, which is what keeps processor round-trips from
//! silently dropping fields.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec::CodecError;

/// Payload member reserved for the platform-assigned identifier.
pub(crate) const TECHNICAL_ID_FIELD: &str = "technicalId";
/// Payload member reserved for platform bookkeeping.
pub(crate) const META_FIELD: &str = "meta";

/// Identity of an entity kind: case-sensitive name × positive version.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelKey {
    pub name: String,
    pub version: u32,
}

impl ModelKey {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

impl std::fmt::Display for ModelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/v{}", self.name, self.version)
    }
}

/// The reserved `meta` slot on every entity payload.
///
/// Owned by the platform: handlers may read the current workflow state from
/// it but must not forge transitions. Members beyond `state` are carried
/// verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EntityMeta {
    /// Returns `true` if the slot carries nothing worth re-emitting.
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.extra.is_empty()
    }
}

/// A user-defined entity schema, registered with the codec under a
/// `(modelName, modelVersion)` pair.
///
/// # Example
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Item {
///     name: String,
///     #[serde(default)]
///     tags: Vec<String>,
/// }
///
/// impl EntityType for Item {
///     const MODEL_NAME: &'static str = "Item";
///     const MODEL_VERSION: u32 = 1;
/// }
/// ```
pub trait EntityType: Serialize + DeserializeOwned + Send + 'static {
    const MODEL_NAME: &'static str;
    const MODEL_VERSION: u32;

    fn model() -> ModelKey {
        ModelKey::new(Self::MODEL_NAME, Self::MODEL_VERSION)
    }
}

/// A decoded entity: typed fields plus the platform bookkeeping that rides
/// alongside them on the wire.
///
/// Handlers receive an `Entity<E>` by value and are its sole writer for the
/// duration of the call; every request gets a freshly decoded instance.
#[derive(Debug)]
pub struct Entity<E> {
    /// Platform-assigned identifier. `None` until the platform has
    /// persisted the entity (e.g. payloads on create paths).
    pub technical_id: Option<String>,
    /// The reserved platform slot.
    pub meta: EntityMeta,
    /// The typed user fields.
    pub fields: E,
    passthrough: Map<String, Value>,
}

impl<E: EntityType> Entity<E> {
    /// Wrap plain fields into an entity with no platform bookkeeping.
    pub fn new(fields: E) -> Self {
        Self {
            technical_id: None,
            meta: EntityMeta::default(),
            fields,
            passthrough: Map::new(),
        }
    }

    /// The current workflow state, if the platform attached one.
    pub fn state(&self) -> Option<&str> {
        self.meta.state.as_deref()
    }

    /// Payload members that the schema of `E` does not cover. Preserved
    /// verbatim across decode/encode.
    pub fn passthrough(&self) -> &Map<String, Value> {
        &self.passthrough
    }

    /// Decode a wire payload into a typed entity.
    ///
    /// The reserved `technicalId` and `meta` members are lifted out before
    /// the user fields are deserialized, so a schema can never shadow them.
    pub(crate) fn from_payload(payload: &Value) -> Result<Self, CodecError> {
        let object = payload
            .as_object()
            .ok_or_else(|| CodecError::MalformedPayload("payload is not a JSON object".into()))?;
        let mut rest = object.clone();

        let technical_id = match rest.remove(TECHNICAL_ID_FIELD) {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id),
            Some(other) => {
                return Err(CodecError::MalformedPayload(format!(
                    "technicalId must be a string, got {other}"
                )))
            }
        };
        let meta = match rest.remove(META_FIELD) {
            None | Some(Value::Null) => EntityMeta::default(),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| CodecError::MalformedPayload(format!("invalid meta slot: {e}")))?,
        };

        let fields: E = serde_json::from_value(Value::Object(rest.clone()))
            .map_err(|e| CodecError::MalformedPayload(e.to_string()))?;

        // Anything the schema does not re-emit is passthrough.
        let covered = match serde_json::to_value(&fields) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => Map::new(),
        };
        let passthrough = rest
            .into_iter()
            .filter(|(key, _)| !covered.contains_key(key))
            .collect();

        Ok(Self {
            technical_id,
            meta,
            fields,
            passthrough,
        })
    }

    /// Encode the entity back into its wire payload.
    pub(crate) fn into_payload(self) -> Result<Value, CodecError> {
        let mut out = match serde_json::to_value(&self.fields) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                return Err(CodecError::Encode(format!(
                    "entity fields must serialize to an object, got {other}"
                )))
            }
            Err(e) => return Err(CodecError::Encode(e.to_string())),
        };

        // Schema fields win; everything else flows through untouched.
        for (key, value) in self.passthrough {
            out.entry(key).or_insert(value);
        }
        if !self.meta.is_empty() {
            let meta = serde_json::to_value(&self.meta)
                .map_err(|e| CodecError::Encode(format!("invalid meta slot: {e}")))?;
            out.insert(META_FIELD.to_string(), meta);
        }
        if let Some(id) = self.technical_id {
            out.insert(TECHNICAL_ID_FIELD.to_string(), Value::String(id));
        }
        Ok(Value::Object(out))
    }
}
