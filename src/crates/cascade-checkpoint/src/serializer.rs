//! Serialization protocol for checkpoints
//!
//! [`SerializerProtocol`] is the byte-level serialization seam used by the
//! key-value store; [`JsonSerializer`] is the implementation the tree ships.
//!
//! State trees are JSON-compatible by construction, but producers
//! occasionally hold values with no serialized form (native tool closures
//! registered on the engine). Those are written as a tagged marker
//! `{"type": "callable", "value": null}` and survive round-trips as-is.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Protocol for serializing and deserializing checkpoint data
pub trait SerializerProtocol: Send + Sync {
    /// Serialize a value to bytes
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Deserialize a value from bytes
    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T>;
}

/// JSON-based serializer (default)
#[derive(Debug, Clone, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub fn new() -> Self {
        Self
    }
}

impl SerializerProtocol for JsonSerializer {
    fn dumps<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn loads<T: for<'de> Deserialize<'de>>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// Marker written in place of a value that has no serialized form.
pub fn callable_sentinel() -> Value {
    json!({"type": "callable", "value": null})
}

/// True if `value` is the marker produced by [`callable_sentinel`].
pub fn is_callable_sentinel(value: &Value) -> bool {
    value
        .as_object()
        .map(|o| o.get("type") == Some(&json!("callable")) && o.len() == 2)
        .unwrap_or(false)
}
