//! Value serialization used by the durable stores.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DomainError;

/// Converts values to and from their stored string form.
pub trait Serializer: Send + Sync + 'static {
    /// Serializes `value`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if `value` cannot be encoded.
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, DomainError>;

    /// Deserializes a value previously produced by [`Serializer::serialize`].
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if `raw` cannot be decoded.
    fn deserialize<T: DeserializeOwned>(&self, raw: &str) -> Result<T, DomainError>;
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, DomainError> {
        serde_json::to_string(value)
            .map_err(|e| DomainError::Serialization(format!("json encoding failed: {e}")))
    }

    fn deserialize<T: DeserializeOwned>(&self, raw: &str) -> Result<T, DomainError> {
        serde_json::from_str(raw)
            .map_err(|e| DomainError::Serialization(format!("json decoding failed: {e}")))
    }
}
