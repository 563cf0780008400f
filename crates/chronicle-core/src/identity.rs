//! Entity identity value type.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Opaque identifier of an aggregate, entity or read model.
///
/// Wraps the string form of a comparable primitive. Two identities are equal
/// iff their string representations are equal, so a scalar-backed identity
/// and a string-backed identity with the same rendering are interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates a string-backed identity.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Creates an identity from any scalar with a stable `Display` rendering.
    #[must_use]
    pub fn scalar(value: impl fmt::Display) -> Self {
        Self(value.to_string())
    }

    /// Generates a fresh random (v4) UUID identity.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parses a v4 UUID identity.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidIdentity` if `value` is not a v4 UUID.
    pub fn uuid(value: &str) -> Result<Self, DomainError> {
        let parsed = Uuid::parse_str(value)
            .map_err(|e| DomainError::InvalidIdentity(format!("{value} is not a uuid: {e}")))?;
        if parsed.get_version_num() != 4 {
            return Err(DomainError::InvalidIdentity(format!(
                "{value} is not a version 4 uuid"
            )));
        }
        Ok(Self(parsed.to_string()))
    }

    /// Returns the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Uuid> for Identity {
    fn from(value: Uuid) -> Self {
        Self(value.to_string())
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}
