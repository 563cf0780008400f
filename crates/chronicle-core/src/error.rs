//! Domain error types.

use thiserror::Error;

use crate::identity::Identity;

/// Top-level error type shared by stores, repositories and buses.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    /// A message's playhead does not continue the expected sequence.
    #[error(
        "playhead does not match for aggregate {aggregate_id}: expected {expected}, given {actual}"
    )]
    Playhead {
        /// The aggregate whose stream was being validated.
        aggregate_id: Identity,
        /// The playhead the sequence required next.
        expected: u64,
        /// The playhead the offending message carried.
        actual: u64,
    },

    /// No event stream exists for the identity.
    #[error("event stream not found for aggregate with id {0}")]
    StreamNotFound(Identity),

    /// No read model exists for the identity.
    #[error("model with id {0} not found")]
    ModelNotFound(Identity),

    /// An identity value failed validation.
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// A command or query was dispatched without a registered handler.
    #[error("missing handler registered for {0}")]
    HandlerNotRegistered(String),

    /// A second handler was registered for the same command or query.
    #[error("{message_type} cannot be registered on {handler} because it is already registered to another handler")]
    HandlerAlreadyRegistered {
        /// The command or query name.
        message_type: String,
        /// The handler that attempted to register.
        handler: String,
    },

    /// An event listener declares no handled event types.
    #[error("no handler functions on {0}")]
    NoHandlers(String),

    /// An event listener failed while handling a message.
    #[error("listener {listener} failed: {message}")]
    Listener {
        /// The failing listener's name.
        listener: String,
        /// Description of the failure.
        message: String,
    },

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Builds a playhead mismatch error.
    #[must_use]
    pub fn playhead(aggregate_id: Identity, expected: u64, actual: u64) -> Self {
        Self::Playhead {
            aggregate_id,
            expected,
            actual,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_playhead_error_message_names_aggregate_and_playheads() {
        let err = DomainError::playhead(Identity::new("order-7"), 2, 3);

        assert_eq!(
            err.to_string(),
            "playhead does not match for aggregate order-7: expected 2, given 3"
        );
    }

    #[test]
    fn test_stream_not_found_message_names_aggregate() {
        let err = DomainError::StreamNotFound(Identity::new("order-7"));

        assert_eq!(
            err.to_string(),
            "event stream not found for aggregate with id order-7"
        );
    }
}
