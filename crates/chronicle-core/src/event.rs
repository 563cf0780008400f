//! Domain event abstractions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::identity::Identity;

/// Free-form metadata attached to every domain message.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Trait that all domain events implement.
///
/// An event is the "what happened"; it carries no required fields of its
/// own. Stores and buses only need a stable name to route and persist it.
pub trait DomainEvent: Clone + fmt::Debug + Send + Sync + 'static {
    /// Returns the event type name (used for bus routing and persistence).
    fn event_type(&self) -> &'static str;
}

/// An event wrapped with its aggregate id, playhead, timestamp and metadata.
///
/// This is the atomic unit of persistence and transmission. Messages are
/// never mutated in place; the `with_*` helpers consume and return a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMessage<E> {
    /// Aggregate/stream this message belongs to.
    pub aggregate_id: Identity,
    /// Zero-based position within the aggregate stream.
    pub playhead: u64,
    /// The domain event.
    pub payload: E,
    /// When the message was recorded.
    pub recorded_on: DateTime<Utc>,
    /// Additional key/value data added by decorators or stores.
    pub metadata: Metadata,
}

impl<E> DomainMessage<E> {
    /// Reconstructs a message, typically from storage.
    #[must_use]
    pub fn new(
        aggregate_id: Identity,
        playhead: u64,
        payload: E,
        recorded_on: DateTime<Utc>,
        metadata: Metadata,
    ) -> Self {
        Self {
            aggregate_id,
            playhead,
            payload,
            recorded_on,
            metadata,
        }
    }

    /// Records a message stamped with the system clock.
    #[must_use]
    pub fn record_now(aggregate_id: Identity, playhead: u64, payload: E) -> Self {
        Self::recorded_at(aggregate_id, playhead, payload, &SystemClock)
    }

    /// Records a message stamped with the given clock.
    #[must_use]
    pub fn recorded_at(
        aggregate_id: Identity,
        playhead: u64,
        payload: E,
        clock: &dyn Clock,
    ) -> Self {
        Self::new(aggregate_id, playhead, payload, clock.now(), Metadata::new())
    }

    /// Returns a copy with `extra` merged over the existing metadata.
    #[must_use]
    pub fn with_metadata(mut self, extra: &Metadata) -> Self {
        for (key, value) in extra {
            self.metadata.insert(key.clone(), value.clone());
        }
        self
    }

    /// Returns a copy with a different recording timestamp.
    #[must_use]
    pub fn with_recorded_on(mut self, recorded_on: DateTime<Utc>) -> Self {
        self.recorded_on = recorded_on;
        self
    }
}

impl<E: DomainEvent> fmt::Display for DomainMessage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.aggregate_id,
            self.playhead,
            self.payload.event_type()
        )
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde::{Deserialize, Serialize};

    use super::DomainEvent;

    /// Minimal event enum shared by unit tests in this crate.
    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    pub(crate) enum TestEvent {
        Created { name: String },
        Renamed { name: String },
        Ignored,
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                Self::Created { .. } => "test.created",
                Self::Renamed { .. } => "test.renamed",
                Self::Ignored => "test.ignored",
            }
        }
    }
}
