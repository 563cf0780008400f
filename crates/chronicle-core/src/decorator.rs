//! Stream decorators applied between an aggregate and the store.
//!
//! A decorator is a pure transform from one [`DomainEventStream`] to another.
//! Decorators never mutate a message in place; they emit new messages.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::aggregate::AggregateView;
use crate::clock::Clock;
use crate::error::DomainError;
use crate::event::{DomainMessage, Metadata};
use crate::stream::DomainEventStream;

/// Transforms the stream of events an aggregate is about to save.
pub trait DomainEventStreamDecorator<E>: Send + Sync {
    /// Returns the decorated stream.
    fn decorate(
        &self,
        aggregate: &dyn AggregateView,
        stream: DomainEventStream<E>,
    ) -> DomainEventStream<E>;
}

/// Applies decorators in order, feeding each output into the next.
pub struct DecoratorChain<E> {
    decorators: Vec<Arc<dyn DomainEventStreamDecorator<E>>>,
}

impl<E> DecoratorChain<E> {
    /// Creates a chain from decorators in application order.
    #[must_use]
    pub fn new(decorators: Vec<Arc<dyn DomainEventStreamDecorator<E>>>) -> Self {
        Self { decorators }
    }

    /// Appends a decorator to the end of the chain.
    #[must_use]
    pub fn add(mut self, decorator: Arc<dyn DomainEventStreamDecorator<E>>) -> Self {
        self.decorators.push(decorator);
        self
    }

    /// Returns `true` if the chain has no decorators.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }
}

impl<E> Default for DecoratorChain<E> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<E> fmt::Debug for DecoratorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoratorChain")
            .field("len", &self.decorators.len())
            .finish()
    }
}

impl<E> DomainEventStreamDecorator<E> for DecoratorChain<E> {
    fn decorate(
        &self,
        aggregate: &dyn AggregateView,
        stream: DomainEventStream<E>,
    ) -> DomainEventStream<E> {
        self.decorators
            .iter()
            .fold(stream, |stream, decorator| decorator.decorate(aggregate, stream))
    }
}

/// Merges a key/value map into every message's metadata.
///
/// The map can be replaced at any time with [`MetadataDecorator::set_variables`];
/// each call to `decorate` uses the map as it was when `decorate` ran.
#[derive(Debug, Default)]
pub struct MetadataDecorator {
    variables: RwLock<Metadata>,
}

impl MetadataDecorator {
    /// Creates a decorator with a fixed initial map.
    #[must_use]
    pub fn new(variables: Metadata) -> Self {
        Self {
            variables: RwLock::new(variables),
        }
    }

    /// Replaces the map used by subsequent decorations.
    pub fn set_variables(&self, variables: Metadata) {
        *self.variables.write().unwrap_or_else(PoisonError::into_inner) = variables;
    }

    /// Returns a copy of the current map.
    #[must_use]
    pub fn variables(&self) -> Metadata {
        self.variables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<E: Send + 'static> DomainEventStreamDecorator<E> for MetadataDecorator {
    fn decorate(
        &self,
        _aggregate: &dyn AggregateView,
        stream: DomainEventStream<E>,
    ) -> DomainEventStream<E> {
        let snapshot = self.variables();
        stream.map_messages(move |message| message.with_metadata(&snapshot))
    }
}

/// Replaces every message's `recorded_on` with the clock's current time.
pub struct OverrideDateDecorator {
    clock: Arc<dyn Clock>,
}

impl OverrideDateDecorator {
    /// Creates the decorator.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl fmt::Debug for OverrideDateDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverrideDateDecorator").finish_non_exhaustive()
    }
}

impl<E: Send + 'static> DomainEventStreamDecorator<E> for OverrideDateDecorator {
    fn decorate(
        &self,
        _aggregate: &dyn AggregateView,
        stream: DomainEventStream<E>,
    ) -> DomainEventStream<E> {
        let clock = Arc::clone(&self.clock);
        stream.map_messages(move |message| message.with_recorded_on(clock.now()))
    }
}

/// Expected-next playhead counter.
///
/// Starts either unset, adopting the first playhead it sees, or at a fixed
/// value. Every store checks incoming messages against one of these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayheadSequence {
    expected: Option<u64>,
}

impl PlayheadSequence {
    /// Creates a sequence that adopts the first playhead it sees.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sequence that requires `playhead` next.
    #[must_use]
    pub fn starting_at(playhead: u64) -> Self {
        Self {
            expected: Some(playhead),
        }
    }

    /// Returns the playhead required next, if known.
    #[must_use]
    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    /// Checks `message` continues the sequence and advances it.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Playhead` on mismatch, or when `message` is at
    /// `u64::MAX` and nothing could follow it. The counter is left as is.
    pub fn check<E>(&mut self, message: &DomainMessage<E>) -> Result<(), DomainError> {
        let expected = self.expected.unwrap_or(message.playhead);
        let mismatch =
            || DomainError::playhead(message.aggregate_id.clone(), expected, message.playhead);
        if message.playhead != expected {
            return Err(mismatch());
        }
        self.expected = Some(expected.checked_add(1).ok_or_else(mismatch)?);
        Ok(())
    }
}

/// Fails a stream whose playheads are not strictly sequential.
///
/// The counter persists across decorations, so one validator instance
/// follows a single aggregate's stream across several saves.
#[derive(Debug, Default)]
pub struct PlayheadValidatorDecorator {
    sequence: Arc<Mutex<PlayheadSequence>>,
}

impl PlayheadValidatorDecorator {
    /// Creates a validator that adopts the first playhead it sees.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a validator that requires `playhead` first.
    #[must_use]
    pub fn starting_at(playhead: u64) -> Self {
        Self {
            sequence: Arc::new(Mutex::new(PlayheadSequence::starting_at(playhead))),
        }
    }

    /// Validates `stream` without an aggregate.
    #[must_use]
    pub fn validate<E: Send + 'static>(&self, stream: DomainEventStream<E>) -> DomainEventStream<E> {
        let sequence = Arc::clone(&self.sequence);
        stream.try_map_messages(move |message| {
            sequence
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .check(&message)?;
            Ok(message)
        })
    }
}

impl<E: Send + 'static> DomainEventStreamDecorator<E> for PlayheadValidatorDecorator {
    fn decorate(
        &self,
        _aggregate: &dyn AggregateView,
        stream: DomainEventStream<E>,
    ) -> DomainEventStream<E> {
        self.validate(stream)
    }
}
