//! Event-sourced aggregate root and entity abstractions.
//!
//! An aggregate is a tree of entities. The root owns an [`EventRecorder`]
//! that tracks identity, playhead and uncommitted events; every entity in
//! the tree (root included) reacts to events through
//! [`EventSourcedEntity::handle`], and events are dispatched depth first.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;

use crate::clock::{Clock, SystemClock};
use crate::error::DomainError;
use crate::event::{DomainEvent, DomainMessage};
use crate::identity::Identity;
use crate::stream::DomainEventStream;

/// Anything in an aggregate tree that reacts to events.
pub trait EventSourcedEntity: Send + Sync {
    /// The event type this entity consumes.
    type Event: DomainEvent;

    /// Mutates state in response to `event`.
    ///
    /// Implementations match on the event enum; variants the entity does not
    /// care about are ignored.
    fn handle(&mut self, event: &Self::Event);

    /// Returns the child entities that should also receive every event.
    fn child_entities(&mut self) -> Vec<&mut dyn EventSourcedEntity<Event = Self::Event>> {
        Vec::new()
    }
}

/// Dispatches `event` to `entity`, then to each child subtree in order.
pub fn handle_recursively<T>(entity: &mut T, event: &T::Event)
where
    T: EventSourcedEntity + ?Sized,
{
    entity.handle(event);
    for child in entity.child_entities() {
        handle_recursively(child, event);
    }
}

/// Where an aggregate is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Constructed, nothing applied or replayed yet.
    Fresh,
    /// Inside [`AggregateRoot::initialize_state`].
    Replaying,
    /// Replay finished or at least one event applied.
    Live,
}

/// Read-only view of an aggregate handed to stream decorators.
pub trait AggregateView: Send + Sync {
    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> &Identity;

    /// Returns the playhead, `-1` before any event.
    fn playhead(&self) -> i64;
}

/// Bookkeeping embedded in every aggregate root.
pub struct EventRecorder<E> {
    aggregate_id: Identity,
    applied: u64,
    uncommitted: Vec<DomainMessage<E>>,
    clock: Arc<dyn Clock>,
    lifecycle: Lifecycle,
}

impl<E> EventRecorder<E> {
    /// Creates a recorder stamping messages with the system clock.
    #[must_use]
    pub fn new(aggregate_id: Identity) -> Self {
        Self::with_clock(aggregate_id, Arc::new(SystemClock))
    }

    /// Creates a recorder stamping messages with `clock`.
    #[must_use]
    pub fn with_clock(aggregate_id: Identity, clock: Arc<dyn Clock>) -> Self {
        Self {
            aggregate_id,
            applied: 0,
            uncommitted: Vec::new(),
            clock,
            lifecycle: Lifecycle::Fresh,
        }
    }

    /// Returns the aggregate identifier.
    #[must_use]
    pub fn aggregate_id(&self) -> &Identity {
        &self.aggregate_id
    }

    /// Returns the 0-based index of the last applied event, `-1` if none.
    #[must_use]
    pub fn playhead(&self) -> i64 {
        i64::try_from(self.applied).unwrap_or(i64::MAX) - 1
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Returns the buffered events without draining them.
    #[must_use]
    pub fn uncommitted(&self) -> &[DomainMessage<E>] {
        &self.uncommitted
    }

    /// Advances the playhead and buffers `event` as a new message.
    pub fn record(&mut self, event: E) {
        let playhead = self.applied;
        self.applied += 1;
        self.lifecycle = Lifecycle::Live;
        self.uncommitted.push(DomainMessage::recorded_at(
            self.aggregate_id.clone(),
            playhead,
            event,
            self.clock.as_ref(),
        ));
    }

    /// Drains the uncommitted buffer.
    pub fn take_uncommitted(&mut self) -> Vec<DomainMessage<E>> {
        std::mem::take(&mut self.uncommitted)
    }

    fn replayed(&mut self) {
        self.applied += 1;
    }
}

impl<E: Clone> Clone for EventRecorder<E> {
    fn clone(&self) -> Self {
        Self {
            aggregate_id: self.aggregate_id.clone(),
            applied: self.applied,
            uncommitted: self.uncommitted.clone(),
            clock: Arc::clone(&self.clock),
            lifecycle: self.lifecycle,
        }
    }
}

impl<E: DomainEvent> AggregateView for EventRecorder<E> {
    fn aggregate_id(&self) -> &Identity {
        &self.aggregate_id
    }

    fn playhead(&self) -> i64 {
        EventRecorder::playhead(self)
    }
}

impl<E> fmt::Debug for EventRecorder<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRecorder")
            .field("aggregate_id", &self.aggregate_id)
            .field("playhead", &self.playhead())
            .field("uncommitted", &self.uncommitted.len())
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Trait for aggregate roots that reconstitute from event history.
///
/// Implementors provide construction and access to their [`EventRecorder`];
/// applying, replaying and draining events are provided.
#[async_trait]
pub trait AggregateRoot: EventSourcedEntity + Sized + 'static {
    /// Creates an empty aggregate with the given identity.
    fn new(aggregate_id: Identity) -> Self;

    /// Returns the embedded recorder.
    fn recorder(&self) -> &EventRecorder<Self::Event>;

    /// Returns the embedded recorder mutably.
    fn recorder_mut(&mut self) -> &mut EventRecorder<Self::Event>;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> &Identity {
        self.recorder().aggregate_id()
    }

    /// Returns the playhead, `-1` before any event.
    fn playhead(&self) -> i64 {
        self.recorder().playhead()
    }

    /// Returns the lifecycle state.
    fn lifecycle(&self) -> Lifecycle {
        self.recorder().lifecycle()
    }

    /// Returns `true` if there are events waiting to be saved.
    fn has_uncommitted_events(&self) -> bool {
        !self.recorder().uncommitted().is_empty()
    }

    /// Handles `event` on the whole entity tree and buffers it.
    fn apply(&mut self, event: Self::Event) {
        handle_recursively(self, &event);
        self.recorder_mut().record(event);
    }

    /// Drains the uncommitted buffer into a stream.
    ///
    /// A second call without intervening `apply` yields an empty stream.
    fn get_uncommitted_events(&mut self) -> DomainEventStream<Self::Event> {
        DomainEventStream::of(self.recorder_mut().take_uncommitted())
    }

    /// Replays historical messages in order without buffering them.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `stream`; messages handled before
    /// it remain applied.
    async fn initialize_state(
        &mut self,
        mut stream: DomainEventStream<Self::Event>,
    ) -> Result<(), DomainError> {
        self.recorder_mut().lifecycle = Lifecycle::Replaying;
        while let Some(item) = stream.next().await {
            let message = item?;
            self.recorder_mut().replayed();
            handle_recursively(self, &message.payload);
        }
        self.recorder_mut().lifecycle = Lifecycle::Live;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{AggregateRoot, EventRecorder, EventSourcedEntity};
    use crate::event::fixtures::TestEvent;
    use crate::identity::Identity;

    /// Counts every event it sees.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct Counter {
        pub(crate) seen: usize,
    }

    impl EventSourcedEntity for Counter {
        type Event = TestEvent;

        fn handle(&mut self, _event: &TestEvent) {
            self.seen += 1;
        }
    }

    /// Named aggregate with two counting children.
    #[derive(Debug, Clone)]
    pub(crate) struct Named {
        pub(crate) recorder: EventRecorder<TestEvent>,
        pub(crate) name: Option<String>,
        pub(crate) children: Vec<Counter>,
    }

    impl Named {
        pub(crate) fn create(id: &str, name: &str) -> Self {
            let mut named = Self::new(Identity::new(id));
            named.apply(TestEvent::Created { name: name.into() });
            named
        }

        pub(crate) fn rename(&mut self, name: &str) {
            self.apply(TestEvent::Renamed { name: name.into() });
        }
    }

    impl EventSourcedEntity for Named {
        type Event = TestEvent;

        fn handle(&mut self, event: &TestEvent) {
            match event {
                TestEvent::Created { name } | TestEvent::Renamed { name } => {
                    self.name = Some(name.clone());
                }
                TestEvent::Ignored => {}
            }
        }

        fn child_entities(&mut self) -> Vec<&mut dyn EventSourcedEntity<Event = TestEvent>> {
            self.children
                .iter_mut()
                .map(|c| c as &mut dyn EventSourcedEntity<Event = TestEvent>)
                .collect()
        }
    }

    impl AggregateRoot for Named {
        fn new(aggregate_id: Identity) -> Self {
            Self {
                recorder: EventRecorder::new(aggregate_id),
                name: None,
                children: vec![Counter::default(), Counter::default()],
            }
        }

        fn recorder(&self) -> &EventRecorder<TestEvent> {
            &self.recorder
        }

        fn recorder_mut(&mut self) -> &mut EventRecorder<TestEvent> {
            &mut self.recorder
        }
    }
}
