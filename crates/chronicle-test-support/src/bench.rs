//! Given/when/then test bench for aggregates.
//!
//! A [`TestBench`] is an explicit builder: every `given`, `when` and `then_*`
//! call only queues a step. Nothing touches a store or a bus until
//! [`TestBench::run`] executes the steps in order against a fresh
//! [`RecordingEventStore`], an [`AsynchronousDomainEventBus`] and an
//! [`EventSourcingRepository`] whose messages are stamped by a [`FixedClock`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::bus::{AsynchronousDomainEventBus, DomainEventBus, EventListener};
use chronicle_core::decorator::OverrideDateDecorator;
use chronicle_core::error::DomainError;
use chronicle_core::event::DomainMessage;
use chronicle_core::identity::Identity;
use chronicle_core::repository::EventSourcingRepository;
use chronicle_core::store::EventStore;
use futures::future::BoxFuture;

use crate::bus::RecordingEventBus;
use crate::clock::FixedClock;
use crate::store::RecordingEventStore;

/// Why a bench run failed.
#[derive(Debug, thiserror::Error)]
pub enum TestBenchError {
    #[error("bench setup failed: {0}")]
    Setup(#[source] DomainError),

    #[error("when step failed: {0}")]
    Step(#[source] DomainError),

    #[error("unexpected events for {aggregate_id}: expected {expected}, got {actual}")]
    UnexpectedEvents {
        aggregate_id: Identity,
        expected: String,
        actual: String,
    },

    #[error("expected {expected} published messages, got {actual}")]
    UnexpectedPublishedCount { expected: usize, actual: usize },

    #[error("event bus reported an error: {0}")]
    Bus(#[source] DomainError),
}

/// What a successful run appended and published.
#[derive(Debug, Clone)]
pub struct TestBenchReport<E> {
    /// Messages appended by `when` steps, in append order. Seeded history is
    /// not included.
    pub appended: Vec<DomainMessage<E>>,
    /// Messages delivered through the bus, in publish order.
    pub published: Vec<DomainMessage<E>>,
}

struct BenchContext<A: AggregateRoot> {
    clock: FixedClock,
    store: Arc<RecordingEventStore<A::Event>>,
    bus: AsynchronousDomainEventBus<A::Event>,
    published: RecordingEventBus<A::Event>,
    repository: Arc<EventSourcingRepository<A>>,
}

impl<A: AggregateRoot> BenchContext<A> {
    fn new(clock: FixedClock) -> Self {
        let store = Arc::new(RecordingEventStore::new());
        let bus = AsynchronousDomainEventBus::new();
        let published = RecordingEventBus::new(Arc::new(bus.clone()));

        let dyn_store: Arc<dyn EventStore<A::Event>> = store.clone();
        let dyn_bus: Arc<dyn DomainEventBus<A::Event>> = Arc::new(published.clone());
        let repository = EventSourcingRepository::<A>::new(dyn_store, dyn_bus)
            .with_decorator(Arc::new(OverrideDateDecorator::new(Arc::new(clock))));

        Self {
            clock,
            store,
            bus,
            published,
            repository: Arc::new(repository),
        }
    }
}

type Step<A> =
    Box<dyn FnOnce(Arc<BenchContext<A>>) -> BoxFuture<'static, Result<(), TestBenchError>> + Send>;

/// Scenario builder for one aggregate type.
pub struct TestBench<A: AggregateRoot> {
    clock: FixedClock,
    listeners: Vec<Arc<dyn EventListener<A::Event>>>,
    steps: Vec<Step<A>>,
}

impl<A: AggregateRoot> TestBench<A> {
    /// Creates an empty bench stamping messages with [`FixedClock::epoch`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(FixedClock::epoch())
    }

    /// Creates an empty bench stamping messages with `clock`.
    #[must_use]
    pub fn with_clock(clock: FixedClock) -> Self {
        Self {
            clock,
            listeners: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Seeds history for `id`, continuing from whatever was seeded before.
    ///
    /// Seeded messages go straight into the store: they are neither
    /// published nor reported as appended.
    #[must_use]
    pub fn given(
        mut self,
        id: impl Into<Identity>,
        events: impl IntoIterator<Item = A::Event>,
    ) -> Self {
        let id = id.into();
        let events: Vec<A::Event> = events.into_iter().collect();
        self.steps.push(Box::new(
            move |ctx: Arc<BenchContext<A>>| -> BoxFuture<'static, Result<(), TestBenchError>> {
                Box::pin(async move {
                    let first = ctx.store.inner().next_playhead(&id);
                    let messages = events
                        .into_iter()
                        .zip(first..)
                        .map(|(event, playhead)| {
                            DomainMessage::recorded_at(id.clone(), playhead, event, &ctx.clock)
                        })
                        .collect();
                    ctx.store
                        .inner()
                        .append_messages(&id, messages)
                        .map_err(TestBenchError::Setup)
                })
            },
        ));
        self
    }

    /// Subscribes `listener` to the bench's bus before any step runs.
    #[must_use]
    pub fn given_listener(mut self, listener: Arc<dyn EventListener<A::Event>>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Runs `step` against the bench's repository.
    #[must_use]
    pub fn when<F, Fut>(mut self, step: F) -> Self
    where
        F: FnOnce(Arc<EventSourcingRepository<A>>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), DomainError>> + Send + 'static,
    {
        self.steps.push(Box::new(
            move |ctx: Arc<BenchContext<A>>| -> BoxFuture<'static, Result<(), TestBenchError>> {
                Box::pin(async move {
                    step(Arc::clone(&ctx.repository))
                        .await
                        .map_err(TestBenchError::Step)
                })
            },
        ));
        self
    }

    /// Expects the events appended for `id` by `when` steps so far to equal
    /// `expected`.
    #[must_use]
    pub fn then_events(mut self, id: impl Into<Identity>, expected: Vec<A::Event>) -> Self
    where
        A::Event: PartialEq,
    {
        let id = id.into();
        self.steps.push(Box::new(
            move |ctx: Arc<BenchContext<A>>| -> BoxFuture<'static, Result<(), TestBenchError>> {
                Box::pin(async move {
                    let actual: Vec<A::Event> = ctx
                        .store
                        .appended_for(&id)
                        .into_iter()
                        .map(|message| message.payload)
                        .collect();
                    if actual == expected {
                        Ok(())
                    } else {
                        Err(TestBenchError::UnexpectedEvents {
                            aggregate_id: id,
                            expected: format!("{expected:?}"),
                            actual: format!("{actual:?}"),
                        })
                    }
                })
            },
        ));
        self
    }

    /// Waits for the bus to drain, then expects `count` messages to have
    /// been published so far.
    #[must_use]
    pub fn then_published(mut self, count: usize) -> Self {
        self.steps.push(Box::new(
            move |ctx: Arc<BenchContext<A>>| -> BoxFuture<'static, Result<(), TestBenchError>> {
                Box::pin(async move {
                    ctx.bus.until_idle().await;
                    let actual = ctx.published.messages().len();
                    if actual == count {
                        Ok(())
                    } else {
                        Err(TestBenchError::UnexpectedPublishedCount {
                            expected: count,
                            actual,
                        })
                    }
                })
            },
        ));
        self
    }

    /// Executes every queued step in order.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error, or `TestBenchError::Bus` if a
    /// listener or published stream failed.
    pub async fn run(self) -> Result<TestBenchReport<A::Event>, TestBenchError> {
        let ctx = Arc::new(BenchContext::<A>::new(self.clock));
        for listener in self.listeners {
            ctx.published
                .subscribe(listener)
                .map_err(TestBenchError::Setup)?;
        }
        for step in self.steps {
            step(Arc::clone(&ctx)).await?;
        }
        ctx.bus.try_until_idle().await.map_err(TestBenchError::Bus)?;

        Ok(TestBenchReport {
            appended: ctx.store.appended_messages(),
            published: ctx.published.messages(),
        })
    }
}

impl<A: AggregateRoot> Default for TestBench<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: AggregateRoot> fmt::Debug for TestBench<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestBench")
            .field("clock", &self.clock)
            .field("listeners", &self.listeners.len())
            .field("steps", &self.steps.len())
            .finish()
    }
}
