//! Domain event bus.
//!
//! Listeners declare the event types they handle up front through
//! [`EventListener::handled_event_types`]; the bus builds its routing table
//! from those declarations at subscription time.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::DomainError;
use crate::event::{DomainEvent, DomainMessage};
use crate::stream::DomainEventStream;

/// Reacts to published domain messages.
#[async_trait]
pub trait EventListener<E: DomainEvent>: Send + Sync {
    /// Event type names this listener is bound to.
    fn handled_event_types(&self) -> &'static [&'static str];

    /// Handles one message whose event type is in the table above.
    async fn handle(&self, message: &DomainMessage<E>) -> Result<(), DomainError>;

    /// Name used in errors and logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Publishes domain messages to subscribed listeners.
pub trait DomainEventBus<E: DomainEvent>: Send + Sync {
    /// Binds `listener` to every event type it declares.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NoHandlers` if the listener declares no types.
    fn subscribe(&self, listener: Arc<dyn EventListener<E>>) -> Result<(), DomainError>;

    /// Queues `stream` for delivery to listeners.
    fn publish(&self, stream: DomainEventStream<E>);
}

/// Callback receiving every error captured by the bus.
pub type ErrorHandler = Arc<dyn Fn(&DomainError) + Send + Sync>;

type ListenerTable<E> = HashMap<&'static str, Vec<Arc<dyn EventListener<E>>>>;

struct QueueState<E> {
    pending: VecDeque<DomainEventStream<E>>,
    processing: bool,
}

struct Inner<E: DomainEvent> {
    listeners: RwLock<ListenerTable<E>>,
    state: Mutex<QueueState<E>>,
    idle: watch::Sender<bool>,
    error_handler: Option<ErrorHandler>,
    first_error: Mutex<Option<DomainError>>,
}

/// Event bus delivering streams on a background tokio task.
///
/// Streams are processed one at a time in the order they were published.
/// Within a message, listeners run sequentially in subscription order. A
/// failing listener or stream does not stop the bus: the error is passed to
/// the error handler, logged, and the first one is kept for
/// [`AsynchronousDomainEventBus::try_until_idle`].
///
/// Cloning yields another handle to the same bus.
pub struct AsynchronousDomainEventBus<E: DomainEvent> {
    inner: Arc<Inner<E>>,
}

impl<E: DomainEvent> Clone for AsynchronousDomainEventBus<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: DomainEvent> fmt::Debug for AsynchronousDomainEventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsynchronousDomainEventBus")
            .field("idle", &*self.inner.idle.borrow())
            .finish_non_exhaustive()
    }
}

impl<E: DomainEvent> AsynchronousDomainEventBus<E> {
    /// Creates a bus with no error handler.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a bus passing every captured error to `handler`.
    #[must_use]
    pub fn with_error_handler<F>(handler: F) -> Self
    where
        F: Fn(&DomainError) + Send + Sync + 'static,
    {
        Self::build(Some(Arc::new(handler)))
    }

    fn build(error_handler: Option<ErrorHandler>) -> Self {
        let (idle, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                listeners: RwLock::new(HashMap::new()),
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    processing: false,
                }),
                idle,
                error_handler,
                first_error: Mutex::new(None),
            }),
        }
    }

    /// Returns `true` if nothing is queued or being processed.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        *self.inner.idle.borrow()
    }

    /// Waits until every published stream has been fully processed.
    pub async fn until_idle(&self) {
        let mut receiver = self.inner.idle.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver.wait_for(|idle| *idle).await;
    }

    /// Returns the first captured error, if any, leaving it in place.
    #[must_use]
    pub fn first_error(&self) -> Option<DomainError> {
        self.inner.lock_first_error().clone()
    }

    /// Waits until idle, then returns and clears the first captured error.
    ///
    /// # Errors
    ///
    /// Returns the first listener or stream error captured since the last call.
    pub async fn try_until_idle(&self) -> Result<(), DomainError> {
        self.until_idle().await;
        match self.inner.lock_first_error().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl<E: DomainEvent> Default for AsynchronousDomainEventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: DomainEvent> DomainEventBus<E> for AsynchronousDomainEventBus<E> {
    fn subscribe(&self, listener: Arc<dyn EventListener<E>>) -> Result<(), DomainError> {
        let event_types = listener.handled_event_types();
        if event_types.is_empty() {
            return Err(DomainError::NoHandlers(listener.name().to_owned()));
        }
        let mut listeners = self
            .inner
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for event_type in event_types.iter().copied() {
            listeners
                .entry(event_type)
                .or_default()
                .push(Arc::clone(&listener));
        }
        debug!(listener = listener.name(), ?event_types, "subscribed listener");
        Ok(())
    }

    fn publish(&self, stream: DomainEventStream<E>) {
        let mut state = self.inner.lock_state();
        state.pending.push_back(stream);
        if state.processing {
            return;
        }
        match Handle::try_current() {
            Ok(handle) => {
                state.processing = true;
                self.inner.idle.send_replace(false);
                drop(state);
                handle.spawn(Inner::drain(Arc::clone(&self.inner)));
            }
            Err(e) => {
                state.pending.clear();
                drop(state);
                self.inner.capture(DomainError::Infrastructure(format!(
                    "event bus requires a tokio runtime: {e}"
                )));
            }
        }
    }
}

impl<E: DomainEvent> Inner<E> {
    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.lock_state();
                if let Some(stream) = state.pending.pop_front() {
                    stream
                } else {
                    state.processing = false;
                    self.idle.send_replace(true);
                    return;
                }
            };
            if let Err(panic) = AssertUnwindSafe(self.process(next)).catch_unwind().await {
                self.capture(DomainError::Infrastructure(format!(
                    "event stream panicked: {}",
                    panic_message(panic.as_ref())
                )));
            }
        }
    }

    async fn process(&self, mut stream: DomainEventStream<E>) {
        while let Some(item) = stream.next().await {
            match item {
                Ok(message) => self.dispatch(&message).await,
                Err(e) => self.capture(e),
            }
        }
    }

    async fn dispatch(&self, message: &DomainMessage<E>) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message.payload.event_type())
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            let failure = match AssertUnwindSafe(listener.handle(message))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };
            self.capture(DomainError::Listener {
                listener: listener.name().to_owned(),
                message: failure,
            });
        }
    }

    fn capture(&self, error: DomainError) {
        warn!(error = %error, "event bus captured error");
        if let Some(handler) = &self.error_handler {
            handler(&error);
        }
        self.lock_first_error().get_or_insert(error);
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_first_error(&self) -> MutexGuard<'_, Option<DomainError>> {
        self.first_error.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::stream;

    use super::*;
    use crate::event::fixtures::TestEvent;
    use crate::identity::Identity;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        log: Log,
        fail: bool,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail: false,
            })
        }

        fn failing(name: &'static str, log: &Log) -> Arc<Self> {
            Arc::new(Self {
                name,
                log: Arc::clone(log),
                fail: true,
            })
        }
    }

    #[async_trait]
    impl EventListener<TestEvent> for Recorder {
        fn handled_event_types(&self) -> &'static [&'static str] {
            &["test.created", "test.renamed"]
        }

        async fn handle(&self, message: &DomainMessage<TestEvent>) -> Result<(), DomainError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}@{}:{}", self.name, message.aggregate_id, message.playhead));
            if self.fail {
                return Err(DomainError::Validation("listener refused".into()));
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    struct Deaf;

    #[async_trait]
    impl EventListener<TestEvent> for Deaf {
        fn handled_event_types(&self) -> &'static [&'static str] {
            &[]
        }

        async fn handle(&self, _message: &DomainMessage<TestEvent>) -> Result<(), DomainError> {
            Ok(())
        }
    }

    struct Exploding;

    #[async_trait]
    impl EventListener<TestEvent> for Exploding {
        fn handled_event_types(&self) -> &'static [&'static str] {
            &["test.created"]
        }

        async fn handle(&self, message: &DomainMessage<TestEvent>) -> Result<(), DomainError> {
            if message.aggregate_id.as_str() == "boom" {
                panic!("exploding listener hit boom");
            }
            Ok(())
        }

        fn name(&self) -> &'static str {
            "exploding"
        }
    }

    fn created(id: &str, playhead: u64) -> DomainMessage<TestEvent> {
        DomainMessage::record_now(
            Identity::new(id),
            playhead,
            TestEvent::Created { name: id.into() },
        )
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_streams_are_processed_in_publish_order() {
        // Arrange
        let log: Log = Arc::default();
        let bus = AsynchronousDomainEventBus::<TestEvent>::new();
        bus.subscribe(Recorder::new("r", &log)).unwrap();

        // Act
        bus.publish(DomainEventStream::of(vec![created("a", 0), created("a", 1)]));
        bus.publish(DomainEventStream::of(vec![created("b", 0)]));
        bus.publish(DomainEventStream::of(vec![created("c", 0)]));
        bus.until_idle().await;

        // Assert
        assert_eq!(entries(&log), vec!["r@a:0", "r@a:1", "r@b:0", "r@c:0"]);
    }

    #[tokio::test]
    async fn test_listeners_run_in_subscription_order() {
        let log: Log = Arc::default();
        let bus = AsynchronousDomainEventBus::<TestEvent>::new();
        bus.subscribe(Recorder::new("second", &log)).unwrap();
        bus.subscribe(Recorder::new("first", &log)).unwrap();

        bus.publish(DomainEventStream::of(vec![created("a", 0)]));
        bus.until_idle().await;

        assert_eq!(entries(&log), vec!["second@a:0", "first@a:0"]);
    }

    #[tokio::test]
    async fn test_unrouted_events_are_skipped() {
        let log: Log = Arc::default();
        let bus = AsynchronousDomainEventBus::<TestEvent>::new();
        bus.subscribe(Recorder::new("r", &log)).unwrap();

        bus.publish(DomainEventStream::of(vec![DomainMessage::record_now(
            Identity::new("a"),
            0,
            TestEvent::Ignored,
        )]));
        bus.try_until_idle().await.unwrap();

        assert!(entries(&log).is_empty());
    }

    #[tokio::test]
    async fn test_listener_error_is_captured_and_processing_continues() {
        // Arrange
        let log: Log = Arc::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&calls);
        let bus = AsynchronousDomainEventBus::<TestEvent>::with_error_handler(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });
        bus.subscribe(Recorder::failing("bad", &log)).unwrap();
        bus.subscribe(Recorder::new("good", &log)).unwrap();

        // Act
        bus.publish(DomainEventStream::of(vec![created("a", 0), created("a", 1)]));
        let result = bus.try_until_idle().await;

        // Assert
        assert_eq!(
            entries(&log),
            vec!["bad@a:0", "good@a:0", "bad@a:1", "good@a:1"]
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            result,
            Err(DomainError::Listener { listener, .. }) if listener == "bad"
        ));
        assert!(bus.first_error().is_none());
    }

    #[tokio::test]
    async fn test_panicking_listener_is_captured_and_bus_keeps_delivering() {
        // Arrange
        let log: Log = Arc::default();
        let bus = AsynchronousDomainEventBus::<TestEvent>::new();
        bus.subscribe(Arc::new(Exploding)).unwrap();
        bus.subscribe(Recorder::new("r", &log)).unwrap();

        // Act
        bus.publish(DomainEventStream::of(vec![created("boom", 0)]));
        let first = tokio::time::timeout(Duration::from_secs(5), bus.try_until_idle())
            .await
            .expect("bus did not go idle after a listener panic");
        bus.publish(DomainEventStream::of(vec![created("a", 0)]));
        let second = tokio::time::timeout(Duration::from_secs(5), bus.try_until_idle())
            .await
            .expect("bus did not go idle after a later publish");

        // Assert
        assert!(matches!(
            first,
            Err(DomainError::Listener { listener, message })
                if listener == "exploding" && message.contains("exploding listener hit boom")
        ));
        assert!(second.is_ok());
        assert_eq!(entries(&log), vec!["r@boom:0", "r@a:0"]);
        assert!(bus.is_idle());
    }

    #[tokio::test]
    async fn test_stream_error_ends_that_stream_only() {
        let log: Log = Arc::default();
        let bus = AsynchronousDomainEventBus::<TestEvent>::new();
        bus.subscribe(Recorder::new("r", &log)).unwrap();

        bus.publish(DomainEventStream::from_stream(stream::iter(vec![
            Ok(created("a", 0)),
            Err(DomainError::Infrastructure("read failed".into())),
            Ok(created("a", 1)),
        ])));
        bus.publish(DomainEventStream::of(vec![created("b", 0)]));
        bus.until_idle().await;

        assert_eq!(entries(&log), vec!["r@a:0", "r@b:0"]);
        assert!(matches!(
            bus.first_error(),
            Some(DomainError::Infrastructure(_))
        ));
    }

    #[test]
    fn test_subscribe_without_handlers_fails() {
        let bus = AsynchronousDomainEventBus::<TestEvent>::new();

        let result = bus.subscribe(Arc::new(Deaf));

        assert!(matches!(result, Err(DomainError::NoHandlers(name)) if name.ends_with("Deaf")));
    }

    #[tokio::test]
    async fn test_until_idle_resolves_on_fresh_bus() {
        let bus = AsynchronousDomainEventBus::<TestEvent>::new();

        bus.until_idle().await;

        assert!(bus.is_idle());
    }
}
