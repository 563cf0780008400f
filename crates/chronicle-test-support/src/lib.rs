//! Shared test doubles, the test bench and tracing setup for Chronicle.

mod bench;
mod bus;
mod clock;
mod store;
mod subscriber;

pub use bench::{TestBench, TestBenchError, TestBenchReport};
pub use bus::RecordingEventBus;
pub use clock::{FixedClock, SteppingClock};
pub use store::{FailingEventStore, RecordingEventStore};
pub use subscriber::init_tracing;
