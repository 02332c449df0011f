//! Worker hosts for the bridge consumers.

pub mod consumer_worker;

pub use consumer_worker::{ConsumerWorker, IntakeControl, IntakeError, IntakeGate, WorkerHandle};
