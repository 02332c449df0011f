//! The bridge consumers.
//!
//! Two call sites, one update rule: the ingestion and replay consumers differ
//! only in their message source and digest fan-out; both funnel through the
//! shared [`UpdatePipeline`].

pub mod ingestion;
pub mod pipeline;
pub mod replay;

pub use ingestion::IngestionConsumer;
pub use pipeline::{ApplyOutcome, ConsumerError, UpdatePipeline};
pub use replay::ReplayConsumer;
