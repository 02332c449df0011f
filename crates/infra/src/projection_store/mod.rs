//! Projection store: last-write-wins materialized resource state.
//!
//! Each resource has a single projection row, mutated in place through an
//! atomic conditional write comparing source timestamps. Racing writers on
//! the same resource never both win.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryProjectionStore;
pub use postgres::PostgresProjectionStore;
pub use r#trait::{ProjectionStore, ProjectionStoreError, ResourceProjection, UpsertOutcome};
