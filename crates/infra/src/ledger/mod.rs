//! Offset ledger: the last durably processed position per stream.
//!
//! The ledger is the single synchronization point preventing checkpoint
//! regression. All mutation goes through an atomic compare-and-set keyed by
//! stream id; the ingestion and replay consumers race on it safely.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryOffsetLedger;
pub use postgres::PostgresOffsetLedger;
pub use r#trait::{AdvanceOutcome, LedgerError, OffsetLedger, StreamCheckpoint};
