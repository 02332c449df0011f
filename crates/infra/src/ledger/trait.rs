use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lakegate_core::{OffsetToken, StreamId};

/// The last durably processed position of a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCheckpoint {
    pub stream_id: StreamId,
    /// Opaque ordered position within the stream.
    pub cursor: OffsetToken,
    /// Timestamp of the object version that produced the cursor.
    pub last_seen_at: DateTime<Utc>,
}

impl StreamCheckpoint {
    pub fn new(stream_id: StreamId, cursor: OffsetToken) -> Self {
        let last_seen_at = cursor.last_modified();
        Self {
            stream_id,
            cursor,
            last_seen_at,
        }
    }
}

/// Outcome of a checkpoint advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The candidate was forward progress and is now the stored cursor.
    Accepted,
    /// Another consumer already recorded equal-or-greater progress. Not an
    /// error: the stream is at least as far along as the caller believed.
    Rejected,
}

impl AdvanceOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AdvanceOutcome::Accepted)
    }
}

/// Ledger operation error.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger storage error: {0}")]
    Storage(String),

    #[error("stored checkpoint is corrupt: {0}")]
    Corrupt(String),
}

/// Key-value ledger mapping a stream id to its checkpoint.
///
/// ## Advance Semantics
///
/// `advance` is a **compare-and-set**: the candidate cursor is stored only if
/// it represents forward progress relative to the stored cursor, where the
/// ordering is the object store's own version ordering (token order), not
/// wall-clock time alone, since the live and replay paths interleave on the
/// same streams. Implementations must perform the comparison as an atomic
/// conditional write against the backing store, never read-then-write.
///
/// ## Reset
///
/// `reset` removes a checkpoint entirely. It exists only for the explicit
/// administrative replay-from-scratch action; nothing in normal operation
/// deletes checkpoints.
pub trait OffsetLedger: Send + Sync {
    fn get(&self, stream_id: &StreamId) -> Result<Option<StreamCheckpoint>, LedgerError>;

    /// Advance the stream's cursor if `candidate` is forward progress.
    fn advance(
        &self,
        stream_id: &StreamId,
        candidate: &OffsetToken,
    ) -> Result<AdvanceOutcome, LedgerError>;

    /// Discard the stream's checkpoint (administrative replay-from-scratch).
    fn reset(&self, stream_id: &StreamId) -> Result<(), LedgerError>;
}

impl<L> OffsetLedger for Arc<L>
where
    L: OffsetLedger + ?Sized,
{
    fn get(&self, stream_id: &StreamId) -> Result<Option<StreamCheckpoint>, LedgerError> {
        (**self).get(stream_id)
    }

    fn advance(
        &self,
        stream_id: &StreamId,
        candidate: &OffsetToken,
    ) -> Result<AdvanceOutcome, LedgerError> {
        (**self).advance(stream_id, candidate)
    }

    fn reset(&self, stream_id: &StreamId) -> Result<(), LedgerError> {
        (**self).reset(stream_id)
    }
}
