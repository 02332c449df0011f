use std::collections::HashMap;
use std::sync::Mutex;

use lakegate_core::{OffsetToken, StreamId};

use super::r#trait::{AdvanceOutcome, LedgerError, OffsetLedger, StreamCheckpoint};

/// In-memory offset ledger.
///
/// Intended for tests/dev. The compare-and-set runs under one mutex, which
/// gives the same atomicity the production backends get from conditional
/// writes.
#[derive(Debug, Default)]
pub struct InMemoryOffsetLedger {
    checkpoints: Mutex<HashMap<StreamId, StreamCheckpoint>>,
}

impl InMemoryOffsetLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffsetLedger for InMemoryOffsetLedger {
    fn get(&self, stream_id: &StreamId) -> Result<Option<StreamCheckpoint>, LedgerError> {
        let checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;

        Ok(checkpoints.get(stream_id).cloned())
    }

    fn advance(
        &self,
        stream_id: &StreamId,
        candidate: &OffsetToken,
    ) -> Result<AdvanceOutcome, LedgerError> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;

        match checkpoints.get(stream_id) {
            Some(existing) if candidate <= &existing.cursor => Ok(AdvanceOutcome::Rejected),
            _ => {
                checkpoints.insert(
                    stream_id.clone(),
                    StreamCheckpoint::new(stream_id.clone(), candidate.clone()),
                );
                Ok(AdvanceOutcome::Accepted)
            }
        }
    }

    fn reset(&self, stream_id: &StreamId) -> Result<(), LedgerError> {
        let mut checkpoints = self
            .checkpoints
            .lock()
            .map_err(|_| LedgerError::Storage("lock poisoned".to_string()))?;

        checkpoints.remove(stream_id);
        Ok(())
    }
}
