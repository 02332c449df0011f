//! The shared idempotent update rule.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use lakegate_core::{DomainError, OffsetToken, ResourceId, StreamId};
use lakegate_events::EventType;

use crate::ledger::{AdvanceOutcome, LedgerError, OffsetLedger};
use crate::object_store::ObjectStoreError;
use crate::projection_store::{
    ProjectionStore, ProjectionStoreError, ResourceProjection, UpsertOutcome,
};

/// Outcome of one update application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The projection was updated; `checkpoint` records whether this update
    /// also advanced the stream cursor (a rejected advance means another
    /// consumer already recorded equal-or-greater progress; a defined no-op).
    Applied {
        resource_id: ResourceId,
        offset: OffsetToken,
        checkpoint: AdvanceOutcome,
    },
    /// The update was stale (not newer than the stored projection).
    /// Idempotent no-op, not an error.
    Skipped { resource_id: ResourceId },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

/// Consumer processing error. Every variant leaves the delivery
/// unacknowledged; the transport's redelivery and dead-lettering take over.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("unsupported event type: {0:?}")]
    UnsupportedEvent(EventType),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Projections(#[from] ProjectionStoreError),

    #[error("digest publish failed: {0}")]
    Publish(String),
}

/// The single update rule shared by the live and replay paths.
///
/// Applies the last-write-wins conditional write to the projection store and,
/// on success, attempts the forward-only checkpoint advance. Both mutations
/// are atomic conditional writes in their own stores; nothing here holds a
/// lock across the two calls, so consumers racing on the same resource or
/// stream converge regardless of interleaving.
pub struct UpdatePipeline {
    ledger: Arc<dyn OffsetLedger>,
    projections: Arc<dyn ProjectionStore>,
}

impl UpdatePipeline {
    pub fn new(ledger: Arc<dyn OffsetLedger>, projections: Arc<dyn ProjectionStore>) -> Self {
        Self {
            ledger,
            projections,
        }
    }

    pub fn apply_update(
        &self,
        resource_id: ResourceId,
        payload: Vec<u8>,
        timestamp: DateTime<Utc>,
        stream_id: &StreamId,
        offset: OffsetToken,
    ) -> Result<ApplyOutcome, ConsumerError> {
        let candidate = ResourceProjection {
            resource_id: resource_id.clone(),
            payload,
            source_timestamp: timestamp,
            source_offset: offset.clone(),
        };

        match self.projections.upsert_if_newer(candidate)? {
            UpsertOutcome::Skipped => {
                debug!(
                    resource_id = %resource_id,
                    %timestamp,
                    "stale update skipped"
                );
                Ok(ApplyOutcome::Skipped { resource_id })
            }
            UpsertOutcome::Applied => {
                let checkpoint = self.ledger.advance(stream_id, &offset)?;
                if !checkpoint.is_accepted() {
                    debug!(
                        stream_id = %stream_id,
                        offset = %offset,
                        "checkpoint advance rejected; stream already ahead"
                    );
                }
                Ok(ApplyOutcome::Applied {
                    resource_id,
                    offset,
                    checkpoint,
                })
            }
        }
    }
}
