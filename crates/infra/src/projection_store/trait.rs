use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lakegate_core::{OffsetToken, ResourceId};

/// The materialized, last-write-wins current state of a logical resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProjection {
    pub resource_id: ResourceId,
    /// Opaque object payload (no schema validation).
    pub payload: Vec<u8>,
    /// Timestamp of the object version that produced this state.
    pub source_timestamp: DateTime<Utc>,
    /// Position of that version within its stream.
    pub source_offset: OffsetToken,
}

/// Outcome of a conditional projection write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The candidate was strictly newer and is now the stored state.
    Applied,
    /// The stored state is at least as new; the candidate was discarded.
    /// A defined no-op, not an error.
    Skipped,
}

impl UpsertOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, UpsertOutcome::Applied)
    }
}

/// Projection store operation error.
#[derive(Debug, Error)]
pub enum ProjectionStoreError {
    #[error("projection storage error: {0}")]
    Storage(String),

    #[error("stored projection is corrupt: {0}")]
    Corrupt(String),
}

/// Key-value store of resource projections.
///
/// `upsert_if_newer` must be a single atomic conditional write keyed by
/// resource id, comparing `source_timestamp` strictly. Of two simultaneous
/// conditional writes with the same precondition, at most one succeeds; the
/// loser observes `Skipped`.
pub trait ProjectionStore: Send + Sync {
    fn get(&self, resource_id: &ResourceId)
        -> Result<Option<ResourceProjection>, ProjectionStoreError>;

    /// Store the candidate if its timestamp is strictly newer than the
    /// current state (or no state exists).
    fn upsert_if_newer(
        &self,
        candidate: ResourceProjection,
    ) -> Result<UpsertOutcome, ProjectionStoreError>;
}

impl<S> ProjectionStore for Arc<S>
where
    S: ProjectionStore + ?Sized,
{
    fn get(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<ResourceProjection>, ProjectionStoreError> {
        (**self).get(resource_id)
    }

    fn upsert_if_newer(
        &self,
        candidate: ResourceProjection,
    ) -> Result<UpsertOutcome, ProjectionStoreError> {
        (**self).upsert_if_newer(candidate)
    }
}
