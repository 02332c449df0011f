use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lakegate_core::{ObjectKey, OffsetToken, VersionId};

/// One immutable version of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub key: ObjectKey,
    pub version_id: VersionId,
    pub last_modified: DateTime<Utc>,
}

impl ObjectVersion {
    /// The offset token this version occupies in its stream.
    pub fn offset(&self) -> OffsetToken {
        OffsetToken::new(self.last_modified, self.key.clone(), self.version_id.clone())
    }
}

/// A fetched object body with its authoritative version metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedObject {
    pub version: ObjectVersion,
    pub body: Vec<u8>,
}

/// One page of a version listing, in stream order (oldest first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionPage {
    pub versions: Vec<ObjectVersion>,
    /// Present when more pages follow; pass back to continue the scan.
    pub next: Option<OffsetToken>,
}

/// Object store operation error.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object not found: {key} (version {version_id:?})")]
    NotFound {
        key: ObjectKey,
        version_id: Option<VersionId>,
    },

    #[error("object store request failed: {0}")]
    Transient(String),
}

/// Versioned object store with paginated listing and prefix filters.
///
/// Listing order is the store's own version ordering (token order
/// `(last_modified, key, version_id)`), so a scan resumed from a token never
/// revisits or skips a version.
pub trait ObjectStore: Send + Sync {
    /// List object versions under a prefix, strictly after `after`, up to
    /// `limit` entries.
    fn list_versions(
        &self,
        prefix: &str,
        after: Option<&OffsetToken>,
        limit: usize,
    ) -> Result<VersionPage, ObjectStoreError>;

    /// Fetch the current version of an object.
    fn get_latest(&self, key: &ObjectKey) -> Result<FetchedObject, ObjectStoreError>;

    /// Fetch one specific version of an object, even if newer versions exist.
    fn get_version(
        &self,
        key: &ObjectKey,
        version_id: &VersionId,
    ) -> Result<FetchedObject, ObjectStoreError>;
}

impl<S> ObjectStore for Arc<S>
where
    S: ObjectStore + ?Sized,
{
    fn list_versions(
        &self,
        prefix: &str,
        after: Option<&OffsetToken>,
        limit: usize,
    ) -> Result<VersionPage, ObjectStoreError> {
        (**self).list_versions(prefix, after, limit)
    }

    fn get_latest(&self, key: &ObjectKey) -> Result<FetchedObject, ObjectStoreError> {
        (**self).get_latest(key)
    }

    fn get_version(
        &self,
        key: &ObjectKey,
        version_id: &VersionId,
    ) -> Result<FetchedObject, ObjectStoreError> {
        (**self).get_version(key, version_id)
    }
}
