//! Object keys and the key → id mapping rules.

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{ResourceId, StreamId};

/// A full object key within the bucket (e.g. `events/branches/main.json`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Create a new key. Rejects empty keys and absolute paths.
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.is_empty() {
            return Err(DomainError::validation("object key must not be empty"));
        }
        if value.starts_with('/') {
            return Err(DomainError::validation(format!(
                "object key must be bucket-relative (got '{value}')"
            )));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl core::str::FromStr for ObjectKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Deterministic mapping from object keys to logical ids, scoped to one
/// bucket + key prefix.
///
/// The resource id is the key minus the configured prefix and minus the file
/// extension of the final segment. Keys outside the prefix are rejected
/// rather than silently projected into a foreign stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMapping {
    bucket: String,
    prefix: String,
}

impl KeyMapping {
    /// Create a mapping. The prefix may be empty (whole-bucket scope) but must
    /// be bucket-relative.
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> DomainResult<Self> {
        let bucket = bucket.into();
        let prefix = prefix.into();
        if bucket.is_empty() {
            return Err(DomainError::validation("bucket must not be empty"));
        }
        if prefix.starts_with('/') {
            return Err(DomainError::validation(format!(
                "key prefix must be bucket-relative (got '{prefix}')"
            )));
        }
        Ok(Self { bucket, prefix })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The stream identifier for this scope: `"{bucket}/{prefix}"`.
    pub fn stream_id(&self) -> StreamId {
        StreamId::new(format!("{}/{}", self.bucket, self.prefix))
            .unwrap_or_else(|_| unreachable!("bucket is validated non-empty"))
    }

    /// Whether a key falls inside this mapping's prefix.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        key.as_str().starts_with(&self.prefix)
    }

    /// Derive the logical resource id for an object key.
    ///
    /// `events/branches/main.json` with prefix `events/branches/` becomes
    /// `main`; with prefix `events/` it becomes `branches/main`.
    pub fn resource_id_for(&self, key: &ObjectKey) -> DomainResult<ResourceId> {
        let relative = key.as_str().strip_prefix(&self.prefix).ok_or_else(|| {
            DomainError::validation(format!(
                "key '{key}' is outside prefix '{}'",
                self.prefix
            ))
        })?;

        // Strip the extension from the final segment only; dots inside
        // directory segments are part of the id.
        let stripped = match relative.rsplit_once('/') {
            Some((dir, file)) => {
                let stem = file.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(file);
                format!("{dir}/{stem}")
            }
            None => relative
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(relative)
                .to_string(),
        };

        ResourceId::new(stripped).map_err(|_| {
            DomainError::validation(format!(
                "key '{key}' yields an empty resource id under prefix '{}'",
                self.prefix
            ))
        })
    }
}
