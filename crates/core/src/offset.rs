//! Ordered offset tokens marking scan progress within a stream.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::VersionId;
use crate::key::ObjectKey;

/// A position within a stream of object versions.
///
/// Ordering is `(last_modified, key, version_id)`: the object store's own
/// version ordering, not wall-clock arrival order, so live and replay
/// advances interleave safely.
///
/// The string encoding is `"{rfc3339-millis-utc} {key} {version_id}"`. The
/// timestamp is rendered fixed-width UTC, so lexicographic order over
/// encodings equals token order; key-value backends can compare tokens as
/// plain text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OffsetToken {
    last_modified: DateTime<Utc>,
    key: ObjectKey,
    version_id: VersionId,
}

impl OffsetToken {
    pub fn new(last_modified: DateTime<Utc>, key: ObjectKey, version_id: VersionId) -> Self {
        Self {
            last_modified,
            key,
            version_id,
        }
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn version_id(&self) -> &VersionId {
        &self.version_id
    }

    /// Canonical string encoding (also the `Display` form).
    pub fn encode(&self) -> String {
        format!(
            "{} {} {}",
            self.last_modified
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            self.key,
            self.version_id
        )
    }

    /// Decode a token previously produced by [`OffsetToken::encode`].
    pub fn decode(encoded: &str) -> DomainResult<Self> {
        let (ts, rest) = encoded
            .split_once(' ')
            .ok_or_else(|| DomainError::invalid_token(encoded))?;
        let (key, version_id) = rest
            .rsplit_once(' ')
            .ok_or_else(|| DomainError::invalid_token(encoded))?;

        let last_modified = DateTime::parse_from_rfc3339(ts)
            .map_err(|e| DomainError::invalid_token(format!("{encoded}: {e}")))?
            .with_timezone(&Utc);

        Ok(Self {
            last_modified,
            key: ObjectKey::new(key)?,
            version_id: VersionId::new(version_id)?,
        })
    }
}

impl core::fmt::Display for OffsetToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.encode())
    }
}

impl core::str::FromStr for OffsetToken {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
