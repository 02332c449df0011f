//! Message shapes carried on the bridge's channels.
//!
//! All three channels deliver at-least-once and unordered across objects;
//! consumers must be idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lakegate_core::{ObjectKey, OffsetToken, ResourceId, VersionId};

/// Kind of object-store write that produced a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Removed,
}

/// A live object-store write notification.
///
/// Carries no version id: the live path fetches the current object, and the
/// fetched last-modified timestamp is authoritative for last-write-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectWriteNotification {
    pub object_key: ObjectKey,
    pub event_type: EventType,
    pub occurred_at: DateTime<Utc>,
}

impl ObjectWriteNotification {
    pub fn created(object_key: ObjectKey, occurred_at: DateTime<Utc>) -> Self {
        Self {
            object_key,
            event_type: EventType::Created,
            occurred_at,
        }
    }
}

/// Reference to one historical object version, sufficient to re-fetch the
/// object deterministically even if newer versions have since been written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoricalObjectRef {
    pub object_key: ObjectKey,
    pub last_modified: DateTime<Utc>,
    pub version_id: VersionId,
}

impl HistoricalObjectRef {
    /// The offset token this version occupies in its stream.
    pub fn offset(&self) -> OffsetToken {
        OffsetToken::new(
            self.last_modified,
            self.object_key.clone(),
            self.version_id.clone(),
        )
    }
}

/// Downstream digest published after every accepted ingestion update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateDigest {
    pub resource_id: ResourceId,
    pub offset: OffsetToken,
}
