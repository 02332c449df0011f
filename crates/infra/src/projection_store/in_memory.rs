use std::collections::HashMap;
use std::sync::Mutex;

use lakegate_core::ResourceId;

use super::r#trait::{ProjectionStore, ProjectionStoreError, ResourceProjection, UpsertOutcome};

/// In-memory projection store.
///
/// Intended for tests/dev. The conditional write runs under one mutex,
/// matching the atomicity of the production backends' conditional writes.
#[derive(Debug, Default)]
pub struct InMemoryProjectionStore {
    projections: Mutex<HashMap<ResourceId, ResourceProjection>>,
}

impl InMemoryProjectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.projections.lock().map(|p| p.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProjectionStore for InMemoryProjectionStore {
    fn get(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<ResourceProjection>, ProjectionStoreError> {
        let projections = self
            .projections
            .lock()
            .map_err(|_| ProjectionStoreError::Storage("lock poisoned".to_string()))?;

        Ok(projections.get(resource_id).cloned())
    }

    fn upsert_if_newer(
        &self,
        candidate: ResourceProjection,
    ) -> Result<UpsertOutcome, ProjectionStoreError> {
        let mut projections = self
            .projections
            .lock()
            .map_err(|_| ProjectionStoreError::Storage("lock poisoned".to_string()))?;

        match projections.get(&candidate.resource_id) {
            Some(existing) if candidate.source_timestamp <= existing.source_timestamp => {
                Ok(UpsertOutcome::Skipped)
            }
            _ => {
                projections.insert(candidate.resource_id.clone(), candidate);
                Ok(UpsertOutcome::Applied)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use lakegate_core::{ObjectKey, OffsetToken, VersionId};

    use super::*;

    fn projection(id: &str, payload: &[u8], secs: i64) -> ResourceProjection {
        let key = ObjectKey::new(format!("events/{id}.json")).unwrap();
        let timestamp = Utc.timestamp_opt(secs, 0).unwrap();
        ResourceProjection {
            resource_id: ResourceId::new(id).unwrap(),
            payload: payload.to_vec(),
            source_timestamp: timestamp,
            source_offset: OffsetToken::new(timestamp, key, VersionId::new("v1").unwrap()),
        }
    }

    #[test]
    fn first_write_is_applied() {
        let store = InMemoryProjectionStore::new();
        let outcome = store.upsert_if_newer(projection("main", b"A", 100)).unwrap();

        assert_eq!(outcome, UpsertOutcome::Applied);
        let stored = store
            .get(&ResourceId::new("main").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload, b"A");
    }

    #[test]
    fn newer_write_wins_regardless_of_arrival_order() {
        let store = InMemoryProjectionStore::new();

        store.upsert_if_newer(projection("main", b"newer", 200)).unwrap();
        let outcome = store.upsert_if_newer(projection("main", b"older", 100)).unwrap();

        assert_eq!(outcome, UpsertOutcome::Skipped);
        let stored = store
            .get(&ResourceId::new("main").unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload, b"newer");
        assert_eq!(stored.source_timestamp, Utc.timestamp_opt(200, 0).unwrap());
    }

    #[test]
    fn equal_timestamp_is_skipped() {
        let store = InMemoryProjectionStore::new();

        store.upsert_if_newer(projection("main", b"A", 100)).unwrap();
        let outcome = store.upsert_if_newer(projection("main", b"B", 100)).unwrap();

        assert_eq!(outcome, UpsertOutcome::Skipped);
        assert_eq!(
            store
                .get(&ResourceId::new("main").unwrap())
                .unwrap()
                .unwrap()
                .payload,
            b"A"
        );
    }

    #[test]
    fn racing_writers_with_the_same_precondition_produce_one_winner() {
        let store = Arc::new(InMemoryProjectionStore::new());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                let payload = format!("writer-{i}");
                store
                    .upsert_if_newer(projection("main", payload.as_bytes(), 100))
                    .unwrap()
            }));
        }

        let applied = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(UpsertOutcome::is_applied)
            .count();

        assert_eq!(applied, 1);
    }
}
