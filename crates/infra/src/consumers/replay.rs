//! Historical replay ingestion.

use std::sync::Arc;

use tracing::{debug, instrument};

use lakegate_core::KeyMapping;
use lakegate_events::HistoricalObjectRef;

use crate::object_store::ObjectStore;

use super::pipeline::{ApplyOutcome, ConsumerError, UpdatePipeline};

/// Applies historical object references through the same update rule as the
/// live path.
///
/// Differences from [`IngestionConsumer`](super::IngestionConsumer):
/// - fetches the **pinned version** named by the reference, not the current
///   object, so a newer live write can never be re-read as history
/// - publishes no digests (replay is administrative; digests fan out live
///   progress only)
///
/// The last-write-wins comparison makes a stale historical reference a no-op
/// against a concurrently applied live write, and the forward-only checkpoint
/// compare-and-set keeps the cursor from regressing if live ingestion resumed
/// before replay finished a region.
pub struct ReplayConsumer {
    mapping: KeyMapping,
    objects: Arc<dyn ObjectStore>,
    pipeline: Arc<UpdatePipeline>,
}

impl ReplayConsumer {
    pub fn new(
        mapping: KeyMapping,
        objects: Arc<dyn ObjectStore>,
        pipeline: Arc<UpdatePipeline>,
    ) -> Self {
        Self {
            mapping,
            objects,
            pipeline,
        }
    }

    /// Handle one historical reference.
    #[instrument(skip(self), fields(object_key = %reference.object_key, version_id = %reference.version_id))]
    pub fn handle(&self, reference: &HistoricalObjectRef) -> Result<ApplyOutcome, ConsumerError> {
        let resource_id = self.mapping.resource_id_for(&reference.object_key)?;
        let stream_id = self.mapping.stream_id();

        let fetched = self
            .objects
            .get_version(&reference.object_key, &reference.version_id)?;

        let outcome = self.pipeline.apply_update(
            resource_id,
            fetched.body,
            reference.last_modified,
            &stream_id,
            reference.offset(),
        )?;

        if let ApplyOutcome::Skipped { resource_id } = &outcome {
            debug!(resource_id = %resource_id, "historical reference already superseded");
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use lakegate_core::ObjectKey;
    use lakegate_events::{DispatchPolicy, InMemoryQueueChannel, ObjectWriteNotification, UpdateDigest};

    use crate::consumers::IngestionConsumer;
    use crate::ledger::{InMemoryOffsetLedger, OffsetLedger};
    use crate::object_store::{InMemoryObjectStore, ObjectVersion};
    use crate::projection_store::{InMemoryProjectionStore, ProjectionStore};

    use super::*;

    struct Harness {
        replay: ReplayConsumer,
        ingestion: IngestionConsumer<Arc<InMemoryQueueChannel<UpdateDigest>>>,
        objects: Arc<InMemoryObjectStore>,
        ledger: Arc<InMemoryOffsetLedger>,
        projections: Arc<InMemoryProjectionStore>,
    }

    fn harness() -> Harness {
        let objects = Arc::new(InMemoryObjectStore::new());
        let ledger = Arc::new(InMemoryOffsetLedger::new());
        let projections = Arc::new(InMemoryProjectionStore::new());
        let mapping = KeyMapping::new("lake", "events/").unwrap();
        let pipeline = Arc::new(UpdatePipeline::new(ledger.clone(), projections.clone()));

        Harness {
            replay: ReplayConsumer::new(mapping.clone(), objects.clone(), pipeline.clone()),
            ingestion: IngestionConsumer::new(
                mapping,
                objects.clone(),
                pipeline,
                Arc::new(InMemoryQueueChannel::new(DispatchPolicy::default())),
            ),
            objects,
            ledger,
            projections,
        }
    }

    fn key(s: &str) -> ObjectKey {
        ObjectKey::new(s).unwrap()
    }

    fn reference(version: &ObjectVersion) -> HistoricalObjectRef {
        HistoricalObjectRef {
            object_key: version.key.clone(),
            last_modified: version.last_modified,
            version_id: version.version_id.clone(),
        }
    }

    #[test]
    fn replay_of_an_already_live_applied_write_is_skipped() {
        let h = harness();
        let version = h.objects.put(
            key("events/branches/main.json"),
            b"A".to_vec(),
            Utc.timestamp_opt(100, 0).unwrap(),
        );

        // Live path processed the write first.
        h.ingestion
            .handle(&ObjectWriteNotification::created(
                key("events/branches/main.json"),
                Utc.timestamp_opt(100, 0).unwrap(),
            ))
            .unwrap();

        // Replay then delivers the same version's historical reference.
        let outcome = h.replay.handle(&reference(&version)).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Skipped { .. }));

        let stored = h
            .projections
            .get(&"branches/main".parse().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(stored.payload, b"A");
        assert_eq!(stored.source_timestamp, Utc.timestamp_opt(100, 0).unwrap());
    }

    #[test]
    fn stale_replay_cannot_overwrite_a_newer_live_write() {
        let h = harness();

        // History: the resource at t=150.
        let old_version = h.objects.put(
            key("events/main.json"),
            b"old".to_vec(),
            Utc.timestamp_opt(150, 0).unwrap(),
        );
        // A newer live write at t=200, applied first.
        h.objects.put(
            key("events/main.json"),
            b"new".to_vec(),
            Utc.timestamp_opt(200, 0).unwrap(),
        );
        h.ingestion
            .handle(&ObjectWriteNotification::created(
                key("events/main.json"),
                Utc.timestamp_opt(200, 0).unwrap(),
            ))
            .unwrap();

        // The in-flight replay reference for t=150 lands afterwards.
        let outcome = h.replay.handle(&reference(&old_version)).unwrap();
        assert!(matches!(outcome, ApplyOutcome::Skipped { .. }));

        let stored = h.projections.get(&"main".parse().unwrap()).unwrap().unwrap();
        assert_eq!(stored.payload, b"new");
        assert_eq!(stored.source_timestamp, Utc.timestamp_opt(200, 0).unwrap());
    }

    #[test]
    fn replay_applies_then_live_write_still_wins() {
        let h = harness();

        let old_version = h.objects.put(
            key("events/main.json"),
            b"old".to_vec(),
            Utc.timestamp_opt(150, 0).unwrap(),
        );
        h.objects.put(
            key("events/main.json"),
            b"new".to_vec(),
            Utc.timestamp_opt(200, 0).unwrap(),
        );

        // Opposite completion order: replay first, then the live write.
        h.replay.handle(&reference(&old_version)).unwrap();
        h.ingestion
            .handle(&ObjectWriteNotification::created(
                key("events/main.json"),
                Utc.timestamp_opt(200, 0).unwrap(),
            ))
            .unwrap();

        let stored = h.projections.get(&"main".parse().unwrap()).unwrap().unwrap();
        assert_eq!(stored.payload, b"new");
        assert_eq!(stored.source_timestamp, Utc.timestamp_opt(200, 0).unwrap());
    }

    #[test]
    fn replay_behind_the_checkpoint_does_not_regress_it() {
        let h = harness();
        let mapping = KeyMapping::new("lake", "events/").unwrap();
        let stream = mapping.stream_id();

        let old_version = h.objects.put(
            key("events/a.json"),
            b"a-old".to_vec(),
            Utc.timestamp_opt(100, 0).unwrap(),
        );
        let newer_version = h.objects.put(
            key("events/b.json"),
            b"b".to_vec(),
            Utc.timestamp_opt(300, 0).unwrap(),
        );

        // Live ingestion already advanced the stream past t=100.
        h.ingestion
            .handle(&ObjectWriteNotification::created(
                key("events/b.json"),
                Utc.timestamp_opt(300, 0).unwrap(),
            ))
            .unwrap();
        let before = h.ledger.get(&stream).unwrap().unwrap().cursor;
        assert_eq!(before, newer_version.offset());

        // Replay for a different resource applies its projection but must not
        // pull the cursor backwards.
        let outcome = h.replay.handle(&reference(&old_version)).unwrap();
        assert!(outcome.is_applied());

        let after = h.ledger.get(&stream).unwrap().unwrap().cursor;
        assert_eq!(after, before);
    }
}
