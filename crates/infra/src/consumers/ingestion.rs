//! Live-write ingestion.

use std::sync::Arc;

use tracing::{info, instrument};

use lakegate_core::KeyMapping;
use lakegate_events::{EventType, ObjectWriteNotification, QueueChannel, RetryPolicy, UpdateDigest};

use crate::channel::send_with_retry;
use crate::object_store::ObjectStore;

use super::pipeline::{ApplyOutcome, ConsumerError, UpdatePipeline};

/// Processes one live-write notification at a time.
///
/// Each notification is resolved against the object store (the notification
/// itself carries no payload or version), run through the shared update
/// pipeline, and, when accepted, announced downstream as one digest.
///
/// The consumer is strictly serial: its worker host dequeues one delivery at
/// a time, so two in-flight updates can never race past each other's
/// checkpoint advance inside a single host. Cross-resource ordering is not
/// required and not provided.
pub struct IngestionConsumer<D> {
    mapping: KeyMapping,
    objects: Arc<dyn ObjectStore>,
    pipeline: Arc<UpdatePipeline>,
    digests: D,
    publish_retry: RetryPolicy,
}

impl<D> IngestionConsumer<D>
where
    D: QueueChannel<UpdateDigest>,
{
    pub fn new(
        mapping: KeyMapping,
        objects: Arc<dyn ObjectStore>,
        pipeline: Arc<UpdatePipeline>,
        digests: D,
    ) -> Self {
        Self {
            mapping,
            objects,
            pipeline,
            digests,
            publish_retry: RetryPolicy::publish_default(),
        }
    }

    pub fn with_publish_retry(mut self, policy: RetryPolicy) -> Self {
        self.publish_retry = policy;
        self
    }

    /// Handle one notification.
    ///
    /// Any error leaves the delivery unacknowledged; the transport redelivers
    /// and eventually dead-letters it.
    #[instrument(skip(self), fields(object_key = %notification.object_key))]
    pub fn handle(
        &self,
        notification: &ObjectWriteNotification,
    ) -> Result<ApplyOutcome, ConsumerError> {
        if notification.event_type != EventType::Created {
            return Err(ConsumerError::UnsupportedEvent(notification.event_type));
        }

        let resource_id = self.mapping.resource_id_for(&notification.object_key)?;
        let stream_id = self.mapping.stream_id();

        // The fetched last-modified is authoritative for last-write-wins; a
        // newer concurrent write simply wins twice.
        let fetched = self.objects.get_latest(&notification.object_key)?;
        let offset = fetched.version.offset();
        let timestamp = fetched.version.last_modified;

        let outcome = self.pipeline.apply_update(
            resource_id,
            fetched.body,
            timestamp,
            &stream_id,
            offset,
        )?;

        if let ApplyOutcome::Applied {
            resource_id,
            offset,
            ..
        } = &outcome
        {
            let digest = UpdateDigest {
                resource_id: resource_id.clone(),
                offset: offset.clone(),
            };
            send_with_retry(&self.digests, digest, &self.publish_retry, "digest")
                .map_err(ConsumerError::Publish)?;

            info!(
                resource_id = %resource_id,
                offset = %offset,
                "projection updated from live write"
            );
        }

        Ok(outcome)
    }
}
