//! Message channel abstraction (queue mechanics only).
//!
//! This module provides the **queue channel pattern** used by every bridge
//! channel (live notifications, replay references, downstream digests).
//!
//! ## Design Philosophy
//!
//! The channel is intentionally **lightweight** and makes minimal assumptions:
//!
//! - **Transport-agnostic**: works with in-memory queues, Redis Streams,
//!   hosted queue services, etc.
//! - **At-least-once delivery**: a leased message that is never acknowledged
//!   becomes visible again and is redelivered; consumers must be idempotent
//! - **No cross-message ordering**: messages for different objects may arrive
//!   in any order (per-key FIFO is not assumed)
//! - **No silent loss**: a message that exhausts its redelivery budget is
//!   moved to a dead-letter shelf, never dropped
//!
//! ## Why At-Least-Once?
//!
//! The object store is the source of truth; projections apply a last-write-
//! wins rule and the checkpoint ledger advances through compare-and-set, so
//! reprocessing a delivery is always safe. At-least-once keeps the transport
//! contract simple and lets recovery lean on redelivery instead of
//! transactional acknowledgement.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Receipt identifying one in-flight delivery (not the message itself: each
/// redelivery gets a fresh receipt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryReceipt(Uuid);

impl DeliveryReceipt {
    /// Create a new receipt (UUIDv7, time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeliveryReceipt {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for DeliveryReceipt {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// One delivery of a message, leased to the receiver until acknowledged or
/// until its visibility window lapses.
#[derive(Debug, Clone)]
pub struct Delivery<M> {
    receipt: DeliveryReceipt,
    message: M,
    receive_count: u32,
}

impl<M> Delivery<M> {
    pub fn new(receipt: DeliveryReceipt, message: M, receive_count: u32) -> Self {
        Self {
            receipt,
            message,
            receive_count,
        }
    }

    pub fn receipt(&self) -> DeliveryReceipt {
        self.receipt
    }

    pub fn message(&self) -> &M {
        &self.message
    }

    pub fn into_message(self) -> M {
        self.message
    }

    /// How many times this message has been delivered, this delivery included.
    pub fn receive_count(&self) -> u32 {
        self.receive_count
    }
}

/// At-least-once message channel with visibility timeouts and dead-lettering.
///
/// ## Delivery lifecycle
///
/// 1. `send` enqueues a message.
/// 2. `receive` leases the next visible message; the lease lasts one
///    visibility window.
/// 3. `ack` removes the message permanently. A delivery that is never
///    acknowledged becomes visible again after the window and is redelivered
///    with an incremented receive count.
/// 4. A message whose receive count reaches the channel's dispatch policy
///    maximum is moved to the dead-letter shelf for manual inspection.
///
/// ## Error Handling
///
/// `send` and `receive` surface transport errors to the caller; a consumer
/// that fails mid-processing simply does not acknowledge, and redelivery does
/// the rest.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; multiple threads may publish
/// concurrently. Receiving is designed for a single consumer per channel
/// (the bridge serializes each role onto one worker).
pub trait QueueChannel<M>: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    /// Enqueue a message for delivery.
    fn send(&self, message: M) -> Result<(), Self::Error>;

    /// Lease the next visible message, if any.
    fn receive(&self) -> Result<Option<Delivery<M>>, Self::Error>;

    /// Acknowledge a delivery, removing the message permanently.
    ///
    /// Acknowledging an expired receipt is an error: the message has already
    /// been returned for redelivery.
    fn ack(&self, receipt: DeliveryReceipt) -> Result<(), Self::Error>;
}

impl<M, C> QueueChannel<M> for Arc<C>
where
    C: QueueChannel<M> + ?Sized,
{
    type Error = C::Error;

    fn send(&self, message: M) -> Result<(), Self::Error> {
        (**self).send(message)
    }

    fn receive(&self) -> Result<Option<Delivery<M>>, Self::Error> {
        (**self).receive()
    }

    fn ack(&self, receipt: DeliveryReceipt) -> Result<(), Self::Error> {
        (**self).ack(receipt)
    }
}
