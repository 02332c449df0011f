//! In-memory queue channel for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

use crate::channel::{Delivery, DeliveryReceipt, QueueChannel};
use crate::dispatch::DispatchPolicy;

#[derive(Debug)]
pub enum InMemoryChannelError {
    /// Internal lock poisoning.
    Poisoned,
    /// Acknowledgement for a receipt that is no longer leased (expired or
    /// already acknowledged).
    UnknownReceipt(DeliveryReceipt),
}

/// A message that exhausted its redelivery budget.
#[derive(Debug, Clone)]
pub struct DeadLetter<M> {
    pub message: M,
    pub receive_count: u32,
}

#[derive(Debug)]
struct Queued<M> {
    message: M,
    receive_count: u32,
}

#[derive(Debug)]
struct InFlight<M> {
    message: M,
    receive_count: u32,
    visible_at: Instant,
}

#[derive(Debug)]
struct ChannelState<M> {
    ready: VecDeque<Queued<M>>,
    in_flight: HashMap<DeliveryReceipt, InFlight<M>>,
    dead_letters: Vec<DeadLetter<M>>,
}

/// In-memory at-least-once queue.
///
/// - No IO / no async
/// - Visibility timeouts and receive counts per the channel's
///   [`DispatchPolicy`]
/// - Intended for tests/dev. Not optimized for performance.
#[derive(Debug)]
pub struct InMemoryQueueChannel<M> {
    policy: DispatchPolicy,
    state: Mutex<ChannelState<M>>,
}

impl<M> InMemoryQueueChannel<M> {
    pub fn new(policy: DispatchPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(ChannelState {
                ready: VecDeque::new(),
                in_flight: HashMap::new(),
                dead_letters: Vec::new(),
            }),
        }
    }

    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Number of messages ready for delivery (in-flight leases excluded).
    pub fn ready_len(&self) -> usize {
        self.state.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    /// Return expired leases to the queue, dead-lettering any message whose
    /// receive count has reached the policy maximum.
    fn requeue_expired(state: &mut ChannelState<M>, max_receive_count: u32, now: Instant) {
        let expired: Vec<DeliveryReceipt> = state
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(receipt, _)| *receipt)
            .collect();

        for receipt in expired {
            if let Some(entry) = state.in_flight.remove(&receipt) {
                if entry.receive_count >= max_receive_count {
                    state.dead_letters.push(DeadLetter {
                        message: entry.message,
                        receive_count: entry.receive_count,
                    });
                } else {
                    state.ready.push_back(Queued {
                        message: entry.message,
                        receive_count: entry.receive_count,
                    });
                }
            }
        }
    }
}

impl<M> Default for InMemoryQueueChannel<M> {
    fn default() -> Self {
        Self::new(DispatchPolicy::default())
    }
}

impl<M> InMemoryQueueChannel<M>
where
    M: Clone,
{
    /// Snapshot of the dead-letter shelf (manual inspection/replay).
    pub fn dead_letters(&self) -> Vec<DeadLetter<M>> {
        self.state
            .lock()
            .map(|s| s.dead_letters.clone())
            .unwrap_or_default()
    }
}

impl<M> QueueChannel<M> for InMemoryQueueChannel<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryChannelError;

    fn send(&self, message: M) -> Result<(), Self::Error> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| InMemoryChannelError::Poisoned)?;
        state.ready.push_back(Queued {
            message,
            receive_count: 0,
        });
        Ok(())
    }

    fn receive(&self) -> Result<Option<Delivery<M>>, Self::Error> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| InMemoryChannelError::Poisoned)?;

        let now = Instant::now();
        Self::requeue_expired(&mut state, self.policy.max_receive_count, now);

        let Some(next) = state.ready.pop_front() else {
            return Ok(None);
        };

        let receipt = DeliveryReceipt::new();
        let receive_count = next.receive_count + 1;
        state.in_flight.insert(
            receipt,
            InFlight {
                message: next.message.clone(),
                receive_count,
                visible_at: now + self.policy.visibility_timeout,
            },
        );

        Ok(Some(Delivery::new(receipt, next.message, receive_count)))
    }

    fn ack(&self, receipt: DeliveryReceipt) -> Result<(), Self::Error> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| InMemoryChannelError::Poisoned)?;

        state
            .in_flight
            .remove(&receipt)
            .map(|_| ())
            .ok_or(InMemoryChannelError::UnknownReceipt(receipt))
    }
}
