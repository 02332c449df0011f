//! Bridge messages and message-channel mechanics.

pub mod channel;
pub mod dispatch;
pub mod in_memory_channel;
pub mod message;

pub use channel::{Delivery, DeliveryReceipt, QueueChannel};
pub use dispatch::{BackoffStrategy, DispatchPolicy, RetryPolicy};
pub use in_memory_channel::{DeadLetter, InMemoryChannelError, InMemoryQueueChannel};
pub use message::{EventType, HistoricalObjectRef, ObjectWriteNotification, UpdateDigest};
