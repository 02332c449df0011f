//! Infrastructure channel implementations and publish helpers.
//!
//! The channel abstraction lives in `lakegate-events` as pure mechanics.
//! This module provides infrastructure-backed implementations (e.g. Redis)
//! and the bounded-retry publish used by the ingestion consumer and the
//! replay coordinator.

use tracing::warn;

use lakegate_events::{QueueChannel, RetryPolicy};

#[cfg(feature = "redis")]
pub mod redis_streams;
#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsError, RedisStreamsQueueChannel};

/// Publish a message with bounded retries and backoff.
///
/// Returns a description of the terminal failure once the policy's attempt
/// budget is exhausted; the caller decides whether that is fatal.
pub fn send_with_retry<M, C>(
    channel: &C,
    message: M,
    policy: &RetryPolicy,
    context: &str,
) -> Result<(), String>
where
    C: QueueChannel<M>,
    M: Clone,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match channel.send(message.clone()) {
            Ok(()) => return Ok(()),
            Err(err) if policy.should_retry(attempt) => {
                warn!(context, attempt, error = ?err, "publish failed; retrying");
                std::thread::sleep(policy.delay_for_attempt(attempt));
            }
            Err(err) => {
                return Err(format!(
                    "{context}: publish failed after {attempt} attempts: {err:?}"
                ));
            }
        }
    }
}
