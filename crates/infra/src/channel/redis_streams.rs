//! Redis Streams-backed queue channel (durable, at-least-once delivery).
//!
//! This implementation uses Redis Streams (XADD/XREADGROUP) to provide:
//! - **Durable delivery**: Messages persist until acknowledged
//! - **At-least-once**: Unacknowledged messages are redelivered once their
//!   pending lease exceeds the visibility window (XCLAIM)
//! - **Dead-letter handling**: Messages past the max receive count move to a
//!   DLQ stream, never dropped
//!
//! ## Architecture
//!
//! - **Stream Key**: one stream per bridge channel (live/replay/digest)
//! - **Consumer Group**: one group per channel; the bridge runs one named
//!   consumer per role, so delivery stays serialized
//! - **Dead-Letter Queue**: `{stream}:dlq`

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use lakegate_events::{Delivery, DeliveryReceipt, DispatchPolicy, QueueChannel};

#[derive(Debug, thiserror::Error)]
pub enum RedisStreamsError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("unknown delivery receipt: {0}")]
    UnknownReceipt(DeliveryReceipt),
}

/// Redis Streams queue channel for one bridge channel.
pub struct RedisStreamsQueueChannel<M> {
    client: Arc<redis::Client>,
    stream_key: String,
    dlq_key: String,
    group: String,
    consumer: String,
    policy: DispatchPolicy,
    /// Receipt → stream entry id for in-flight deliveries.
    receipts: Mutex<HashMap<DeliveryReceipt, String>>,
    _marker: PhantomData<fn() -> M>,
}

impl<M> RedisStreamsQueueChannel<M> {
    /// Create a channel over `stream_key`, ensuring its consumer group exists.
    pub fn new(
        redis_url: impl AsRef<str>,
        stream_key: impl Into<String>,
        policy: DispatchPolicy,
    ) -> Result<Self, RedisStreamsError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))?;

        let stream_key = stream_key.into();
        let channel = Self {
            client: Arc::new(client),
            dlq_key: format!("{stream_key}:dlq"),
            group: format!("{stream_key}:group"),
            consumer: "worker-1".to_string(),
            stream_key,
            policy,
            receipts: Mutex::new(HashMap::new()),
            _marker: PhantomData,
        };

        channel.ensure_consumer_group()?;
        Ok(channel)
    }

    fn connection(&self) -> Result<redis::Connection, RedisStreamsError> {
        self.client
            .get_connection()
            .map_err(|e| RedisStreamsError::Connection(e.to_string()))
    }

    /// Ensure the consumer group exists (idempotent).
    fn ensure_consumer_group(&self) -> Result<(), RedisStreamsError> {
        let mut conn = self.connection()?;

        // XGROUP CREATE with MKSTREAM creates the stream if it doesn't exist.
        // "0" starts the group at the beginning of the stream. An
        // already-exists error is ignored.
        let _: Result<String, _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut conn);

        Ok(())
    }

    /// Move an entry to the DLQ stream and retire it from the source stream.
    fn dead_letter(
        &self,
        conn: &mut redis::Connection,
        entry_id: &str,
        payload: &str,
        receive_count: u32,
    ) -> Result<(), RedisStreamsError> {
        let _: String = redis::cmd("XADD")
            .arg(&self.dlq_key)
            .arg("*")
            .arg("original_entry_id")
            .arg(entry_id)
            .arg("receive_count")
            .arg(receive_count.to_string())
            .arg("failed_at")
            .arg(chrono::Utc::now().to_rfc3339())
            .arg("payload")
            .arg(payload)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("DLQ XADD failed: {e}")))?;

        self.retire(conn, entry_id)?;

        warn!(
            entry_id = %entry_id,
            receive_count,
            "message moved to dead-letter stream"
        );

        Ok(())
    }

    fn retire(
        &self,
        conn: &mut redis::Connection,
        entry_id: &str,
    ) -> Result<(), RedisStreamsError> {
        let _: u64 = redis::cmd("XACK")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg(entry_id)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XACK failed: {e}")))?;

        let _: u64 = redis::cmd("XDEL")
            .arg(&self.stream_key)
            .arg(entry_id)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XDEL failed: {e}")))?;

        Ok(())
    }

    /// Fetch the raw payload field of one stream entry.
    fn entry_payload(
        &self,
        conn: &mut redis::Connection,
        entry_id: &str,
    ) -> Result<Option<String>, RedisStreamsError> {
        let entries: redis::Value = redis::cmd("XRANGE")
            .arg(&self.stream_key)
            .arg(entry_id)
            .arg(entry_id)
            .query(conn)
            .map_err(|e| RedisStreamsError::Command(format!("XRANGE failed: {e}")))?;

        Ok(parse_entries(entries)?
            .into_iter()
            .next()
            .and_then(|(_, fields)| fields.get("payload").cloned()))
    }

    /// Expired pending entries: `(entry_id, receive_count)` pairs whose idle
    /// time exceeds the visibility window.
    fn expired_pending(
        &self,
        conn: &mut redis::Connection,
    ) -> Result<Vec<(String, u32)>, RedisStreamsError> {
        let pending: Vec<(String, String, u64, u64)> = match redis::cmd("XPENDING")
            .arg(&self.stream_key)
            .arg(&self.group)
            .arg("-")
            .arg("+")
            .arg("10")
            .query(conn)
        {
            Ok(entries) => entries,
            Err(_) => return Ok(vec![]),
        };

        let visibility_ms = self.policy.visibility_timeout.as_millis() as u64;
        Ok(pending
            .into_iter()
            .filter(|(_, _, idle_ms, _)| *idle_ms >= visibility_ms)
            .map(|(id, _, _, count)| (id, count as u32))
            .collect())
    }
}

impl<M> QueueChannel<M> for RedisStreamsQueueChannel<M>
where
    M: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    type Error = RedisStreamsError;

    fn send(&self, message: M) -> Result<(), Self::Error> {
        let payload = serde_json::to_string(&message)
            .map_err(|e| RedisStreamsError::Serialization(e.to_string()))?;

        let mut conn = self.connection()?;

        // XADD with auto-generated ID (*).
        let _: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("payload")
            .arg(&payload)
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XADD failed: {e}")))?;

        Ok(())
    }

    fn receive(&self) -> Result<Option<Delivery<M>>, Self::Error> {
        let mut conn = self.connection()?;

        // Expired leases first: redeliver or dead-letter.
        for (entry_id, receive_count) in self.expired_pending(&mut conn)? {
            if receive_count >= self.policy.max_receive_count {
                if let Some(payload) = self.entry_payload(&mut conn, &entry_id)? {
                    self.dead_letter(&mut conn, &entry_id, &payload, receive_count)?;
                } else {
                    self.retire(&mut conn, &entry_id)?;
                }
                continue;
            }

            // XCLAIM re-leases the entry to this consumer and bumps its
            // delivery counter.
            let claimed: redis::Value = redis::cmd("XCLAIM")
                .arg(&self.stream_key)
                .arg(&self.group)
                .arg(&self.consumer)
                .arg(self.policy.visibility_timeout.as_millis() as u64)
                .arg(&entry_id)
                .query(&mut conn)
                .map_err(|e| RedisStreamsError::Command(format!("XCLAIM failed: {e}")))?;

            if let Some((id, fields)) = parse_entries(claimed)?.into_iter().next() {
                return self
                    .delivery_from_fields(&id, &fields, receive_count + 1)
                    .map(Some);
            }
        }

        // No expired leases: read one new entry.
        let result: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg("1")
            .arg("STREAMS")
            .arg(&self.stream_key)
            .arg(">")
            .query(&mut conn)
            .map_err(|e| RedisStreamsError::Command(format!("XREADGROUP failed: {e}")))?;

        let Some((id, fields)) = parse_read_reply(result, &self.stream_key)?.into_iter().next()
        else {
            return Ok(None);
        };

        self.delivery_from_fields(&id, &fields, 1).map(Some)
    }

    fn ack(&self, receipt: DeliveryReceipt) -> Result<(), Self::Error> {
        let entry_id = {
            let mut receipts = self
                .receipts
                .lock()
                .map_err(|_| RedisStreamsError::Command("receipt lock poisoned".to_string()))?;
            receipts
                .remove(&receipt)
                .ok_or(RedisStreamsError::UnknownReceipt(receipt))?
        };

        let mut conn = self.connection()?;
        self.retire(&mut conn, &entry_id)
    }
}

impl<M> RedisStreamsQueueChannel<M>
where
    M: DeserializeOwned,
{
    fn delivery_from_fields(
        &self,
        entry_id: &str,
        fields: &HashMap<String, String>,
        receive_count: u32,
    ) -> Result<Delivery<M>, RedisStreamsError> {
        let payload = fields
            .get("payload")
            .ok_or_else(|| RedisStreamsError::Deserialization("missing payload field".to_string()))?;

        let message: M = serde_json::from_str(payload)
            .map_err(|e| RedisStreamsError::Deserialization(e.to_string()))?;

        let receipt = DeliveryReceipt::new();
        self.receipts
            .lock()
            .map_err(|_| RedisStreamsError::Command("receipt lock poisoned".to_string()))?
            .insert(receipt, entry_id.to_string());

        Ok(Delivery::new(receipt, message, receive_count))
    }
}

/// Parse `[[entry_id, [field, value, ...]], ...]`.
fn parse_entries(
    value: redis::Value,
) -> Result<Vec<(String, HashMap<String, String>)>, RedisStreamsError> {
    let entries = match value {
        redis::Value::Bulk(v) => v,
        redis::Value::Nil => return Ok(vec![]),
        _ => {
            return Err(RedisStreamsError::Deserialization(
                "invalid entry list format".to_string(),
            ));
        }
    };

    let mut parsed = Vec::new();
    for entry in entries {
        let redis::Value::Bulk(entry_vec) = entry else {
            continue;
        };
        if entry_vec.len() < 2 {
            continue;
        }

        let redis::Value::Data(id_bytes) = &entry_vec[0] else {
            continue;
        };
        let id = String::from_utf8_lossy(id_bytes).to_string();

        let redis::Value::Bulk(fields_vec) = &entry_vec[1] else {
            continue;
        };

        let mut fields = HashMap::new();
        for chunk in fields_vec.chunks(2) {
            if let [redis::Value::Data(key), redis::Value::Data(value)] = chunk {
                fields.insert(
                    String::from_utf8_lossy(key).to_string(),
                    String::from_utf8_lossy(value).to_string(),
                );
            }
        }

        parsed.push((id, fields));
    }

    Ok(parsed)
}

/// Parse an XREADGROUP reply down to the entries of `stream_key`.
fn parse_read_reply(
    value: redis::Value,
    stream_key: &str,
) -> Result<Vec<(String, HashMap<String, String>)>, RedisStreamsError> {
    let streams = match value {
        redis::Value::Bulk(v) => v,
        redis::Value::Nil => return Ok(vec![]),
        _ => {
            return Err(RedisStreamsError::Deserialization(
                "invalid XREADGROUP reply".to_string(),
            ));
        }
    };

    for stream in streams {
        let redis::Value::Bulk(pair) = stream else {
            continue;
        };
        if pair.len() < 2 {
            continue;
        }

        let matches_key = match &pair[0] {
            redis::Value::Data(name) => String::from_utf8_lossy(name) == stream_key,
            _ => false,
        };

        if matches_key {
            return parse_entries(pair[1].clone());
        }
    }

    Ok(vec![])
}
