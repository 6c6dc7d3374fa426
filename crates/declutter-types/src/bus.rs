//! Worker bus envelope types.
//!
//! An [`Envelope`] wraps one [`BusMessage`] addressed from one worker to
//! another. Envelopes carry a time-to-live; an envelope that is not
//! delivered in time is dropped and logged at `warn` level.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::{StageRequest, StageResult};

/// Payload carried on the worker bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum BusMessage {
    Request(StageRequest),
    Result(StageResult),
}

impl BusMessage {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Request(r) => r.session_id(),
            Self::Result(r) => r.session_id(),
        }
    }
}

/// A message in flight between two worker addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Uuid,
    pub from: String,
    pub to: String,
    pub message: BusMessage,
    #[serde(
        serialize_with = "serialize_duration_secs",
        deserialize_with = "deserialize_duration_secs"
    )]
    pub ttl: Duration,
    #[serde(default = "now_millis")]
    pub created_at_ms: i64,
}

impl Envelope {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        message: BusMessage,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            message,
            ttl,
            created_at_ms: now_millis(),
        }
    }

    pub fn is_expired(&self) -> bool {
        let elapsed_ms = now_millis() - self.created_at_ms;
        elapsed_ms > self.ttl.as_millis() as i64
    }
}

/// Errors from the worker bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("address not found: {0}")]
    AddressNotFound(String),

    /// Backpressure: the recipient's bounded inbox is full.
    #[error("inbox full for address: {0}")]
    InboxFull(String),

    #[error("message expired (ttl: {ttl:?})")]
    MessageExpired { ttl: Duration },
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn serialize_duration_secs<S>(d: &Duration, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_u64(d.as_secs())
}

fn deserialize_duration_secs<'de, D>(d: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let secs = u64::deserialize(d)?;
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::message::{ImageRef, Job};

    fn detect() -> BusMessage {
        BusMessage::Request(StageRequest::Detect {
            job: Job::new(
                "s1",
                ImageRef {
                    path: PathBuf::from("a.jpg"),
                    captured_at_ms: 0,
                },
                0,
            ),
        })
    }

    #[test]
    fn fresh_envelope_not_expired() {
        let env = Envelope::new("coordinator", "detector", detect(), Duration::from_secs(60));
        assert!(!env.is_expired());
        assert_eq!(env.message.session_id(), "s1");
    }

    #[test]
    fn old_envelope_expired() {
        let mut env = Envelope::new("coordinator", "detector", detect(), Duration::from_secs(1));
        env.created_at_ms -= 5_000;
        assert!(env.is_expired());
    }

    #[test]
    fn ttl_serializes_as_seconds() {
        let env = Envelope::new("a", "b", detect(), Duration::from_secs(30));
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["ttl"], 30);
        assert_eq!(json["message"]["kind"], "request");
        let back: Envelope = serde_json::from_value(json).unwrap();
        assert_eq!(back.ttl, Duration::from_secs(30));
        assert_eq!(back.id, env.id);
    }

    #[test]
    fn error_display() {
        let err = BusError::AddressNotFound("pricer".into());
        assert_eq!(err.to_string(), "address not found: pricer");
    }
}
