use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::app::events::dispatcher;

use super::{BackoffStrategy, Job};

pub const EVENT_JOB_NAME: &str = "EventJob";

/// Bridge, worker side: a queued event waiting to be re-published.
///
/// The payload is the stable wire format written by the queue event driver:
/// `event_name`, a nested-JSON-encoded `event_data` string, and a
/// `published_at` timestamp. Decoding is deliberately tolerant — queued rows
/// outlive code changes, so malformed fields degrade instead of erroring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventJob {
    pub event_name: Option<String>,
    pub event_data: Option<Value>,
    pub published_at: Option<String>,
}

impl EventJob {
    pub fn new(event_name: impl Into<String>, encoded_data: String, published_at: String) -> Self {
        Self {
            event_name: Some(event_name.into()),
            event_data: Some(Value::String(encoded_data)),
            published_at: Some(published_at),
        }
    }

    /// Absent, non-string, unparseable, and JSON-`null` event data all
    /// decode to an empty map.
    fn decode_event_data(&self) -> Value {
        match &self.event_data {
            Some(Value::String(encoded)) => match serde_json::from_str::<Value>(encoded) {
                Ok(Value::Null) | Err(_) => Value::Object(Map::new()),
                Ok(value) => value,
            },
            _ => Value::Object(Map::new()),
        }
    }
}

#[async_trait]
impl Job for EventJob {
    fn job_name(&self) -> &'static str {
        EVENT_JOB_NAME
    }

    async fn handle(&self) -> Result<()> {
        // A row without an event name is a no-op, not a failure: retrying
        // it would never produce anything to publish.
        let Some(event_name) = self.event_name.as_deref() else {
            return Ok(());
        };

        let payload = self.decode_event_data();

        let Some(dispatcher) = dispatcher::current() else {
            tracing::warn!(event = %event_name, "no event dispatcher installed, dropping queued event");
            return Ok(());
        };

        // Listener errors propagate so the executor counts this attempt
        // and applies the retry rules.
        dispatcher.trigger_sync(event_name, &payload)
    }

    fn max_attempts(&self) -> u32 {
        5
    }

    fn retry_delay(&self) -> i64 {
        30
    }

    fn backoff_strategy(&self) -> BackoffStrategy {
        BackoffStrategy::Exponential
    }

    fn queue_name(&self) -> &str {
        "events"
    }

    fn priority(&self) -> i32 {
        9
    }

    fn timeout(&self) -> Option<i64> {
        Some(60)
    }

    fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
