use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

use crate::app::jobs::event_job::EventJob;
use crate::app::jobs::queue_manager::{DispatchOptions, QueueManager};
use crate::config::events::EventsConfig;

use super::{EventDriver, PublishOptions};

pub const DEFAULT_EVENT_QUEUE: &str = "events";
pub const DEFAULT_EVENT_PRIORITY: i32 = 9;

/// Bridge, publish side: serializes an event into an `EventJob` and hands it
/// to the queue manager. The worker-side `EventJob` later decodes the
/// payload and re-publishes synchronously.
pub struct QueueEventDriver {
    manager: Arc<QueueManager>,
    default_queue: String,
    default_priority: i32,
    default_delay: Option<i64>,
}

impl QueueEventDriver {
    pub fn new(manager: Arc<QueueManager>) -> Self {
        Self {
            manager,
            default_queue: DEFAULT_EVENT_QUEUE.to_string(),
            default_priority: DEFAULT_EVENT_PRIORITY,
            default_delay: None,
        }
    }

    pub fn from_config(manager: Arc<QueueManager>, config: &EventsConfig) -> Self {
        Self {
            manager,
            default_queue: config.queue.clone(),
            default_priority: config.priority,
            default_delay: config.delay,
        }
    }
}

#[async_trait]
impl EventDriver for QueueEventDriver {
    async fn publish(&self, event: &str, payload: &Value, options: &PublishOptions) -> Result<()> {
        // event_data is nested-encoded: a JSON string whose content is
        // itself JSON. This is the stable at-rest wire format.
        let encoded = serde_json::to_string(payload)?;
        let published_at = Utc::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let job = EventJob::new(event, encoded, published_at);

        let queue = options.queue.clone().unwrap_or_else(|| self.default_queue.clone());
        let priority = options.priority.unwrap_or(self.default_priority);
        // An explicit delay in options wins even when it is zero.
        let delay = match options.delay {
            Some(delay) => delay,
            None => self.default_delay.unwrap_or(0),
        };

        let dispatch = DispatchOptions {
            queue: Some(queue),
            priority: Some(priority),
            delay: Some(delay),
            ..Default::default()
        };

        self.manager.dispatch_with(&job, dispatch).await?;
        Ok(())
    }

    fn is_available(&self) -> bool {
        self.manager.is_enabled()
    }

    fn driver_name(&self) -> &'static str {
        "queue"
    }
}
