use anyhow::Result;
use std::env;

/// Driver selection and queue-bridge defaults for the event dispatcher.
///
/// `driver` is one of `sync`, `null`, `queue`, `custom`; `sync` and `null`
/// install no async driver. `queue`/`priority`/`delay` are the queue
/// driver's defaults, overridable per publication.
#[derive(Debug, Clone)]
pub struct EventsConfig {
    pub driver: String,
    pub queue: String,
    pub priority: i32,
    pub delay: Option<i64>,
    pub custom_driver: Option<String>,
}

impl EventsConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            driver: env::var("EVENTS_DRIVER").unwrap_or_else(|_| "sync".to_string()),
            queue: env::var("EVENTS_QUEUE_NAME").unwrap_or_else(|_| "events".to_string()),
            priority: env::var("EVENTS_QUEUE_PRIORITY")
                .unwrap_or_else(|_| "9".to_string())
                .parse::<i32>()
                .unwrap_or(9)
                .clamp(0, 10),
            delay: env::var("EVENTS_QUEUE_DELAY").ok().and_then(|v| v.parse().ok()),
            custom_driver: env::var("EVENTS_CUSTOM_DRIVER").ok(),
        })
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            driver: "sync".to_string(),
            queue: "events".to_string(),
            priority: 9,
            delay: None,
            custom_driver: None,
        }
    }
}
