use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Mutex, MutexGuard};

use super::{EventDriver, PublishOptions};

/// One recorded publication.
#[derive(Debug, Clone)]
pub struct Publication {
    pub event: String,
    pub payload: Value,
    pub options: PublishOptions,
}

/// Driver that goes nowhere. In silent mode publications are discarded; in
/// recording mode they are kept in order for assertions.
pub struct NullDriver {
    recording: bool,
    publications: Mutex<Vec<Publication>>,
}

impl NullDriver {
    pub fn silent() -> Self {
        Self {
            recording: false,
            publications: Mutex::new(Vec::new()),
        }
    }

    pub fn recording() -> Self {
        Self {
            recording: true,
            publications: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.buffer().len()
    }

    pub fn was_published(&self, event: &str) -> bool {
        self.buffer().iter().any(|p| p.event == event)
    }

    pub fn publications_of(&self, event: &str) -> Vec<Publication> {
        self.buffer().iter().filter(|p| p.event == event).cloned().collect()
    }

    pub fn clear(&self) {
        self.buffer().clear();
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<Publication>> {
        self.publications.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl EventDriver for NullDriver {
    async fn publish(&self, event: &str, payload: &Value, options: &PublishOptions) -> Result<()> {
        if self.recording {
            self.buffer().push(Publication {
                event: event.to_string(),
                payload: payload.clone(),
                options: options.clone(),
            });
        }
        Ok(())
    }

    fn is_available(&self) -> bool {
        true
    }

    fn driver_name(&self) -> &'static str {
        "null"
    }
}
