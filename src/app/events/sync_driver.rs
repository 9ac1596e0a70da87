use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::resolver::{DirectResolver, ListenerResolver};
use super::{EventDriver, Handler, ListenerRegistry, PublishOptions};

/// Executes listeners in place, on the caller's execution context, in
/// `(-priority, insertion order)` order.
///
/// Iteration always runs over a snapshot taken before the first invocation,
/// so a listener may register, forget, or publish during its own invocation
/// without affecting the current dispatch; the next dispatch observes the
/// mutation.
pub struct SyncDriver {
    registry: Arc<RwLock<ListenerRegistry>>,
    resolver: Arc<dyn ListenerResolver>,
}

impl SyncDriver {
    pub fn new() -> Self {
        Self::with_resolver(Arc::new(DirectResolver::new()))
    }

    pub fn with_resolver(resolver: Arc<dyn ListenerResolver>) -> Self {
        Self {
            registry: Arc::new(RwLock::new(ListenerRegistry::new())),
            resolver,
        }
    }

    /// Publishes without going through the async driver seam. Listener
    /// errors are logged and skipped unless `options.stop_on_error` is set,
    /// in which case the first error propagates and the remaining listeners
    /// never run.
    pub fn publish_sync(&self, event: &str, payload: &Value, options: &PublishOptions) -> Result<()> {
        let snapshot = self.registry_read().get(event);

        for handler in snapshot {
            if let Err(e) = self.invoke(&handler, payload) {
                if options.stop_on_error {
                    return Err(e);
                }
                tracing::error!(event = %event, error = %e, "event listener failed");
            }
        }

        Ok(())
    }

    fn invoke(&self, handler: &Handler, payload: &Value) -> Result<()> {
        match handler {
            Handler::Closure(f) => f(payload),
            Handler::Instance(listener) => listener.handle(payload),
            Handler::ClassId(class_id) => match self.resolver.resolve(class_id) {
                Some(Handler::Closure(f)) => f(payload),
                Some(Handler::Instance(listener)) => listener.handle(payload),
                // Unresolvable or still-symbolic handlers are skipped silently.
                Some(Handler::ClassId(_)) | None => Ok(()),
            },
        }
    }

    pub fn add_listener(&self, event: &str, handler: Handler, priority: i32) {
        self.registry_write().add(event, handler, priority);
    }

    pub fn remove_listener(&self, event: &str, handler: Option<&Handler>) {
        self.registry_write().remove(event, handler);
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.registry_read().has(event)
    }

    pub fn get_listeners(&self, event: &str) -> Vec<Handler> {
        self.registry_read().get(event)
    }

    pub fn get_listeners_with_metadata(&self, event: &str) -> Vec<(Handler, i32)> {
        self.registry_read().get_with_metadata(event)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.registry_read().count(event)
    }

    pub fn events(&self) -> Vec<String> {
        self.registry_read().events()
    }

    pub fn clear(&self, event: Option<&str>) {
        self.registry_write().clear(event);
    }

    fn registry_read(&self) -> RwLockReadGuard<'_, ListenerRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn registry_write(&self) -> RwLockWriteGuard<'_, ListenerRegistry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for SyncDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventDriver for SyncDriver {
    async fn publish(&self, event: &str, payload: &Value, options: &PublishOptions) -> Result<()> {
        self.publish_sync(event, payload, options)
    }

    fn is_available(&self) -> bool {
        true
    }

    fn driver_name(&self) -> &'static str {
        "sync"
    }
}
