use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use crate::app::jobs::queue_manager::QueueManager;
use crate::config::events::EventsConfig;

use super::null_driver::NullDriver;
use super::queue_driver::QueueEventDriver;
use super::sync_driver::SyncDriver;
use super::{EventDriver, Handler, Listener, PublishOptions};

/// Top-level façade over the sync driver and an optional async driver.
///
/// `trigger` prefers the async driver when one is installed, enabled, and
/// available; otherwise it falls through to synchronous execution.
/// `trigger_sync` always executes in place. Listener state lives only in the
/// sync driver's registry — async drivers transport, they do not hold
/// listeners.
pub struct EventDispatcher {
    sync_driver: Arc<SyncDriver>,
    async_driver: Option<Arc<dyn EventDriver>>,
    async_enabled: AtomicBool,
}

impl EventDispatcher {
    pub fn new(sync_driver: Arc<SyncDriver>, async_driver: Option<Arc<dyn EventDriver>>) -> Self {
        Self {
            sync_driver,
            async_driver,
            async_enabled: AtomicBool::new(true),
        }
    }

    /// Dispatcher with no async driver: every trigger executes in place.
    pub fn sync_only() -> Self {
        Self::new(Arc::new(SyncDriver::new()), None)
    }

    /// Dispatcher whose async driver records every publication. The recorder
    /// is returned alongside so tests can assert on it.
    pub fn for_testing() -> (Self, Arc<NullDriver>) {
        let recorder = Arc::new(NullDriver::recording());
        let dispatcher = Self::new(Arc::new(SyncDriver::new()), Some(recorder.clone()));
        (dispatcher, recorder)
    }

    /// Dispatcher bridged onto the queue: async triggers become jobs.
    pub fn with_queue(manager: Arc<QueueManager>, config: &EventsConfig) -> Self {
        let driver = Arc::new(QueueEventDriver::from_config(manager, config));
        Self::new(Arc::new(SyncDriver::new()), Some(driver))
    }

    /// Driver selection per the `events.driver` config value. `sync` and
    /// `null` install no async driver; `queue` requires a queue manager;
    /// `custom` consults the process-local driver factory registry.
    pub fn from_config(config: &EventsConfig, manager: Option<Arc<QueueManager>>) -> Self {
        let async_driver: Option<Arc<dyn EventDriver>> = match config.driver.as_str() {
            "queue" => match manager {
                Some(manager) => Some(Arc::new(QueueEventDriver::from_config(manager, config))),
                None => {
                    tracing::warn!("events driver 'queue' configured without a queue manager; falling back to sync");
                    None
                }
            },
            "custom" => match config.custom_driver.as_deref() {
                Some(name) => match resolve_custom_driver(name) {
                    Some(driver) => Some(driver),
                    None => {
                        tracing::warn!(driver = %name, "unknown custom events driver; falling back to sync");
                        None
                    }
                },
                None => {
                    tracing::warn!("events driver 'custom' configured without a driver name; falling back to sync");
                    None
                }
            },
            _ => None,
        };

        Self::new(Arc::new(SyncDriver::new()), async_driver)
    }

    pub async fn trigger(&self, event: &str, payload: &Value) -> Result<()> {
        self.trigger_with(event, payload, &PublishOptions::default()).await
    }

    pub async fn trigger_with(&self, event: &str, payload: &Value, options: &PublishOptions) -> Result<()> {
        if self.async_enabled.load(Ordering::Relaxed) {
            if let Some(driver) = &self.async_driver {
                if driver.is_available() {
                    return driver.publish(event, payload, options).await;
                }
            }
        }
        self.sync_driver.publish_sync(event, payload, options)
    }

    /// Executes listeners in place regardless of the async configuration.
    pub fn trigger_sync(&self, event: &str, payload: &Value) -> Result<()> {
        self.trigger_sync_with(event, payload, &PublishOptions::default())
    }

    pub fn trigger_sync_with(&self, event: &str, payload: &Value, options: &PublishOptions) -> Result<()> {
        self.sync_driver.publish_sync(event, payload, options)
    }

    pub fn register(&self, event: &str, handler: Handler, priority: i32) {
        self.sync_driver.add_listener(event, handler, priority);
    }

    /// Registers a typed listener for each of its subscribed events.
    pub fn subscribe(&self, listener: Arc<dyn Listener>) {
        for event in listener.subscribed_events() {
            self.sync_driver.add_listener(event, Handler::Instance(listener.clone()), 0);
        }
    }

    pub fn forget(&self, event: &str, handler: Option<&Handler>) {
        self.sync_driver.remove_listener(event, handler);
    }

    pub fn has_listeners(&self, event: &str) -> bool {
        self.sync_driver.has_listeners(event)
    }

    pub fn get_listeners(&self, event: &str) -> Vec<Handler> {
        self.sync_driver.get_listeners(event)
    }

    pub fn clear_listeners(&self) {
        self.sync_driver.clear(None);
    }

    pub fn sync_driver(&self) -> &SyncDriver {
        &self.sync_driver
    }

    pub fn async_driver(&self) -> Option<&Arc<dyn EventDriver>> {
        self.async_driver.as_ref()
    }

    pub fn async_enabled(&self) -> bool {
        self.async_enabled.load(Ordering::Relaxed)
    }

    pub fn set_async_enabled(&self, enabled: bool) {
        self.async_enabled.store(enabled, Ordering::Relaxed);
    }
}

// Process-wide dispatcher handles. The global slot is installed once at
// startup; the test-override slot shadows it and is cleared between cases.
static GLOBAL_DISPATCHER: RwLock<Option<Arc<EventDispatcher>>> = RwLock::new(None);
static TEST_DISPATCHER: RwLock<Option<Arc<EventDispatcher>>> = RwLock::new(None);

pub fn set_global(dispatcher: Arc<EventDispatcher>) {
    *GLOBAL_DISPATCHER.write().unwrap_or_else(|e| e.into_inner()) = Some(dispatcher);
}

pub fn global() -> Option<Arc<EventDispatcher>> {
    GLOBAL_DISPATCHER.read().unwrap_or_else(|e| e.into_inner()).clone()
}

pub fn clear_global() {
    *GLOBAL_DISPATCHER.write().unwrap_or_else(|e| e.into_inner()) = None;
}

pub fn set_test_dispatcher(dispatcher: Arc<EventDispatcher>) {
    *TEST_DISPATCHER.write().unwrap_or_else(|e| e.into_inner()) = Some(dispatcher);
}

pub fn clear_test_dispatcher() {
    *TEST_DISPATCHER.write().unwrap_or_else(|e| e.into_inner()) = None;
}

/// The dispatcher ambient code should use: the test override when set,
/// otherwise the global handle.
pub fn current() -> Option<Arc<EventDispatcher>> {
    TEST_DISPATCHER
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .or_else(global)
}

type DriverFactory = dyn Fn() -> Arc<dyn EventDriver> + Send + Sync;

fn custom_drivers() -> &'static RwLock<HashMap<String, Arc<DriverFactory>>> {
    static FACTORIES: OnceLock<RwLock<HashMap<String, Arc<DriverFactory>>>> = OnceLock::new();
    FACTORIES.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Registers a factory for the `custom` events driver variant.
pub fn register_driver_factory<F>(name: impl Into<String>, factory: F)
where
    F: Fn() -> Arc<dyn EventDriver> + Send + Sync + 'static,
{
    custom_drivers()
        .write()
        .unwrap_or_else(|e| e.into_inner())
        .insert(name.into(), Arc::new(factory));
}

fn resolve_custom_driver(name: &str) -> Option<Arc<dyn EventDriver>> {
    custom_drivers()
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .get(name)
        .map(|factory| factory())
}
