pub mod dispatcher;
pub mod null_driver;
pub mod queue_driver;
pub mod registry;
pub mod resolver;
pub mod sync_driver;

pub use dispatcher::EventDispatcher;
pub use null_driver::NullDriver;
pub use queue_driver::QueueEventDriver;
pub use registry::ListenerRegistry;
pub use resolver::{DelegatingResolver, DirectResolver, ListenerResolver};
pub use sync_driver::SyncDriver;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Invocable listener closure. Payloads are opaque JSON values.
pub type ListenerFn = dyn Fn(&Value) -> Result<()> + Send + Sync;

/// Typed listener. Implementors declare which events they care about and
/// handle one payload at a time.
pub trait Listener: Send + Sync {
    /// Events this listener is registered for by `EventDispatcher::subscribe`.
    fn subscribed_events(&self) -> Vec<&'static str> {
        Vec::new()
    }

    fn handle(&self, payload: &Value) -> Result<()>;
}

/// A registered handler: a closure, a typed listener instance, or a class
/// identifier materialized through a `ListenerResolver` on every dispatch.
///
/// Identity (used by `forget`) is by allocation for closures and instances
/// (`Arc::ptr_eq`) and by string equality for class identifiers. Cloning a
/// `Handler` preserves identity; wrapping the same closure twice does not.
#[derive(Clone)]
pub enum Handler {
    Closure(Arc<ListenerFn>),
    Instance(Arc<dyn Listener>),
    ClassId(String),
}

impl Handler {
    pub fn closure<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Result<()> + Send + Sync + 'static,
    {
        Handler::Closure(Arc::new(f))
    }

    pub fn instance(listener: Arc<dyn Listener>) -> Self {
        Handler::Instance(listener)
    }

    pub fn class(id: impl Into<String>) -> Self {
        Handler::ClassId(id.into())
    }

    pub fn is_same(&self, other: &Handler) -> bool {
        match (self, other) {
            (Handler::Closure(a), Handler::Closure(b)) => Arc::ptr_eq(a, b),
            (Handler::Instance(a), Handler::Instance(b)) => Arc::ptr_eq(a, b),
            (Handler::ClassId(a), Handler::ClassId(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Closure(_) => f.write_str("Handler::Closure"),
            Handler::Instance(_) => f.write_str("Handler::Instance"),
            Handler::ClassId(id) => write!(f, "Handler::ClassId({})", id),
        }
    }
}

/// Per-publication options. `stop_on_error` controls the sync driver's
/// per-listener error policy; queue/priority/delay override the queue
/// driver's defaults.
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub stop_on_error: bool,
    pub queue: Option<String>,
    pub priority: Option<i32>,
    pub delay: Option<i64>,
}

/// Transport seam for publications. The sync driver executes listeners in
/// place, the null driver records or discards, the queue driver serializes
/// the event into a job.
#[async_trait]
pub trait EventDriver: Send + Sync {
    async fn publish(&self, event: &str, payload: &Value, options: &PublishOptions) -> Result<()>;

    fn is_available(&self) -> bool;

    fn driver_name(&self) -> &'static str;
}
