use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use super::{Handler, Listener, ListenerFn};

/// Turns a class identifier into an invocable handler. Consulted on every
/// dispatch; caching, if wanted, belongs to the factory behind it.
pub trait ListenerResolver: Send + Sync {
    fn resolve(&self, class_id: &str) -> Option<Handler>;
}

type ListenerCtor = dyn Fn() -> Arc<dyn Listener> + Send + Sync;

/// Resolver backed by a name → constructor map. The Rust stand-in for
/// "invoke the default constructor of the class": constructors are
/// registered up front and invoked fresh for each resolution.
#[derive(Default)]
pub struct DirectResolver {
    constructors: HashMap<String, Arc<ListenerCtor>>,
}

impl DirectResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class_id: impl Into<String>, ctor: F)
    where
        F: Fn() -> Arc<dyn Listener> + Send + Sync + 'static,
    {
        self.constructors.insert(class_id.into(), Arc::new(ctor));
    }
}

impl ListenerResolver for DirectResolver {
    fn resolve(&self, class_id: &str) -> Option<Handler> {
        self.constructors.get(class_id).map(|ctor| Handler::Instance(ctor()))
    }
}

type HandlerFactory = dyn Fn(&str) -> Option<Handler> + Send + Sync;

/// Resolver that defers to an external factory (a container, a plugin
/// registry) and returns whatever it returns.
pub struct DelegatingResolver {
    factory: Arc<HandlerFactory>,
}

impl DelegatingResolver {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Option<Handler> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// Convenience for factories that only ever produce closures.
    pub fn from_closure_factory<F>(factory: F) -> Self
    where
        F: Fn(&str) -> Option<Arc<ListenerFn>> + Send + Sync + 'static,
    {
        Self::new(move |class_id| factory(class_id).map(Handler::Closure))
    }
}

impl ListenerResolver for DelegatingResolver {
    fn resolve(&self, class_id: &str) -> Option<Handler> {
        (self.factory)(class_id)
    }
}

/// Adapter so a bare closure can be registered through a `DirectResolver`
/// where a typed listener is expected.
pub struct ClosureListener {
    inner: Arc<ListenerFn>,
}

impl ClosureListener {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self { inner: Arc::new(f) }
    }
}

impl Listener for ClosureListener {
    fn handle(&self, payload: &Value) -> anyhow::Result<()> {
        (self.inner)(payload)
    }
}
