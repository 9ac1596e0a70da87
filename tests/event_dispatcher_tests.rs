use anyhow::Result;
use async_trait::async_trait;
use herald::app::events::sync_driver::SyncDriver;
use herald::app::events::{
    DelegatingResolver, DirectResolver, EventDispatcher, EventDriver, Handler, Listener, NullDriver,
    PublishOptions,
};
use herald::app::events::resolver::{ClosureListener, ListenerResolver};
use herald::config::events::EventsConfig;
use mockall::mock;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Handler) {
    let output = Arc::new(Mutex::new(Vec::new()));
    let make = {
        let output = output.clone();
        move |label: &str| {
            let output = output.clone();
            let label = label.to_string();
            Handler::closure(move |_payload| {
                output.lock().unwrap().push(label.clone());
                Ok(())
            })
        }
    };
    (output, make)
}

#[test]
fn test_listeners_fire_in_priority_order() {
    let dispatcher = EventDispatcher::sync_only();
    let (output, make) = collector();

    dispatcher.register("order", make("low"), 0);
    dispatcher.register("order", make("high"), 100);
    dispatcher.register("order", make("medium"), 50);

    dispatcher.trigger_sync("order", &Value::Null).unwrap();

    assert_eq!(*output.lock().unwrap(), vec!["high", "medium", "low"]);
}

#[test]
fn test_failing_listener_does_not_stop_dispatch() {
    let dispatcher = EventDispatcher::sync_only();
    let output = Arc::new(Mutex::new(Vec::<String>::new()));

    dispatcher.register(
        "e",
        Handler::closure(|_payload| Err(anyhow::anyhow!("listener blew up"))),
        10,
    );
    let sink = output.clone();
    dispatcher.register(
        "e",
        Handler::closure(move |_payload| {
            sink.lock().unwrap().push("ran".to_string());
            Ok(())
        }),
        0,
    );

    dispatcher.trigger_sync("e", &json!({})).unwrap();
    assert_eq!(*output.lock().unwrap(), vec!["ran"]);
}

#[test]
fn test_stop_on_error_propagates_and_skips_rest() {
    let dispatcher = EventDispatcher::sync_only();
    let (output, make) = collector();

    dispatcher.register("e", make("first"), 100);
    dispatcher.register(
        "e",
        Handler::closure(|_payload| Err(anyhow::anyhow!("boom"))),
        50,
    );
    dispatcher.register("e", make("never"), 0);

    let options = PublishOptions {
        stop_on_error: true,
        ..Default::default()
    };
    let result = dispatcher.trigger_sync_with("e", &Value::Null, &options);

    assert!(result.is_err());
    assert_eq!(*output.lock().unwrap(), vec!["first"]);
}

struct UnavailableDriver {
    publications: AtomicUsize,
}

#[async_trait]
impl EventDriver for UnavailableDriver {
    async fn publish(&self, _event: &str, _payload: &Value, _options: &PublishOptions) -> Result<()> {
        self.publications.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_available(&self) -> bool {
        false
    }

    fn driver_name(&self) -> &'static str {
        "unavailable"
    }
}

#[tokio::test]
async fn test_trigger_falls_back_to_sync_when_async_unavailable() {
    let driver = Arc::new(UnavailableDriver {
        publications: AtomicUsize::new(0),
    });
    let dispatcher = EventDispatcher::new(Arc::new(SyncDriver::new()), Some(driver.clone()));

    let captured = Arc::new(Mutex::new(None::<Value>));
    let sink = captured.clone();
    dispatcher.register(
        "x",
        Handler::closure(move |payload| {
            *sink.lock().unwrap() = Some(payload.clone());
            Ok(())
        }),
        0,
    );

    dispatcher.trigger("x", &json!({"fallback": true})).await.unwrap();

    assert_eq!(*captured.lock().unwrap(), Some(json!({"fallback": true})));
    assert_eq!(driver.publications.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_trigger_prefers_available_async_driver() {
    let (dispatcher, recorder) = EventDispatcher::for_testing();
    let (output, make) = collector();
    dispatcher.register("x", make("local"), 0);

    dispatcher.trigger("x", &json!({"n": 1})).await.unwrap();

    // The publication went to the async driver, not the local listeners.
    assert!(output.lock().unwrap().is_empty());
    assert_eq!(recorder.count(), 1);
    assert!(recorder.was_published("x"));
    assert_eq!(recorder.publications_of("x")[0].payload, json!({"n": 1}));
}

#[tokio::test]
async fn test_async_enabled_toggle_is_sticky() {
    let (dispatcher, recorder) = EventDispatcher::for_testing();
    let (output, make) = collector();
    dispatcher.register("x", make("local"), 0);

    dispatcher.set_async_enabled(false);
    dispatcher.trigger("x", &Value::Null).await.unwrap();
    dispatcher.trigger("x", &Value::Null).await.unwrap();

    assert_eq!(recorder.count(), 0);
    assert_eq!(output.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_trigger_sync_ignores_async_driver() {
    let (dispatcher, recorder) = EventDispatcher::for_testing();
    let (output, make) = collector();
    dispatcher.register("x", make("local"), 0);

    dispatcher.trigger_sync("x", &Value::Null).unwrap();

    assert_eq!(recorder.count(), 0);
    assert_eq!(*output.lock().unwrap(), vec!["local"]);
}

#[test]
fn test_listener_can_forget_itself_mid_dispatch() {
    let dispatcher = Arc::new(EventDispatcher::sync_only());
    let output = Arc::new(Mutex::new(Vec::<String>::new()));

    let handler_slot: Arc<Mutex<Option<Handler>>> = Arc::new(Mutex::new(None));
    let sink = output.clone();
    let dispatcher_ref = dispatcher.clone();
    let slot_ref = handler_slot.clone();
    let handler = Handler::closure(move |_payload| {
        sink.lock().unwrap().push("once".to_string());
        if let Some(own) = slot_ref.lock().unwrap().as_ref() {
            dispatcher_ref.forget("self", Some(own));
        }
        Ok(())
    });
    *handler_slot.lock().unwrap() = Some(handler.clone());

    dispatcher.register("self", handler, 0);

    dispatcher.trigger_sync("self", &Value::Null).unwrap();
    dispatcher.trigger_sync("self", &Value::Null).unwrap();

    // Fired once, then the registration was gone for the second dispatch.
    assert_eq!(*output.lock().unwrap(), vec!["once"]);
    assert!(!dispatcher.has_listeners("self"));
}

#[test]
fn test_mid_dispatch_registration_takes_effect_next_dispatch() {
    let dispatcher = Arc::new(EventDispatcher::sync_only());
    let output = Arc::new(Mutex::new(Vec::<String>::new()));

    let sink = output.clone();
    let dispatcher_ref = dispatcher.clone();
    dispatcher.register(
        "grow",
        Handler::closure(move |_payload| {
            sink.lock().unwrap().push("registrar".to_string());
            let late_sink = sink.clone();
            dispatcher_ref.register(
                "grow",
                Handler::closure(move |_payload| {
                    late_sink.lock().unwrap().push("late".to_string());
                    Ok(())
                }),
                // Higher priority: would fire first if the snapshot leaked.
                100,
            );
            Ok(())
        }),
        0,
    );

    dispatcher.trigger_sync("grow", &Value::Null).unwrap();
    assert_eq!(*output.lock().unwrap(), vec!["registrar"]);

    output.lock().unwrap().clear();
    dispatcher.trigger_sync("grow", &Value::Null).unwrap();
    assert_eq!(output.lock().unwrap().first().map(String::as_str), Some("late"));
}

#[test]
fn test_resolver_consulted_on_every_dispatch() {
    let resolutions = Arc::new(AtomicUsize::new(0));
    let mut resolver = DirectResolver::new();
    let counter = resolutions.clone();
    resolver.register("CountingListener", move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Arc::new(ClosureListener::new(|_payload| Ok(())))
    });

    let driver = SyncDriver::with_resolver(Arc::new(resolver));
    driver.add_listener("e", Handler::class("CountingListener"), 0);

    for _ in 0..3 {
        driver
            .publish_sync("e", &Value::Null, &PublishOptions::default())
            .unwrap();
    }

    assert_eq!(resolutions.load(Ordering::SeqCst), 3);
}

mock! {
    Resolver {}
    impl ListenerResolver for Resolver {
        fn resolve(&self, class_id: &str) -> Option<Handler>;
    }
}

#[test]
fn test_unresolvable_class_is_skipped_silently() {
    let mut resolver = MockResolver::new();
    resolver
        .expect_resolve()
        .withf(|class_id| class_id == "MissingListener")
        .times(1)
        .returning(|_| None);

    let driver = SyncDriver::with_resolver(Arc::new(resolver));
    let (output, make) = collector();
    driver.add_listener("e", Handler::class("MissingListener"), 10);
    driver.add_listener("e", make("after"), 0);

    driver
        .publish_sync("e", &Value::Null, &PublishOptions::default())
        .unwrap();

    assert_eq!(*output.lock().unwrap(), vec!["after"]);
}

#[test]
fn test_delegating_resolver_returns_factory_output() {
    let resolver = DelegatingResolver::new(|class_id| {
        (class_id == "Known").then(|| Handler::closure(|_payload| Ok(())))
    });

    assert!(resolver.resolve("Known").is_some());
    assert!(resolver.resolve("Unknown").is_none());
}

#[derive(Debug)]
struct MultiEventListener {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Listener for MultiEventListener {
    fn subscribed_events(&self) -> Vec<&'static str> {
        vec!["user.created", "user.deleted"]
    }

    fn handle(&self, payload: &Value) -> Result<()> {
        let event = payload.get("event").and_then(Value::as_str).unwrap_or("?");
        self.seen.lock().unwrap().push(event.to_string());
        Ok(())
    }
}

#[test]
fn test_subscribe_registers_for_all_subscribed_events() {
    let dispatcher = EventDispatcher::sync_only();
    let seen = Arc::new(Mutex::new(Vec::new()));
    dispatcher.subscribe(Arc::new(MultiEventListener { seen: seen.clone() }));

    dispatcher
        .trigger_sync("user.created", &json!({"event": "created"}))
        .unwrap();
    dispatcher
        .trigger_sync("user.deleted", &json!({"event": "deleted"}))
        .unwrap();
    dispatcher.trigger_sync("user.updated", &json!({"event": "updated"})).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["created", "deleted"]);
}

#[test]
fn test_empty_event_name_dispatches_normally() {
    let dispatcher = EventDispatcher::sync_only();
    let (output, make) = collector();
    dispatcher.register("", make("empty"), 0);

    dispatcher.trigger_sync("", &Value::Null).unwrap();
    assert_eq!(*output.lock().unwrap(), vec!["empty"]);

    // No wildcard semantics: other events do not reach it.
    dispatcher.trigger_sync("other", &Value::Null).unwrap();
    assert_eq!(output.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_null_driver_recording_and_clear() {
    let driver = NullDriver::recording();
    let options = PublishOptions {
        queue: Some("audit".to_string()),
        ..Default::default()
    };

    driver.publish("a", &json!({"n": 1}), &options).await.unwrap();
    driver.publish("b", &Value::Null, &PublishOptions::default()).await.unwrap();

    assert_eq!(driver.count(), 2);
    assert!(driver.was_published("a"));
    assert!(!driver.was_published("c"));

    let recorded = driver.publications_of("a");
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].payload, json!({"n": 1}));
    assert_eq!(recorded[0].options.queue.as_deref(), Some("audit"));

    driver.clear();
    assert_eq!(driver.count(), 0);
}

#[tokio::test]
async fn test_null_driver_silent_discards() {
    let driver = NullDriver::silent();
    driver.publish("a", &Value::Null, &PublishOptions::default()).await.unwrap();
    assert_eq!(driver.count(), 0);
    assert!(!driver.was_published("a"));
}

#[test]
fn test_from_config_sync_and_null_install_no_async_driver() {
    for driver in ["sync", "null"] {
        let mut config = EventsConfig::default();
        config.driver = driver.to_string();
        let dispatcher = EventDispatcher::from_config(&config, None);
        assert!(dispatcher.async_driver().is_none());
    }
}

#[test]
fn test_from_config_custom_consults_factory_registry() {
    herald::app::events::dispatcher::register_driver_factory("recorder", || {
        Arc::new(NullDriver::recording())
    });

    let mut config = EventsConfig::default();
    config.driver = "custom".to_string();
    config.custom_driver = Some("recorder".to_string());
    let dispatcher = EventDispatcher::from_config(&config, None);
    assert_eq!(
        dispatcher.async_driver().map(|d| d.driver_name()),
        Some("null")
    );

    // Unknown names degrade to a sync-only dispatcher.
    config.custom_driver = Some("nowhere".to_string());
    let dispatcher = EventDispatcher::from_config(&config, None);
    assert!(dispatcher.async_driver().is_none());
}

#[test]
fn test_inspection_apis_are_total() {
    let dispatcher = EventDispatcher::sync_only();
    assert!(!dispatcher.has_listeners("ghost"));
    assert!(dispatcher.get_listeners("ghost").is_empty());
    dispatcher.forget("ghost", None);
    dispatcher.trigger_sync("ghost", &Value::Null).unwrap();
}
