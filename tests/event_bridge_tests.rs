use herald::app::events::dispatcher::{self, EventDispatcher};
use herald::app::events::{Handler, PublishOptions};
use herald::app::jobs::event_job::{EventJob, EVENT_JOB_NAME};
use herald::app::jobs::queue_manager::QueueManager;
use herald::app::jobs::store::{JobStore, MemoryJobStore};
use herald::app::jobs::{ExecutionOutcome, Job, JobRegistry, JobStatus};
use herald::config::events::EventsConfig;
use herald::config::queue::QueueConfig;
use serde_json::{json, Value};
use serial_test::serial;
use std::sync::{Arc, Mutex};

fn bridge_setup(queue_config: QueueConfig, events_config: EventsConfig) -> (Arc<EventDispatcher>, Arc<QueueManager>, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    let registry = Arc::new(JobRegistry::new());
    registry.register_serde::<EventJob>(EVENT_JOB_NAME);
    let manager = Arc::new(QueueManager::new(store.clone(), registry, &queue_config));
    let dispatcher = Arc::new(EventDispatcher::with_queue(manager.clone(), &events_config));
    (dispatcher, manager, store)
}

struct TestDispatcherGuard;

impl TestDispatcherGuard {
    fn install(dispatcher: Arc<EventDispatcher>) -> Self {
        dispatcher::set_test_dispatcher(dispatcher);
        TestDispatcherGuard
    }
}

impl Drop for TestDispatcherGuard {
    fn drop(&mut self) {
        dispatcher::clear_test_dispatcher();
    }
}

#[tokio::test]
async fn test_publication_serializes_to_stable_wire_format() {
    let (dispatcher, _manager, store) =
        bridge_setup(QueueConfig::enabled_memory(), EventsConfig::default());

    dispatcher
        .trigger("user.created", &json!({"id": 1, "name": "John"}))
        .await
        .unwrap();

    let record = store.claim_next(Some("events"), chrono::Utc::now()).await.unwrap().unwrap();
    assert_eq!(record.task, EVENT_JOB_NAME);
    assert_eq!(record.queue, "events");
    assert_eq!(record.priority, 9);

    let payload: Value = serde_json::from_str(&record.payload).unwrap();
    assert_eq!(payload["event_name"], "user.created");
    // Nested encoding: event_data is a JSON string whose content is JSON.
    assert_eq!(payload["event_data"], Value::String("{\"id\":1,\"name\":\"John\"}".to_string()));

    let published_at = payload["published_at"].as_str().unwrap();
    assert_eq!(published_at.len(), 19);
    assert_eq!(&published_at[4..5], "-");
    assert_eq!(&published_at[10..11], " ");
    assert_eq!(&published_at[13..14], ":");
}

#[tokio::test]
async fn test_null_payload_encodes_as_null_string() {
    let (dispatcher, _manager, store) =
        bridge_setup(QueueConfig::enabled_memory(), EventsConfig::default());

    dispatcher.trigger("ping", &Value::Null).await.unwrap();
    dispatcher.trigger("flag", &Value::Bool(true)).await.unwrap();
    dispatcher.trigger("list", &json!([])).await.unwrap();

    let mut encoded = Vec::new();
    while let Some(record) = store.claim_next(None, chrono::Utc::now()).await.unwrap() {
        let payload: Value = serde_json::from_str(&record.payload).unwrap();
        encoded.push(payload["event_data"].as_str().unwrap().to_string());
    }
    encoded.sort();
    assert_eq!(encoded, vec!["[]", "null", "true"]);
}

#[tokio::test]
async fn test_options_override_queue_priority_and_delay() {
    let mut events_config = EventsConfig::default();
    events_config.delay = Some(300);
    let (dispatcher, _manager, store) = bridge_setup(QueueConfig::enabled_memory(), events_config);

    // Driver default delay applies when options say nothing.
    dispatcher.trigger("defaulted", &Value::Null).await.unwrap();

    // An explicit zero delay overrides the non-zero default.
    let options = PublishOptions {
        queue: Some("hot".to_string()),
        priority: Some(1),
        delay: Some(0),
        ..Default::default()
    };
    dispatcher.trigger_with("urgent", &Value::Null, &options).await.unwrap();

    let record = store.claim_next(None, chrono::Utc::now()).await.unwrap().unwrap();
    assert_eq!(record.queue, "hot");
    assert_eq!(record.priority, 1);
    assert_eq!(record.status, JobStatus::Processing);

    // The defaulted publication is still parked.
    let stats = store.stats(Some("events")).await.unwrap();
    assert_eq!(stats.delayed, 1);
}

#[tokio::test]
async fn test_unavailable_queue_bridge_falls_back_to_sync() {
    let (dispatcher, _manager, store) =
        bridge_setup(QueueConfig::disabled(), EventsConfig::default());

    let captured = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = captured.clone();
    dispatcher.register(
        "local.event",
        Handler::closure(move |payload| {
            sink.lock().unwrap().push(payload.clone());
            Ok(())
        }),
        0,
    );

    dispatcher.trigger("local.event", &json!({"inline": true})).await.unwrap();

    assert_eq!(*captured.lock().unwrap(), vec![json!({"inline": true})]);
    let stats = store.stats(None).await.unwrap();
    assert_eq!(stats.pending + stats.delayed, 0);
}

#[tokio::test]
#[serial]
async fn test_event_job_without_event_name_is_a_noop() {
    let (dispatcher, recorder) = EventDispatcher::for_testing();
    let dispatcher = Arc::new(dispatcher);
    let _guard = TestDispatcherGuard::install(dispatcher.clone());

    let invoked = Arc::new(Mutex::new(false));
    let flag = invoked.clone();
    dispatcher.register(
        "anything",
        Handler::closure(move |_payload| {
            *flag.lock().unwrap() = true;
            Ok(())
        }),
        0,
    );

    let job = EventJob {
        event_name: None,
        event_data: Some(Value::String("{\"id\":1}".to_string())),
        published_at: None,
    };
    job.handle().await.unwrap();

    assert!(!*invoked.lock().unwrap());
    assert_eq!(recorder.count(), 0);
}

#[tokio::test]
#[serial]
async fn test_event_job_tolerates_malformed_event_data() {
    let dispatcher = Arc::new(EventDispatcher::sync_only());
    let _guard = TestDispatcherGuard::install(dispatcher.clone());

    let captured = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = captured.clone();
    dispatcher.register(
        "tolerant",
        Handler::closure(move |payload| {
            sink.lock().unwrap().push(payload.clone());
            Ok(())
        }),
        0,
    );

    let variants = vec![
        // Unparseable string.
        Some(Value::String("{not json".to_string())),
        // JSON null.
        Some(Value::String("null".to_string())),
        // Non-string event_data.
        Some(json!({"already": "decoded"})),
        // Absent entirely.
        None,
    ];
    for event_data in variants {
        let job = EventJob {
            event_name: Some("tolerant".to_string()),
            event_data,
            published_at: None,
        };
        job.handle().await.unwrap();
    }

    let captured = captured.lock().unwrap();
    assert_eq!(captured.len(), 4);
    assert!(captured.iter().all(|p| *p == json!({})));
}

#[tokio::test]
#[serial]
async fn test_event_job_without_dispatcher_is_a_noop() {
    dispatcher::clear_test_dispatcher();
    dispatcher::clear_global();

    let job = EventJob {
        event_name: Some("orphan".to_string()),
        event_data: None,
        published_at: None,
    };
    job.handle().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_round_trip_republishes_synchronously() {
    let (dispatcher, manager, store) =
        bridge_setup(QueueConfig::enabled_memory(), EventsConfig::default());
    let _guard = TestDispatcherGuard::install(dispatcher.clone());

    let captured = Arc::new(Mutex::new(Vec::<Value>::new()));
    let sink = captured.clone();
    dispatcher.register(
        "order.placed",
        Handler::closure(move |payload| {
            sink.lock().unwrap().push(payload.clone());
            Ok(())
        }),
        0,
    );

    // Publish side: the event becomes a job, not a listener invocation.
    dispatcher
        .trigger("order.placed", &json!({"order": 7, "total": 12.5}))
        .await
        .unwrap();
    assert!(captured.lock().unwrap().is_empty());

    // Worker side: draining the queue re-publishes synchronously.
    let outcome = manager.process(Some("events")).await.unwrap();
    assert_eq!(outcome, Some(ExecutionOutcome::Completed));
    assert_eq!(*captured.lock().unwrap(), vec![json!({"order": 7, "total": 12.5})]);

    let stats = store.stats(Some("events")).await.unwrap();
    assert_eq!(stats.completed, 1);
}

#[tokio::test]
#[serial]
async fn test_listener_failure_in_queued_event_triggers_retry() {
    let (dispatcher, manager, store) =
        bridge_setup(QueueConfig::enabled_memory(), EventsConfig::default());
    let _guard = TestDispatcherGuard::install(dispatcher.clone());

    dispatcher.register(
        "flaky.event",
        Handler::closure(|_payload| Err(anyhow::anyhow!("listener exploded"))),
        0,
    );

    dispatcher.trigger("flaky.event", &json!({})).await.unwrap();

    let outcome = manager.process(Some("events")).await.unwrap();
    // EventJob retries with its 30s base delay (jittered within 10%).
    match outcome {
        Some(ExecutionOutcome::Retried { delay_secs }) => {
            assert!((27..=33).contains(&delay_secs), "unexpected delay {delay_secs}");
        }
        other => panic!("expected a retry, got {other:?}"),
    }

    let stats = store.stats(Some("events")).await.unwrap();
    assert_eq!(stats.delayed, 1);
}

#[tokio::test]
#[serial]
async fn test_global_slot_backs_ambient_resolution() {
    dispatcher::clear_test_dispatcher();
    let dispatcher = Arc::new(EventDispatcher::sync_only());

    let captured = Arc::new(Mutex::new(0usize));
    let counter = captured.clone();
    dispatcher.register(
        "ambient",
        Handler::closure(move |_payload| {
            *counter.lock().unwrap() += 1;
            Ok(())
        }),
        0,
    );

    dispatcher::set_global(dispatcher);
    let job = EventJob {
        event_name: Some("ambient".to_string()),
        event_data: None,
        published_at: None,
    };
    job.handle().await.unwrap();
    dispatcher::clear_global();

    assert_eq!(*captured.lock().unwrap(), 1);
}

#[test]
fn test_event_job_default_tuning() {
    let job = EventJob::new("e", "{}".to_string(), "2026-01-01 00:00:00".to_string());
    assert_eq!(job.job_name(), EVENT_JOB_NAME);
    assert_eq!(job.queue_name(), "events");
    assert_eq!(job.priority(), 9);
    assert_eq!(job.max_attempts(), 5);
    assert_eq!(job.timeout(), Some(60));
    assert_eq!(job.retry_delay(), 30);
}
