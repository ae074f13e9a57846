use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobcast_core::{
    handler_fn, BackoffPolicy, Broker, HandlerError, JobResult, JobStatus, ResultStore,
    RetryPolicy, TaskEnvelope, TaskProducer, TaskRegistry,
};
use jobcast_infrastructure::{InMemoryBroker, InMemoryResultStore};
use jobcast_worker::WorkerService;
use serde_json::json;
use tokio::sync::broadcast;
use uuid::Uuid;

struct Harness {
    broker: Arc<InMemoryBroker>,
    store: Arc<InMemoryResultStore>,
    producer: TaskProducer,
    service: Arc<WorkerService>,
}

impl Harness {
    fn new(registry: TaskRegistry) -> Self {
        let registry = Arc::new(registry);
        let broker = Arc::new(InMemoryBroker::new());
        let store = Arc::new(InMemoryResultStore::new());
        let producer = TaskProducer::new(registry.clone(), broker.clone(), store.clone());
        let service = WorkerService::builder("test-worker", registry, broker.clone(), store.clone())
            .concurrency(2)
            .dequeue_timeout(Duration::from_millis(50))
            .shutdown_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        Self {
            broker,
            store,
            producer,
            service: Arc::new(service),
        }
    }

    async fn wait_until_ready(&self, job_id: Uuid) -> JobResult {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(result) = self.store.get(job_id).await.unwrap() {
                    if result.is_ready() {
                        return result;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("任务未在超时时间内完成")
    }
}

fn echo_registry(policy: RetryPolicy) -> TaskRegistry {
    let mut registry = TaskRegistry::with_defaults("jobcast", policy);
    registry
        .register_handler(
            "echo",
            handler_fn(|_ctx, args, _kwargs| async move {
                args.into_iter()
                    .next()
                    .ok_or_else(|| HandlerError::new("TypeError", "echo 需要一个参数"))
            }),
        )
        .unwrap();
    registry
        .register_handler(
            "always_fails",
            handler_fn(|_ctx, _args, _kwargs| async move {
                Err(HandlerError::new("RuntimeError", "boom"))
            }),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn test_echo_job_end_to_end() {
    let harness = Harness::new(echo_registry(RetryPolicy::default()));
    harness.service.start().await.unwrap();

    let job_id = harness
        .producer
        .submit("echo", vec![json!("hi")], Default::default(), None)
        .await
        .unwrap();

    let result = harness.wait_until_ready(job_id).await;
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.value, Some(json!("hi")));
    assert_eq!(result.attempt, 1);
    assert!(result.error.is_none());

    harness.service.stop().await.unwrap();
    assert_eq!(harness.broker.delivery_count(job_id).await, 1);
    assert_eq!(harness.broker.in_flight_count().await, 0);
    assert_eq!(harness.broker.queue_size("jobcast").await.unwrap(), 0);
}

#[tokio::test]
async fn test_always_fails_is_delivered_max_attempts_times() {
    let harness = Harness::new(echo_registry(RetryPolicy::new(
        3,
        BackoffPolicy::immediate(),
    )));
    harness.service.start().await.unwrap();

    let job_id = harness
        .producer
        .submit("always_fails", vec![], Default::default(), None)
        .await
        .unwrap();

    let result = harness.wait_until_ready(job_id).await;
    harness.service.stop().await.unwrap();

    assert_eq!(result.status, JobStatus::Failure);
    assert_eq!(result.attempt, 3);
    let error = result.error.unwrap();
    assert_eq!(error.kind, "HandlerExecutionError");
    assert!(error.message.contains("boom"));

    assert_eq!(harness.broker.delivery_count(job_id).await, 3);
    let dead = harness.broker.dead_letters("jobcast").await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job_id, job_id);
}

#[tokio::test]
async fn test_flaky_task_succeeds_after_retry() {
    let calls = Arc::new(AtomicU32::new(0));
    let mut registry = TaskRegistry::with_defaults(
        "jobcast",
        RetryPolicy::new(5, BackoffPolicy::immediate()),
    );
    let counter = calls.clone();
    registry
        .register_handler(
            "flaky",
            handler_fn(move |ctx, _args, _kwargs| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(HandlerError::new("ConnectionError", "try again"))
                    } else {
                        Ok(json!({ "attempt": ctx.attempt }))
                    }
                }
            }),
        )
        .unwrap();

    let harness = Harness::new(registry);
    harness.service.start().await.unwrap();
    let job_id = harness
        .producer
        .submit("flaky", vec![], Default::default(), None)
        .await
        .unwrap();

    let result = harness.wait_until_ready(job_id).await;
    harness.service.stop().await.unwrap();

    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.attempt, 3);
    assert_eq!(result.value, Some(json!({ "attempt": 3 })));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(harness.broker.dead_letters("jobcast").await.is_empty());
}

#[tokio::test]
async fn test_unknown_task_is_dead_lettered() {
    let harness = Harness::new(echo_registry(RetryPolicy::default()));
    let envelope = TaskEnvelope::new("not_registered", vec![], Default::default());
    harness.broker.enqueue("jobcast", &envelope).await.unwrap();

    harness.service.start().await.unwrap();
    let result = harness.wait_until_ready(envelope.job_id).await;
    harness.service.stop().await.unwrap();

    assert_eq!(result.status, JobStatus::Failure);
    assert_eq!(result.error.unwrap().kind, "UnknownTaskError");
    assert_eq!(harness.broker.delivery_count(envelope.job_id).await, 1);
    assert_eq!(harness.broker.dead_letters("jobcast").await.len(), 1);
}

#[tokio::test]
async fn test_panicking_handler_is_recorded_as_failure() {
    let mut registry = TaskRegistry::with_defaults("jobcast", RetryPolicy::no_retry());
    registry
        .register_handler(
            "explode",
            handler_fn(|_ctx, _args, _kwargs| async move {
                if true {
                    panic!("kaboom");
                }
                Ok(json!(null))
            }),
        )
        .unwrap();

    let harness = Harness::new(registry);
    harness.service.start().await.unwrap();
    let job_id = harness
        .producer
        .submit("explode", vec![], Default::default(), None)
        .await
        .unwrap();

    let result = harness.wait_until_ready(job_id).await;
    harness.service.stop().await.unwrap();

    let error = result.error.unwrap();
    assert_eq!(result.status, JobStatus::Failure);
    assert_eq!(error.kind, "HandlerExecutionError");
    assert_eq!(error.message, "Panic: kaboom");
}

#[tokio::test]
async fn test_worker_consumes_multiple_queues() {
    let mut registry = TaskRegistry::new();
    registry
        .register(
            "slow_echo",
            handler_fn(|_ctx, args, _kwargs| async move { Ok(json!(args)) }),
            RetryPolicy::default(),
            "slow",
        )
        .unwrap();
    registry
        .register_handler(
            "fast_echo",
            handler_fn(|_ctx, args, _kwargs| async move { Ok(json!(args)) }),
        )
        .unwrap();

    let harness = Harness::new(registry);
    assert_eq!(harness.service.queues(), ["jobcast".to_string(), "slow".to_string()]);

    harness.service.start().await.unwrap();
    let slow = harness
        .producer
        .submit("slow_echo", vec![json!(1)], Default::default(), None)
        .await
        .unwrap();
    let fast = harness
        .producer
        .submit("fast_echo", vec![json!(2)], Default::default(), None)
        .await
        .unwrap();

    assert_eq!(harness.wait_until_ready(slow).await.status, JobStatus::Success);
    assert_eq!(harness.wait_until_ready(fast).await.status, JobStatus::Success);
    harness.service.stop().await.unwrap();
}

#[tokio::test]
async fn test_run_stops_on_shutdown_signal() {
    let harness = Harness::new(echo_registry(RetryPolicy::default()));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let service = harness.service.clone();
    let running = tokio::spawn(async move { service.run(shutdown_rx).await });

    tokio::time::timeout(Duration::from_secs(1), async {
        while !harness.service.is_running().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!harness.service.is_running().await);
}

#[test]
fn test_zero_concurrency_rejected() {
    let registry = Arc::new(TaskRegistry::new());
    let result = WorkerService::builder(
        "w",
        registry,
        Arc::new(InMemoryBroker::new()),
        Arc::new(InMemoryResultStore::new()),
    )
    .concurrency(0)
    .build();
    assert!(result.is_err());
}

#[test]
fn test_duplicate_queues_are_removed_in_order() {
    let service = WorkerService::builder(
        "w",
        Arc::new(TaskRegistry::new()),
        Arc::new(InMemoryBroker::new()),
        Arc::new(InMemoryResultStore::new()),
    )
    .queues(vec![
        "emails".to_string(),
        "reports".to_string(),
        "emails".to_string(),
        "jobcast".to_string(),
        "reports".to_string(),
    ])
    .build()
    .unwrap();

    assert_eq!(service.queues(), ["emails", "reports", "jobcast"]);
}
