use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobcast_core::{
    handler_fn, BackoffPolicy, Broker, Delivery, HandlerError, JobResult, JobStatus, ResultStore,
    RetryPolicy, SchedulerError, SchedulerResult, TaskEnvelope, TaskRegistry,
};
use jobcast_infrastructure::InMemoryResultStore;
use jobcast_worker::{ExecutionOutcome, TaskExecutor, WorkerService};
use mockall::mock;
use serde_json::json;
use uuid::Uuid;

mock! {
    pub TestBroker {}

    #[async_trait]
    impl Broker for TestBroker {
        async fn enqueue(&self, queue: &str, envelope: &TaskEnvelope) -> SchedulerResult<()>;
        async fn dequeue(&self, queue: &str, timeout: Duration) -> SchedulerResult<Option<Delivery>>;
        async fn ack(&self, delivery: &Delivery) -> SchedulerResult<()>;
        async fn nack(&self, delivery: &Delivery, requeue: bool) -> SchedulerResult<()>;
        async fn queue_size(&self, queue: &str) -> SchedulerResult<u64>;
    }
}

mock! {
    pub TestResultStore {}

    #[async_trait]
    impl ResultStore for TestResultStore {
        async fn put(&self, job_id: Uuid, result: &JobResult) -> SchedulerResult<()>;
        async fn get(&self, job_id: Uuid) -> SchedulerResult<Option<JobResult>>;
    }
}

fn registry() -> Arc<TaskRegistry> {
    let mut registry = TaskRegistry::with_defaults(
        "jobcast",
        RetryPolicy::new(
            3,
            BackoffPolicy {
                base_delay_seconds: 2.0,
                max_delay_seconds: 60.0,
                multiplier: 2.0,
                jitter_factor: 0.0,
            },
        ),
    );
    registry
        .register_handler(
            "echo",
            handler_fn(|_ctx, args, _kwargs| async move { Ok(json!(args)) }),
        )
        .unwrap();
    registry
        .register_handler(
            "always_fails",
            handler_fn(|_ctx, _args, _kwargs| async move {
                Err(HandlerError::new("ValueError", "bad input"))
            }),
        )
        .unwrap();
    Arc::new(registry)
}

fn delivery(task: &str, attempt: u32) -> Delivery {
    let mut envelope = TaskEnvelope::new(task, vec![json!(1)], Default::default());
    envelope.attempt = attempt;
    Delivery::new(envelope, "jobcast", "receipt-1", attempt)
}

#[tokio::test]
async fn test_success_is_acked() {
    let mut broker = MockTestBroker::new();
    broker.expect_ack().times(1).returning(|_| Ok(()));
    broker.expect_nack().never();

    let store = Arc::new(InMemoryResultStore::new());
    let executor = TaskExecutor::new(registry(), Arc::new(broker), store.clone(), "w1");

    let delivery = delivery("echo", 1);
    let job_id = delivery.envelope.job_id;
    assert_eq!(executor.process(delivery).await, ExecutionOutcome::Succeeded);

    let result = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(result.status, JobStatus::Success);
    assert_eq!(result.value, Some(json!([1])));
}

#[tokio::test]
async fn test_failure_with_attempts_left_is_requeued_with_backoff() {
    let mut broker = MockTestBroker::new();
    broker.expect_ack().never();
    broker
        .expect_nack()
        .withf(|delivery, requeue| *requeue && delivery.envelope.eta.is_some())
        .times(1)
        .returning(|_, _| Ok(()));

    let store = Arc::new(InMemoryResultStore::new());
    let executor = TaskExecutor::new(registry(), Arc::new(broker), store.clone(), "w1");

    let delivery = delivery("always_fails", 2);
    let job_id = delivery.envelope.job_id;
    let outcome = executor.process(delivery).await;
    assert_eq!(
        outcome,
        ExecutionOutcome::Retrying {
            delay: Duration::from_secs(4)
        }
    );

    let result = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(result.status, JobStatus::Retry);
    assert_eq!(result.error.unwrap().kind, "HandlerExecutionError");
}

#[tokio::test]
async fn test_last_attempt_is_dead_lettered() {
    let mut broker = MockTestBroker::new();
    broker.expect_ack().never();
    broker
        .expect_nack()
        .withf(|_, requeue| !*requeue)
        .times(1)
        .returning(|_, _| Ok(()));

    let store = Arc::new(InMemoryResultStore::new());
    let executor = TaskExecutor::new(registry(), Arc::new(broker), store.clone(), "w1");

    let delivery = delivery("always_fails", 3);
    let job_id = delivery.envelope.job_id;
    assert_eq!(executor.process(delivery).await, ExecutionOutcome::Failed);

    let result = store.get(job_id).await.unwrap().unwrap();
    assert_eq!(result.status, JobStatus::Failure);
    let error = result.error.unwrap();
    assert_eq!(error.kind, "HandlerExecutionError");
    assert_eq!(error.message, "ValueError: bad input");
}

#[tokio::test]
async fn test_huge_backoff_saturates_without_panicking() {
    let mut registry = TaskRegistry::new();
    registry
        .register(
            "slow_retry",
            handler_fn(|_ctx, _args, _kwargs| async move {
                Err(HandlerError::new("TimeoutError", "upstream timed out"))
            }),
            RetryPolicy::new(
                50,
                BackoffPolicy {
                    base_delay_seconds: 1.0,
                    max_delay_seconds: 1e20,
                    multiplier: 100.0,
                    jitter_factor: 0.0,
                },
            ),
            "jobcast",
        )
        .unwrap();

    let mut broker = MockTestBroker::new();
    broker
        .expect_nack()
        .withf(|delivery, requeue| {
            *requeue
                && delivery
                    .envelope
                    .eta
                    .is_some_and(|eta| eta > chrono::Utc::now() + chrono::Duration::days(365))
        })
        .times(1)
        .returning(|_, _| Ok(()));

    let executor = TaskExecutor::new(
        Arc::new(registry),
        Arc::new(broker),
        Arc::new(InMemoryResultStore::new()),
        "w1",
    );
    assert_eq!(
        executor.process(delivery("slow_retry", 11)).await,
        ExecutionOutcome::Retrying {
            delay: BackoffPolicy::MAX_DELAY
        }
    );
}

#[tokio::test]
async fn test_unknown_task_is_rejected_without_requeue() {
    let mut broker = MockTestBroker::new();
    broker
        .expect_nack()
        .withf(|_, requeue| !*requeue)
        .times(1)
        .returning(|_, _| Ok(()));

    let store = Arc::new(InMemoryResultStore::new());
    let executor = TaskExecutor::new(registry(), Arc::new(broker), store.clone(), "w1");

    let delivery = delivery("missing", 1);
    let job_id = delivery.envelope.job_id;
    assert_eq!(executor.process(delivery).await, ExecutionOutcome::UnknownTask);
    assert_eq!(
        store.get(job_id).await.unwrap().unwrap().error.unwrap().kind,
        "UnknownTaskError"
    );
}

#[tokio::test]
async fn test_result_store_errors_do_not_block_ack() {
    let mut broker = MockTestBroker::new();
    broker.expect_ack().times(1).returning(|_| Ok(()));

    let mut store = MockTestResultStore::new();
    store
        .expect_put()
        .times(2)
        .returning(|_, _| Err(SchedulerError::ResultStore("connection reset".to_string())));

    let executor = TaskExecutor::new(registry(), Arc::new(broker), Arc::new(store), "w1");
    assert_eq!(
        executor.process(delivery("echo", 1)).await,
        ExecutionOutcome::Succeeded
    );
}

#[tokio::test]
async fn test_ack_error_is_logged_not_propagated() {
    let mut broker = MockTestBroker::new();
    broker
        .expect_ack()
        .times(1)
        .returning(|_| Err(SchedulerError::Delivery("receipt expired".to_string())));

    let executor = TaskExecutor::new(
        registry(),
        Arc::new(broker),
        Arc::new(InMemoryResultStore::new()),
        "w1",
    );
    assert_eq!(
        executor.process(delivery("echo", 1)).await,
        ExecutionOutcome::Succeeded
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_worker_keeps_polling_after_broker_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let mut broker = MockTestBroker::new();
    broker
        .expect_dequeue()
        .returning(move |_, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SchedulerError::BrokerUnavailable("connection refused".to_string()))
            } else {
                Ok(None)
            }
        });

    let service = WorkerService::builder(
        "w1",
        registry(),
        Arc::new(broker),
        Arc::new(InMemoryResultStore::new()),
    )
    .concurrency(1)
    .dequeue_timeout(Duration::from_millis(10))
    .error_backoff(Duration::from_millis(10))
    .build()
    .unwrap();

    service.start().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    service.stop().await.unwrap();

    assert!(calls.load(Ordering::SeqCst) >= 3);
}
