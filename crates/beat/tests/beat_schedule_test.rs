use chrono::{DateTime, Datelike, Duration, FixedOffset, TimeZone, Utc, Weekday};
use jobcast_beat::{Beat, ManualClock};
use jobcast_core::{
    models::{CrontabSpec, JobStatus, ScheduleEntryConfig, Trigger},
    traits::{handler_fn, Broker},
    TaskProducer, TaskRegistry,
};
use jobcast_infrastructure::{InMemoryBroker, InMemoryResultStore};
use serde_json::{json, Value};
use std::sync::Arc;

struct Harness {
    beat: Beat,
    clock: Arc<ManualClock>,
    broker: Arc<InMemoryBroker>,
    producer: TaskProducer,
}

fn harness(start: DateTime<Utc>, timezone: FixedOffset) -> Harness {
    let mut registry = TaskRegistry::new();
    registry
        .register_handler(
            "dummy_scheduled_task",
            handler_fn(|_ctx, _args, _kwargs| async move { Ok(Value::Null) }),
        )
        .unwrap();

    let broker = Arc::new(InMemoryBroker::new());
    let producer = TaskProducer::new(
        Arc::new(registry),
        broker.clone(),
        Arc::new(InMemoryResultStore::new()),
    );
    let clock = Arc::new(ManualClock::new(start));
    let beat = Beat::with_clock(producer.clone(), timezone, clock.clone());

    Harness {
        beat,
        clock,
        broker,
        producer,
    }
}

fn entry(name: &str, message: &str, trigger: Trigger) -> ScheduleEntryConfig {
    ScheduleEntryConfig {
        name: name.to_string(),
        task: "dummy_scheduled_task".to_string(),
        args: vec![json!(message)],
        kwargs: Default::default(),
        queue: None,
        trigger,
    }
}

fn utc() -> FixedOffset {
    FixedOffset::east_opt(0).unwrap()
}

#[tokio::test]
async fn test_fixed_interval_advances_by_exact_interval() {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut h = harness(start, utc());
    h.beat
        .add_entry(entry(
            "schedule task every 10 seconds",
            "hello BEAT",
            Trigger::Interval(10.0),
        ))
        .unwrap();

    let mut previous = h.beat.entries()[0].next_fire_at();
    assert_eq!(previous, start + Duration::seconds(10));

    for round in 1..=5 {
        // 稍晚于到期时间检查，下一次触发时间仍然严格按间隔推进
        h.clock.set(previous + Duration::milliseconds(300));
        let fired = h.beat.tick().await;
        assert_eq!(fired.len(), 1, "round {round}");

        let next = h.beat.entries()[0].next_fire_at();
        assert_eq!(next, previous + Duration::seconds(10), "round {round}");
        previous = next;
    }

    assert_eq!(h.broker.queue_size("jobcast").await.unwrap(), 5);
}

#[tokio::test]
async fn test_scheduled_job_carries_arguments_and_pending_status() {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut h = harness(start, utc());
    h.beat
        .add_entry(entry("hello", "hello BEAT", Trigger::Interval(10.0)))
        .unwrap();

    h.clock.advance(Duration::seconds(10));
    let fired = h.beat.tick().await;
    assert_eq!(fired.len(), 1);

    let status = h.producer.get_status(fired[0].job_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Pending);

    let delivery = h
        .broker
        .dequeue("jobcast", std::time::Duration::ZERO)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(delivery.envelope.job_id, fired[0].job_id);
    assert_eq!(delivery.envelope.task_name, "dummy_scheduled_task");
    assert_eq!(delivery.envelope.args, vec![json!("hello BEAT")]);
    assert_eq!(delivery.envelope.enqueued_at, start + Duration::seconds(10));
}

#[tokio::test]
async fn test_monday_crontab_fires_once_across_sunday_night() {
    // 2024-01-07 是周日
    let sunday_night = Utc.with_ymd_and_hms(2024, 1, 7, 23, 0, 0).unwrap();
    assert_eq!(sunday_night.weekday(), Weekday::Sun);

    let mut h = harness(sunday_night, utc());
    h.beat
        .add_entry(entry(
            "schedule task every Monday at 7:30am",
            "Happy Mondays!",
            Trigger::Crontab(CrontabSpec::default().minute(30).hour(7).day_of_week(1)),
        ))
        .unwrap();

    assert!(h.beat.tick().await.is_empty());

    h.clock
        .set(Utc.with_ymd_and_hms(2024, 1, 8, 7, 31, 0).unwrap());
    let fired = h.beat.tick().await;
    assert_eq!(fired.len(), 1);
    assert!(h.beat.tick().await.is_empty());

    assert_eq!(h.broker.queue_size("jobcast").await.unwrap(), 1);
    assert_eq!(
        h.beat.entries()[0].next_fire_at(),
        Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap()
    );
}

#[tokio::test]
async fn test_crontab_uses_configured_timezone() {
    // 上海时间周一 07:30 即 UTC 周日 23:30
    let shanghai = FixedOffset::east_opt(8 * 3600).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 1, 7, 20, 0, 0).unwrap();
    let mut h = harness(start, shanghai);
    h.beat
        .add_entry(entry(
            "mondays",
            "Happy Mondays!",
            Trigger::Crontab(CrontabSpec::default().minute(30).hour(7).day_of_week("mon")),
        ))
        .unwrap();

    assert_eq!(
        h.beat.entries()[0].next_fire_at(),
        Utc.with_ymd_and_hms(2024, 1, 7, 23, 30, 0).unwrap()
    );
}

#[tokio::test]
async fn test_entry_queue_override() {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
    let mut h = harness(start, utc());
    let mut config = entry("to-reports", "x", Trigger::Interval(1.0));
    config.queue = Some("reports".to_string());
    h.beat.add_entry(config).unwrap();

    h.clock.advance(Duration::seconds(1));
    let fired = h.beat.tick().await;
    assert_eq!(fired[0].queue, "reports");
    assert_eq!(h.broker.queue_size("reports").await.unwrap(), 1);
}
