//! 内置任务与默认周期调度

use std::sync::Arc;

use jobcast_core::{
    handler_fn, CrontabSpec, HandlerError, ScheduleEntryConfig, SchedulerResult, TaskHandler,
    TaskKwargs, TaskRegistry, Trigger,
};
use serde_json::{json, Value};
use tracing::info;

pub const DUMMY_TASK: &str = "dummy_task";
pub const DUMMY_SCHEDULED_TASK: &str = "dummy_scheduled_task";
pub const ECHO_TASK: &str = "echo";

/// 注册内置任务，使用注册表的默认队列和重试策略
pub fn register_builtin_tasks(registry: &mut TaskRegistry) -> SchedulerResult<()> {
    registry.register_handler(DUMMY_TASK, dummy_task())?;
    registry.register_handler(DUMMY_SCHEDULED_TASK, dummy_scheduled_task())?;
    registry.register_handler(ECHO_TASK, echo())?;
    Ok(())
}

fn dummy_task() -> Arc<dyn TaskHandler> {
    handler_fn(|ctx, _args, _kwargs| async move {
        info!(job_id = %ctx.job_id, "收到任务消息");
        Ok(Value::Null)
    })
}

fn dummy_scheduled_task() -> Arc<dyn TaskHandler> {
    handler_fn(|ctx, args, kwargs| async move {
        let msg = argument(&args, &kwargs, 0, "msg")?;
        let msg = msg
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| msg.to_string());
        info!(job_id = %ctx.job_id, "收到周期任务消息: {}", msg);
        Ok(Value::Null)
    })
}

fn echo() -> Arc<dyn TaskHandler> {
    handler_fn(|_ctx, args, kwargs| async move { argument(&args, &kwargs, 0, "value") })
}

/// 按位置或名称取参数
fn argument(
    args: &[Value],
    kwargs: &TaskKwargs,
    position: usize,
    name: &str,
) -> Result<Value, HandlerError> {
    args.get(position)
        .or_else(|| kwargs.get(name))
        .cloned()
        .ok_or_else(|| HandlerError::new("TypeError", format!("缺少参数: {name}")))
}

/// 默认周期调度：每10秒一次，以及每周一 7:30
pub fn default_schedule() -> Vec<ScheduleEntryConfig> {
    vec![
        ScheduleEntryConfig {
            name: "schedule task every 10 seconds".to_string(),
            task: DUMMY_SCHEDULED_TASK.to_string(),
            args: vec![json!("hello BEAT")],
            kwargs: TaskKwargs::new(),
            queue: None,
            trigger: Trigger::every_seconds(10.0),
        },
        ScheduleEntryConfig {
            name: "schedule task every Monday at 7:30am".to_string(),
            task: DUMMY_SCHEDULED_TASK.to_string(),
            args: vec![json!("Happy Mondays!")],
            kwargs: TaskKwargs::new(),
            queue: None,
            trigger: Trigger::crontab(CrontabSpec::default().minute(30).hour(7).day_of_week(1)),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobcast_core::TaskContext;
    use uuid::Uuid;

    fn context(task: &str) -> TaskContext {
        TaskContext {
            job_id: Uuid::new_v4(),
            task_name: task.to_string(),
            attempt: 1,
            queue: "jobcast".to_string(),
        }
    }

    fn registry() -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        register_builtin_tasks(&mut registry).unwrap();
        registry
    }

    #[test]
    fn test_builtin_tasks_registered() {
        assert_eq!(
            registry().task_names(),
            vec![DUMMY_TASK, DUMMY_SCHEDULED_TASK, ECHO_TASK]
        );
    }

    #[tokio::test]
    async fn test_echo_returns_argument() {
        let registry = registry();
        let handler = &registry.resolve(ECHO_TASK).unwrap().handler;

        let value = handler
            .call(&context(ECHO_TASK), &[json!("hello")], &TaskKwargs::new())
            .await
            .unwrap();
        assert_eq!(value, json!("hello"));

        let mut kwargs = TaskKwargs::new();
        kwargs.insert("value".to_string(), json!(42));
        let value = handler.call(&context(ECHO_TASK), &[], &kwargs).await.unwrap();
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn test_scheduled_task_requires_message() {
        let registry = registry();
        let handler = &registry.resolve(DUMMY_SCHEDULED_TASK).unwrap().handler;

        let err = handler
            .call(&context(DUMMY_SCHEDULED_TASK), &[], &TaskKwargs::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, "TypeError");

        let value = handler
            .call(
                &context(DUMMY_SCHEDULED_TASK),
                &[json!("hello BEAT")],
                &TaskKwargs::new(),
            )
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[test]
    fn test_default_schedule() {
        let schedule = default_schedule();
        assert_eq!(schedule.len(), 2);
        assert_eq!(schedule[0].trigger, Trigger::Interval(10.0));
        assert_eq!(schedule[1].args, vec![json!("Happy Mondays!")]);
        match &schedule[1].trigger {
            Trigger::Crontab(spec) => {
                assert_eq!(spec.minute, "30");
                assert_eq!(spec.hour, "7");
                assert_eq!(spec.day_of_week, "1");
            }
            other => panic!("unexpected trigger: {other:?}"),
        }
    }
}
