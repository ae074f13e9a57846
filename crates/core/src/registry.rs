use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::{
    models::{RetryPolicy, TaskDefinition},
    traits::TaskHandler,
    SchedulerError, SchedulerResult,
};

/// 默认队列名称
pub const DEFAULT_QUEUE: &str = "jobcast";

/// 任务注册表
///
/// 启动阶段单线程完成注册，之后以 `Arc<TaskRegistry>` 只读共享给执行器和调度器。
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskDefinition>,
    default_queue: String,
    default_retry_policy: RetryPolicy,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::with_defaults(DEFAULT_QUEUE, RetryPolicy::default())
    }

    pub fn with_defaults(default_queue: impl Into<String>, default_retry_policy: RetryPolicy) -> Self {
        Self {
            tasks: HashMap::new(),
            default_queue: default_queue.into(),
            default_retry_policy,
        }
    }

    /// 注册任务，名称重复时返回 `DuplicateTask`
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
        retry_policy: RetryPolicy,
        default_queue: impl Into<String>,
    ) -> SchedulerResult<()> {
        self.register_definition(TaskDefinition::new(
            name,
            handler,
            retry_policy,
            default_queue,
        ))
    }

    /// 使用注册表的默认队列和默认重试策略注册任务
    pub fn register_handler(
        &mut self,
        name: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> SchedulerResult<()> {
        let retry_policy = self.default_retry_policy.clone();
        let default_queue = self.default_queue.clone();
        self.register(name, handler, retry_policy, default_queue)
    }

    pub fn register_definition(&mut self, definition: TaskDefinition) -> SchedulerResult<()> {
        if definition.name.trim().is_empty() {
            return Err(SchedulerError::Configuration("任务名称不能为空".to_string()));
        }
        if definition.default_queue.trim().is_empty() {
            return Err(SchedulerError::Configuration(format!(
                "任务 {} 的默认队列不能为空",
                definition.name
            )));
        }
        definition
            .retry_policy
            .validate()
            .map_err(|e| SchedulerError::Configuration(format!("任务 {}: {e}", definition.name)))?;

        if self.tasks.contains_key(&definition.name) {
            return Err(SchedulerError::DuplicateTask {
                name: definition.name,
            });
        }

        info!(
            "注册任务: {} (queue={}, max_attempts={})",
            definition.name, definition.default_queue, definition.retry_policy.max_attempts
        );
        self.tasks.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// 按名称查找任务定义，未注册时返回 `UnknownTask`
    pub fn resolve(&self, name: &str) -> SchedulerResult<&TaskDefinition> {
        self.tasks.get(name).ok_or_else(|| SchedulerError::UnknownTask {
            name: name.to_string(),
        })
    }

    /// 覆盖任务的默认队列，通常来自配置文件
    pub fn apply_queue_overrides(&mut self, overrides: &HashMap<String, String>) -> SchedulerResult<()> {
        for (name, queue) in overrides {
            let definition = self
                .tasks
                .get_mut(name)
                .ok_or_else(|| SchedulerError::UnknownTask { name: name.clone() })?;
            debug!("任务 {} 的默认队列改为 {}", name, queue);
            definition.default_queue = queue.clone();
        }
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// 已注册的任务名称（按字母排序）
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }

    /// 所有任务用到的队列（去重排序）
    pub fn queues(&self) -> Vec<String> {
        let mut queues: Vec<String> = self
            .tasks
            .values()
            .map(|definition| definition.default_queue.clone())
            .collect();
        queues.sort();
        queues.dedup();
        queues
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    pub fn default_retry_policy(&self) -> &RetryPolicy {
        &self.default_retry_policy
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
