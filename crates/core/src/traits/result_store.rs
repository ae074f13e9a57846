use async_trait::async_trait;
use uuid::Uuid;

use crate::{models::JobResult, SchedulerResult};

/// 任务结果存储抽象接口
///
/// 按 job_id 覆盖写入，只保证单键原子性。
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn put(&self, job_id: Uuid, result: &JobResult) -> SchedulerResult<()>;

    async fn get(&self, job_id: Uuid) -> SchedulerResult<Option<JobResult>>;
}
