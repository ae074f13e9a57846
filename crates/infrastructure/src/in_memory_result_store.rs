use async_trait::async_trait;
use jobcast_core::{models::JobResult, traits::ResultStore, SchedulerResult};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 内存结果存储
#[derive(Debug, Default)]
pub struct InMemoryResultStore {
    results: RwLock<HashMap<Uuid, JobResult>>,
}

impl InMemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.results.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.results.read().await.is_empty()
    }
}

#[async_trait]
impl ResultStore for InMemoryResultStore {
    async fn put(&self, job_id: Uuid, result: &JobResult) -> SchedulerResult<()> {
        self.results.write().await.insert(job_id, result.clone());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> SchedulerResult<Option<JobResult>> {
        Ok(self.results.read().await.get(&job_id).cloned())
    }
}
