use async_trait::async_trait;
use jobcast_core::{models::JobResult, traits::ResultStore, SchedulerError, SchedulerResult};
use tracing::{debug, info};
use uuid::Uuid;

use super::config::RedisResultStoreConfig;
use super::connection::{map_store_error, RedisConnection};

/// Redis 结果后端，每个任务一个 JSON 字符串键
pub struct RedisResultStore {
    connection: RedisConnection,
    config: RedisResultStoreConfig,
}

impl RedisResultStore {
    pub async fn connect(config: RedisResultStoreConfig) -> SchedulerResult<Self> {
        let connection = RedisConnection::connect(&config.url, config.connection_timeout)
            .await
            .map_err(|e| SchedulerError::ResultStore(e.to_string()))?;
        info!("Redis result store connected to {}", connection.url());

        Ok(Self { connection, config })
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    async fn put(&self, job_id: Uuid, result: &JobResult) -> SchedulerResult<()> {
        let key = self.config.result_key(&job_id);
        let payload = serde_json::to_string(result)?;
        let mut conn = self.connection.manager();

        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(payload);
        if let Some(expires) = self.config.result_expires {
            cmd.arg("EX").arg(expires.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(map_store_error)?;

        debug!(job_id = %job_id, status = %result.status, "任务结果已写入");
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> SchedulerResult<Option<JobResult>> {
        let mut conn = self.connection.manager();
        let payload: Option<String> = redis::cmd("GET")
            .arg(self.config.result_key(&job_id))
            .query_async(&mut conn)
            .await
            .map_err(map_store_error)?;

        payload
            .map(|payload| {
                serde_json::from_str(&payload)
                    .map_err(|e| SchedulerError::ResultStore(format!("无法解析任务结果: {e}")))
            })
            .transpose()
    }
}
