//! Redis broker.
//!
//! Layout:
//! - immediate tasks: `LPUSH <queue> <signature json>`
//! - delayed tasks: `ZADD <queue>:delayed <eta millis> <signature json>`
//! - result backend: `GET task_state:<uuid>` holding `TaskState` json,
//!   written by workers

use async_trait::async_trait;
use chrono::Utc;
use deadpool_redis::{Config, Pool, PoolConfig, Runtime};
use ::redis::AsyncCommands;
use rill_core::{Broker, BrokerError, TaskId, TaskSignature, TaskState};

/// Redis-backed broker over a connection pool shared by all requests.
#[derive(Clone)]
pub struct RedisBroker {
    pool: Pool,
}

impl RedisBroker {
    /// Builds the pool. No connection is opened until the first publish.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Unreachable` if the URL or pool settings are invalid.
    pub fn new(url: &str, pool_max: usize) -> Result<Self, BrokerError> {
        let mut cfg = Config::from_url(url);
        cfg.pool = Some(PoolConfig::new(pool_max));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| BrokerError::Unreachable(e.to_string()))?;
        Ok(Self { pool })
    }

    fn delayed_key(queue: &str) -> String {
        format!("{queue}:delayed")
    }

    fn result_key(task_id: TaskId) -> String {
        format!("task_state:{task_id}")
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, BrokerError> {
        self.pool
            .get()
            .await
            .map_err(|e| BrokerError::Unreachable(e.to_string()))
    }
}

fn map_redis_error(err: &redis::RedisError) -> BrokerError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        BrokerError::Unreachable(err.to_string())
    } else {
        BrokerError::Rejected(err.to_string())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, task: &TaskSignature) -> Result<(), BrokerError> {
        let body =
            serde_json::to_string(task).map_err(|e| BrokerError::Rejected(e.to_string()))?;
        let mut conn = self.connection().await?;

        match task.eta {
            Some(eta) if task.is_delayed(Utc::now()) => {
                let _: () = conn
                    .zadd(Self::delayed_key(&task.routing_key), body, eta.timestamp_millis())
                    .await
                    .map_err(|e| map_redis_error(&e))?;
            }
            _ => {
                let _: () = conn
                    .lpush(&task.routing_key, body)
                    .await
                    .map_err(|e| map_redis_error(&e))?;
            }
        }
        Ok(())
    }

    async fn fetch_result(&self, task_id: TaskId) -> Result<Option<TaskState>, BrokerError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(Self::result_key(task_id))
            .await
            .map_err(|e| map_redis_error(&e))?;

        raw.map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| BrokerError::Rejected(format!("malformed task state: {e}")))
    }
}
