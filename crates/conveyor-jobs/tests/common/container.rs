//! Redis container for broker integration tests.

use conveyor_config::RedisConfig;
use conveyor_jobs::redis::{create_pool, RedisKeys};
use conveyor_jobs::QueueName;
use deadpool_redis::{Connection, Pool};
use serde_json::Value;
use testcontainers::{runners::AsyncRunner, ContainerAsync, ImageExt};
use testcontainers_modules::redis::Redis;

/// Test Redis container wrapper.
///
/// Manages a Redis testcontainer lifecycle and provides a connection pool.
pub struct TestRedis {
    _container: ContainerAsync<Redis>,
    config: RedisConfig,
    pool: Pool,
}

impl TestRedis {
    /// Starts a fresh Redis container.
    pub async fn new() -> Self {
        // BLMOVE needs 6.2 or later
        let container = Redis::default()
            .with_tag("7.2")
            .start()
            .await
            .expect("Failed to start Redis container");

        let port = container
            .get_host_port_ipv4(6379)
            .await
            .expect("Failed to get Redis port");

        let config = RedisConfig {
            url: format!("redis://127.0.0.1:{}", port),
            pool_size: 4,
            key_prefix: "test".to_string(),
            ..Default::default()
        };

        let pool = Self::connect_with_retry(&config, 30).await;

        Self {
            _container: container,
            config,
            pool,
        }
    }

    pub fn config(&self) -> RedisConfig {
        self.config.clone()
    }

    pub fn pool(&self) -> Pool {
        self.pool.clone()
    }

    pub fn keys(&self) -> RedisKeys {
        RedisKeys::new(&self.config.key_prefix)
    }

    pub async fn conn(&self) -> Connection {
        self.pool.get().await.expect("Failed to get Redis connection")
    }

    /// Stores a job hash and appends its id to the wait list, the way a
    /// producer enqueues a job.
    pub async fn enqueue(&self, queue: QueueName, id: &str, data: Value) {
        let keys = self.keys();
        let mut conn = self.conn().await;

        redis::pipe()
            .atomic()
            .hset_multiple(
                keys.job(queue, id),
                &[
                    ("data", data.to_string()),
                    ("timestamp", "1700000000000".to_string()),
                    ("attemptsMade", "0".to_string()),
                ],
            )
            .ignore()
            .lpush(keys.wait(queue), id)
            .ignore()
            .query_async::<()>(&mut *conn)
            .await
            .expect("Failed to enqueue job");
    }

    async fn connect_with_retry(config: &RedisConfig, max_attempts: u32) -> Pool {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match create_pool(config).await {
                Ok(pool) => return pool,
                Err(e) => {
                    if attempts >= max_attempts {
                        panic!("Failed to connect to Redis after {} attempts: {}", max_attempts, e);
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }
}
