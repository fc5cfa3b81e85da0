//! Worker availability caches for Consulta
//!
//! Two implementations of [`AvailabilityCache`]:
//!
//! - [`MemoryAvailabilityCache`] keeps records in process, expiring them against an
//!   injected [`Clock`]
//! - [`RedisAvailabilityCache`] stores JSON records with `SET EX` and tracks worker ids
//!   in a set so they can be listed without `KEYS`

pub mod keys;
pub mod memory;

pub use memory::MemoryAvailabilityCache;

use async_trait::async_trait;
use consulta_core::error::AppError;
use consulta_core::models::{QualityAssessment, UserId, WorkerAvailability};
use consulta_core::traits::AvailabilityCache;
use redis::{aio::ConnectionManager, AsyncCommands, Client, RedisError};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Redis availability cache with connection pooling
///
/// Wraps a Redis ConnectionManager to provide efficient, multiplexed access.
#[derive(Clone)]
pub struct RedisAvailabilityCache {
    manager: ConnectionManager,
    namespace: String,
}

impl RedisAvailabilityCache {
    /// Connect to Redis
    ///
    /// # Errors
    ///
    /// Returns `AppError::CacheConnection` if the connection fails
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use consulta_cache::RedisAvailabilityCache;
    /// # async fn example() -> Result<(), consulta_core::error::AppError> {
    /// let cache = RedisAvailabilityCache::new("redis://localhost:6379", "consulta").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(url: &str, namespace: &str) -> Result<Self, AppError> {
        debug!("Connecting to Redis at {}", url);

        let client = Client::open(url).map_err(|e| {
            error!("Failed to create Redis client: {}", e);
            AppError::CacheConnection(format!("Invalid Redis URL: {}", e))
        })?;

        let manager = ConnectionManager::new(client).await.map_err(|e| {
            error!("Failed to establish Redis connection: {}", e);
            AppError::CacheConnection(format!("Connection failed: {}", e))
        })?;

        debug!("Redis connection established successfully");
        Ok(Self {
            manager,
            namespace: namespace.to_string(),
        })
    }

    /// Ping the Redis server to check connectivity
    pub async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                error!("Redis ping failed: {}", e);
                AppError::Cache(format!("Ping failed: {}", e))
            })?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        debug!("GET {}", key);
        let mut conn = self.manager.clone();

        let result: Option<String> = conn.get(key).await.map_err(Self::map_redis_error)?;
        result
            .map(|json| {
                serde_json::from_str::<T>(&json).map_err(|e| {
                    error!("Failed to deserialize value for key {}: {}", key, e);
                    AppError::Serialization(format!("Deserialization failed: {}", e))
                })
            })
            .transpose()
    }

    async fn set_json<T: Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let ttl_secs = ttl.as_secs().max(1);
        debug!("SET {} (TTL: {}s)", key, ttl_secs);
        let mut conn = self.manager.clone();

        let json = serde_json::to_string(value).map_err(|e| {
            error!("Failed to serialize value for key {}: {}", key, e);
            AppError::Serialization(format!("Serialization failed: {}", e))
        })?;

        let _: () = conn
            .set_ex(key, json, ttl_secs)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    /// Convert RedisError to AppError
    fn map_redis_error(err: RedisError) -> AppError {
        match err.kind() {
            redis::ErrorKind::IoError => {
                error!("Redis I/O error: {}", err);
                AppError::CacheConnection(format!("I/O error: {}", err))
            }
            redis::ErrorKind::TypeError => {
                warn!("Redis type error: {}", err);
                AppError::Cache(format!("Type mismatch: {}", err))
            }
            _ => {
                error!("Redis error: {}", err);
                AppError::Cache(err.to_string())
            }
        }
    }
}

#[async_trait]
impl AvailabilityCache for RedisAvailabilityCache {
    async fn set_worker(
        &self,
        record: &WorkerAvailability,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let key = keys::worker_key(&self.namespace, record.worker_id);
        self.set_json(&key, record, ttl).await?;

        let mut conn = self.manager.clone();
        let _: i64 = conn
            .sadd(keys::workers_index_key(&self.namespace), record.worker_id)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(())
    }

    async fn get_worker(&self, worker_id: UserId) -> Result<Option<WorkerAvailability>, AppError> {
        self.get_json(&keys::worker_key(&self.namespace, worker_id))
            .await
    }

    async fn remove_worker(&self, worker_id: UserId) -> Result<bool, AppError> {
        let key = keys::worker_key(&self.namespace, worker_id);
        debug!("DEL {}", key);
        let mut conn = self.manager.clone();

        let deleted: i64 = conn.del(&key).await.map_err(Self::map_redis_error)?;
        let _: i64 = conn
            .srem(keys::workers_index_key(&self.namespace), worker_id)
            .await
            .map_err(Self::map_redis_error)?;
        Ok(deleted > 0)
    }

    async fn list_workers(&self) -> Result<Vec<WorkerAvailability>, AppError> {
        let index = keys::workers_index_key(&self.namespace);
        let mut conn = self.manager.clone();

        let ids: Vec<i64> = conn.smembers(&index).await.map_err(Self::map_redis_error)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let record_keys: Vec<String> = ids
            .iter()
            .map(|id| keys::worker_key(&self.namespace, *id))
            .collect();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&record_keys)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_redis_error)?;

        let mut records = Vec::with_capacity(values.len());
        let mut expired = Vec::new();
        for (id, value) in ids.iter().zip(values) {
            match value {
                Some(json) => match serde_json::from_str::<WorkerAvailability>(&json) {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping unreadable availability record {}: {}", id, e),
                },
                None => expired.push(*id),
            }
        }

        // index entries whose record expired
        if !expired.is_empty() {
            let _: i64 = conn
                .srem(&index, &expired)
                .await
                .map_err(Self::map_redis_error)?;
        }

        Ok(records)
    }

    async fn set_quality(
        &self,
        assessment: &QualityAssessment,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let key = keys::quality_key(&self.namespace, assessment.worker_id);
        self.set_json(&key, assessment, ttl).await
    }

    async fn get_quality(&self, worker_id: UserId) -> Result<Option<QualityAssessment>, AppError> {
        self.get_json(&keys::quality_key(&self.namespace, worker_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use consulta_core::models::WorkerStatus;

    #[tokio::test]
    #[ignore] // Requires Redis
    async fn test_redis_worker_round_trip() {
        let cache = RedisAvailabilityCache::new("redis://127.0.0.1:6379", "consulta-test")
            .await
            .unwrap();

        let record = WorkerAvailability {
            worker_id: 4242,
            status: WorkerStatus::Idle,
            region: "seoul".to_string(),
            last_heartbeat_at: Utc::now(),
            last_network_quality: None,
        };
        cache
            .set_worker(&record, Duration::from_secs(30))
            .await
            .unwrap();

        let listed = cache.list_workers().await.unwrap();
        assert!(listed.iter().any(|r| r.worker_id == 4242));

        assert!(cache.remove_worker(4242).await.unwrap());
        assert!(cache.get_worker(4242).await.unwrap().is_none());
    }
}
