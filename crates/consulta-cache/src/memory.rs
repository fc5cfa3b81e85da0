//! In-process availability cache
//!
//! Entries expire against the injected clock, so tests can age records without sleeping.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use consulta_core::error::AppError;
use consulta_core::models::{QualityAssessment, UserId, WorkerAvailability};
use consulta_core::traits::AvailabilityCache;
use consulta_core::Clock;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T: Clone> Expiring<T> {
    fn new(value: T, now: DateTime<Utc>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            value,
            expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    fn live(&self, now: DateTime<Utc>) -> Option<T> {
        (now < self.expires_at).then(|| self.value.clone())
    }
}

/// Availability cache held in process memory
#[derive(Debug, Clone)]
pub struct MemoryAvailabilityCache {
    clock: Arc<dyn Clock>,
    workers: Arc<RwLock<HashMap<UserId, Expiring<WorkerAvailability>>>>,
    quality: Arc<RwLock<HashMap<UserId, Expiring<QualityAssessment>>>>,
}

impl MemoryAvailabilityCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            workers: Arc::new(RwLock::new(HashMap::new())),
            quality: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl AvailabilityCache for MemoryAvailabilityCache {
    async fn set_worker(
        &self,
        record: &WorkerAvailability,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let entry = Expiring::new(record.clone(), self.clock.now(), ttl);
        self.workers.write().insert(record.worker_id, entry);
        Ok(())
    }

    async fn get_worker(&self, worker_id: UserId) -> Result<Option<WorkerAvailability>, AppError> {
        let now = self.clock.now();
        Ok(self
            .workers
            .read()
            .get(&worker_id)
            .and_then(|e| e.live(now)))
    }

    async fn remove_worker(&self, worker_id: UserId) -> Result<bool, AppError> {
        Ok(self.workers.write().remove(&worker_id).is_some())
    }

    async fn list_workers(&self) -> Result<Vec<WorkerAvailability>, AppError> {
        let now = self.clock.now();
        let mut workers = self.workers.write();
        workers.retain(|_, e| now < e.expires_at);

        let mut records: Vec<WorkerAvailability> =
            workers.values().map(|e| e.value.clone()).collect();
        records.sort_by_key(|r| r.worker_id);
        Ok(records)
    }

    async fn set_quality(
        &self,
        assessment: &QualityAssessment,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let entry = Expiring::new(assessment.clone(), self.clock.now(), ttl);
        self.quality.write().insert(assessment.worker_id, entry);
        Ok(())
    }

    async fn get_quality(&self, worker_id: UserId) -> Result<Option<QualityAssessment>, AppError> {
        let now = self.clock.now();
        Ok(self
            .quality
            .read()
            .get(&worker_id)
            .and_then(|e| e.live(now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consulta_core::models::{NetworkMetrics, NetworkQuality, WorkerStatus};
    use consulta_core::ManualClock;

    fn record(worker_id: UserId, now: DateTime<Utc>) -> WorkerAvailability {
        WorkerAvailability {
            worker_id,
            status: WorkerStatus::Idle,
            region: "seoul".to_string(),
            last_heartbeat_at: now,
            last_network_quality: None,
        }
    }

    #[tokio::test]
    async fn test_records_expire_with_clock() {
        let clock = Arc::new(ManualClock::deterministic());
        let cache = MemoryAvailabilityCache::new(clock.clone());

        cache
            .set_worker(&record(1, clock.now()), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get_worker(1).await.unwrap().is_some());

        clock.advance_secs(61);
        assert!(cache.get_worker(1).await.unwrap().is_none());
        assert!(cache.list_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_quality_cached_separately() {
        let clock = Arc::new(ManualClock::deterministic());
        let cache = MemoryAvailabilityCache::new(clock.clone());

        let assessment = QualityAssessment {
            worker_id: 3,
            quality: NetworkQuality::Good,
            metrics: NetworkMetrics {
                latency_ms: 150,
                jitter_ms: 20,
                packet_loss_percent: 0.5,
                bandwidth_kbps: 4000,
            },
            assessed_at: clock.now(),
        };
        cache
            .set_quality(&assessment, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(cache.get_worker(3).await.unwrap().is_none());
        assert_eq!(
            cache.get_quality(3).await.unwrap().map(|a| a.quality),
            Some(NetworkQuality::Good)
        );

        clock.advance_secs(30);
        assert!(cache.get_quality(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_reports_presence() {
        let clock = Arc::new(ManualClock::deterministic());
        let cache = MemoryAvailabilityCache::new(clock.clone());
        cache
            .set_worker(&record(9, clock.now()), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(cache.remove_worker(9).await.unwrap());
        assert!(!cache.remove_worker(9).await.unwrap());
    }
}
