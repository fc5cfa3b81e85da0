//! Availability directory
//!
//! Tracks which workers are online and picks the candidates a new request is
//! offered to. Liveness is judged at read time against the heartbeat TTL, so a
//! record that stopped heartbeating reads as OFFLINE even while it is still cached.

use consulta_core::config::AvailabilityConfig;
use consulta_core::models::{NetworkQuality, UserId, WorkerAvailability, WorkerStatus};
use consulta_core::traits::AvailabilityCache;
use consulta_core::{AppResult, Clock};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::constants::RECORD_RETENTION_FACTOR;

/// Pick up to `config.max_candidates` live IDLE workers
///
/// With a preferred region the matching workers are shuffled and up to
/// `region_priority_slots` of them lead the list; the rest is filled from the
/// shuffled non-matching workers, then from any matching workers left over.
/// Without a region every eligible worker is shuffled together.
pub fn select_candidates<R: Rng + ?Sized>(
    records: &[WorkerAvailability],
    preferred_region: Option<&str>,
    exclude: &[UserId],
    now: DateTime<Utc>,
    config: &AvailabilityConfig,
    rng: &mut R,
) -> Vec<UserId> {
    let ttl = config.heartbeat_ttl();
    let eligible = records.iter().filter(|r| {
        r.effective_status(now, ttl) == WorkerStatus::Idle && !exclude.contains(&r.worker_id)
    });

    let max = config.max_candidates;
    let region = match preferred_region.map(str::trim).filter(|r| !r.is_empty()) {
        Some(region) => region,
        None => {
            let mut ids: Vec<UserId> = eligible.map(|r| r.worker_id).collect();
            ids.shuffle(rng);
            ids.truncate(max);
            return ids;
        }
    };

    let (mut matching, mut others): (Vec<&WorkerAvailability>, Vec<&WorkerAvailability>) =
        eligible.partition(|r| r.in_region(region));
    matching.shuffle(rng);
    others.shuffle(rng);

    let lead = config.region_priority_slots.min(max).min(matching.len());
    let mut ids: Vec<UserId> = matching[..lead].iter().map(|r| r.worker_id).collect();
    ids.extend(
        others
            .iter()
            .take(max.saturating_sub(ids.len()))
            .map(|r| r.worker_id),
    );
    ids
}

/// Worker presence backed by an [`AvailabilityCache`]
pub struct AvailabilityDirectory {
    cache: Arc<dyn AvailabilityCache>,
    clock: Arc<dyn Clock>,
    config: AvailabilityConfig,
    rng: Mutex<StdRng>,
}

impl AvailabilityDirectory {
    /// Create a directory with an entropy-seeded RNG
    pub fn new(
        cache: Arc<dyn AvailabilityCache>,
        clock: Arc<dyn Clock>,
        config: AvailabilityConfig,
    ) -> Self {
        Self::with_rng(cache, clock, config, StdRng::from_entropy())
    }

    /// Create a directory with a fixed seed for reproducible shuffles
    pub fn with_seed(
        cache: Arc<dyn AvailabilityCache>,
        clock: Arc<dyn Clock>,
        config: AvailabilityConfig,
        seed: u64,
    ) -> Self {
        Self::with_rng(cache, clock, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(
        cache: Arc<dyn AvailabilityCache>,
        clock: Arc<dyn Clock>,
        config: AvailabilityConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            cache,
            clock,
            config,
            rng: Mutex::new(rng),
        }
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(self.config.heartbeat_ttl_secs) * RECORD_RETENTION_FACTOR
    }

    /// Create or update a worker's record; refreshes the heartbeat
    ///
    /// The last network quality of an existing record is kept.
    #[instrument(skip(self))]
    pub async fn set_status(
        &self,
        worker_id: UserId,
        status: WorkerStatus,
        region: &str,
    ) -> AppResult<WorkerAvailability> {
        let previous = self.cache.get_worker(worker_id).await?;
        let record = WorkerAvailability {
            worker_id,
            status,
            region: region.trim().to_string(),
            last_heartbeat_at: self.clock.now(),
            last_network_quality: previous.and_then(|p| p.last_network_quality),
        };

        self.cache.set_worker(&record, self.retention()).await?;
        info!(worker_id, status = %status, region = %record.region, "Worker availability updated");
        Ok(record)
    }

    /// Refresh the heartbeat of a known worker
    ///
    /// Returns `None` when the worker has no record and must call
    /// [`set_status`](Self::set_status) first.
    #[instrument(skip(self))]
    pub async fn heartbeat(&self, worker_id: UserId) -> AppResult<Option<WorkerAvailability>> {
        let Some(mut record) = self.cache.get_worker(worker_id).await? else {
            debug!(worker_id, "Heartbeat for unknown worker");
            return Ok(None);
        };

        record.last_heartbeat_at = self.clock.now();
        self.cache.set_worker(&record, self.retention()).await?;
        Ok(Some(record))
    }

    /// Remove a worker's record
    #[instrument(skip(self))]
    pub async fn logout(&self, worker_id: UserId) -> AppResult<bool> {
        let removed = self.cache.remove_worker(worker_id).await?;
        if removed {
            info!(worker_id, "Worker logged out");
        }
        Ok(removed)
    }

    /// Store the latest link classification on the worker's record
    #[instrument(skip(self))]
    pub async fn record_quality(&self, worker_id: UserId, quality: NetworkQuality) -> AppResult<()> {
        let Some(mut record) = self.cache.get_worker(worker_id).await? else {
            return Ok(());
        };

        record.last_network_quality = Some(quality);
        self.cache.set_worker(&record, self.retention()).await
    }

    /// Put a BUSY worker back to IDLE once their session is over
    #[instrument(skip(self))]
    pub async fn release_worker(&self, worker_id: UserId) -> AppResult<()> {
        match self.cache.get_worker(worker_id).await? {
            Some(mut record) if record.status == WorkerStatus::Busy => {
                record.status = WorkerStatus::Idle;
                self.cache.set_worker(&record, self.retention()).await?;
                debug!(worker_id, "Worker released to IDLE");
                Ok(())
            }
            Some(_) | None => Ok(()),
        }
    }

    /// Mark a worker BUSY once they accepted a call
    #[instrument(skip(self))]
    pub async fn mark_busy(&self, worker_id: UserId) -> AppResult<()> {
        let Some(mut record) = self.cache.get_worker(worker_id).await? else {
            warn!(worker_id, "Accepting worker has no availability record");
            return Ok(());
        };

        record.status = WorkerStatus::Busy;
        record.last_heartbeat_at = self.clock.now();
        self.cache.set_worker(&record, self.retention()).await
    }

    pub async fn get(&self, worker_id: UserId) -> AppResult<Option<WorkerAvailability>> {
        self.cache.get_worker(worker_id).await
    }

    /// Live IDLE candidates for a new request, best first
    ///
    /// An empty result is returned as is; the caller decides what it means.
    #[instrument(skip(self))]
    pub async fn list_available(
        &self,
        preferred_region: Option<&str>,
        exclude: &[UserId],
    ) -> AppResult<Vec<UserId>> {
        let records = self.cache.list_workers().await?;
        let now = self.clock.now();

        let candidates = {
            let mut rng = self.rng.lock();
            select_candidates(&records, preferred_region, exclude, now, &self.config, &mut *rng)
        };

        if candidates.is_empty() {
            warn!(
                known_workers = records.len(),
                region = preferred_region.unwrap_or("-"),
                "No available counselors"
            );
        } else {
            debug!(count = candidates.len(), "Selected candidates");
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consulta_cache::MemoryAvailabilityCache;
    use consulta_core::ManualClock;

    fn record(id: UserId, region: &str, status: WorkerStatus, at: DateTime<Utc>) -> WorkerAvailability {
        WorkerAvailability {
            worker_id: id,
            status,
            region: region.to_string(),
            last_heartbeat_at: at,
            last_network_quality: None,
        }
    }

    #[test]
    fn test_region_priority_takes_five_matching_first() {
        let now = ManualClock::deterministic().now();
        let mut records: Vec<WorkerAvailability> = (1..=6)
            .map(|id| record(id, "Seoul", WorkerStatus::Idle, now))
            .collect();
        records.extend((101..=106).map(|id| record(id, "Busan", WorkerStatus::Idle, now)));

        let mut rng = StdRng::seed_from_u64(7);
        let ids = select_candidates(
            &records,
            Some("seoul"),
            &[],
            now,
            &AvailabilityConfig::default(),
            &mut rng,
        );

        assert_eq!(ids.len(), 10);
        assert!(ids[..5].iter().all(|id| *id <= 6));
        assert!(ids[5..].iter().all(|id| *id > 100));
    }

    #[test]
    fn test_selection_skips_stale_busy_and_excluded() {
        let clock = ManualClock::deterministic();
        let stale_at = clock.now();
        clock.advance_secs(120);
        let now = clock.now();

        let records = vec![
            record(1, "x", WorkerStatus::Idle, now),
            record(2, "x", WorkerStatus::Busy, now),
            record(3, "x", WorkerStatus::Idle, stale_at),
            record(4, "x", WorkerStatus::Offline, now),
            record(5, "x", WorkerStatus::Idle, now),
        ];

        let mut rng = StdRng::seed_from_u64(1);
        let mut ids = select_candidates(
            &records,
            None,
            &[5],
            now,
            &AvailabilityConfig::default(),
            &mut rng,
        );
        ids.sort();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn test_selection_caps_and_is_seed_deterministic() {
        let now = ManualClock::deterministic().now();
        let records: Vec<WorkerAvailability> = (1..=25)
            .map(|id| record(id, "x", WorkerStatus::Idle, now))
            .collect();
        let config = AvailabilityConfig::default();

        let a = select_candidates(&records, None, &[], now, &config, &mut StdRng::seed_from_u64(42));
        let b = select_candidates(&records, None, &[], now, &config, &mut StdRng::seed_from_u64(42));
        assert_eq!(a.len(), 10);
        assert_eq!(a, b);
    }

    #[test]
    fn test_region_lead_is_not_backfilled_from_matching() {
        let now = ManualClock::deterministic().now();
        let mut records: Vec<WorkerAvailability> = (1..=8)
            .map(|id| record(id, "north", WorkerStatus::Idle, now))
            .collect();
        records.push(record(100, "south", WorkerStatus::Idle, now));

        let ids = select_candidates(
            &records,
            Some("north"),
            &[],
            now,
            &AvailabilityConfig::default(),
            &mut StdRng::seed_from_u64(3),
        );
        assert_eq!(ids.len(), 6);
        assert_eq!(ids[5], 100);
        assert!(ids[..5].iter().all(|id| (1..=8).contains(id)));
    }

    #[tokio::test]
    async fn test_directory_lifecycle() {
        let clock = Arc::new(ManualClock::deterministic());
        let cache = Arc::new(MemoryAvailabilityCache::new(clock.clone()));
        let directory =
            AvailabilityDirectory::with_seed(cache, clock.clone(), AvailabilityConfig::default(), 9);

        assert!(directory.heartbeat(5).await.unwrap().is_none());

        directory.set_status(5, WorkerStatus::Idle, "lima").await.unwrap();
        directory.record_quality(5, NetworkQuality::Good).await.unwrap();
        assert_eq!(directory.list_available(None, &[]).await.unwrap(), vec![5]);

        // status change keeps the quality
        let busy = directory.set_status(5, WorkerStatus::Busy, "lima").await.unwrap();
        assert_eq!(busy.last_network_quality, Some(NetworkQuality::Good));
        assert!(directory.list_available(None, &[]).await.unwrap().is_empty());

        directory.release_worker(5).await.unwrap();
        assert_eq!(directory.list_available(None, &[]).await.unwrap(), vec![5]);

        // stale heartbeat reads offline; a heartbeat brings it back
        clock.advance_secs(91);
        assert!(directory.list_available(None, &[]).await.unwrap().is_empty());
        directory.heartbeat(5).await.unwrap();
        assert_eq!(directory.list_available(None, &[]).await.unwrap(), vec![5]);

        assert!(directory.logout(5).await.unwrap());
        assert!(directory.get(5).await.unwrap().is_none());
    }
}
