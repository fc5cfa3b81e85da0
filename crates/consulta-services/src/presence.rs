//! Worker presence
//!
//! Combines the network gate with the availability directory: a worker only
//! becomes IDLE after passing the gate.

use consulta_core::models::{
    NetworkMetrics, QualityAssessment, TransportProfile, UserId, WorkerAvailability, WorkerStatus,
};
use consulta_core::{AppError, AppResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::availability::AvailabilityDirectory;
use crate::network_quality::NetworkQualityGate;

/// Verdict on a metrics report
#[derive(Debug, Clone, Serialize)]
pub struct NetworkReport {
    pub assessment: QualityAssessment,
    /// Whether the worker may go available on this link
    pub passed: bool,
    pub guidance: Option<String>,
    pub profile: TransportProfile,
}

pub struct PresenceService {
    directory: Arc<AvailabilityDirectory>,
    gate: Arc<NetworkQualityGate>,
}

impl PresenceService {
    pub fn new(directory: Arc<AvailabilityDirectory>, gate: Arc<NetworkQualityGate>) -> Self {
        Self { directory, gate }
    }

    /// Change a worker's availability
    ///
    /// Going IDLE must pass the network gate, using `metrics` when given and the
    /// cached assessment otherwise. BUSY and OFFLINE are written directly.
    ///
    /// # Errors
    ///
    /// `AppError::NetworkQualityInsufficient` when the gate refuses; the
    /// worker's record is left as it was.
    #[instrument(skip(self, metrics))]
    pub async fn set_availability(
        &self,
        worker_id: UserId,
        status: WorkerStatus,
        region: &str,
        metrics: Option<&NetworkMetrics>,
    ) -> AppResult<WorkerAvailability> {
        let admitted = match status {
            WorkerStatus::Idle => Some(self.gate.admit(worker_id, metrics).await?),
            WorkerStatus::Busy | WorkerStatus::Offline => None,
        };

        let mut record = self.directory.set_status(worker_id, status, region).await?;
        if let Some(assessment) = admitted {
            self.directory
                .record_quality(worker_id, assessment.quality)
                .await?;
            record.last_network_quality = Some(assessment.quality);
        }
        Ok(record)
    }

    /// Assess a worker's link and pick transport settings for it
    #[instrument(skip(self, metrics))]
    pub async fn report_network_metrics(
        &self,
        worker_id: UserId,
        metrics: &NetworkMetrics,
        lite_mode: bool,
    ) -> AppResult<NetworkReport> {
        let assessment = self.gate.validate_for_available(worker_id, metrics).await?;
        self.directory
            .record_quality(worker_id, assessment.quality)
            .await?;

        let passed = assessment.passed();
        let profile = self.gate.adaptive_config(assessment.quality, lite_mode);
        info!(worker_id, quality = %assessment.quality, passed, lite_mode, "Network metrics reported");

        Ok(NetworkReport {
            guidance: (!passed).then(|| assessment.quality.guidance().to_string()),
            assessment,
            passed,
            profile,
        })
    }

    /// Refresh a worker's heartbeat
    ///
    /// # Errors
    ///
    /// `AppError::NotFound` when the worker never set an availability
    pub async fn heartbeat(&self, worker_id: UserId) -> AppResult<WorkerAvailability> {
        self.directory
            .heartbeat(worker_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("no availability for worker {}", worker_id)))
    }

    pub async fn logout(&self, worker_id: UserId) -> AppResult<bool> {
        self.directory.logout(worker_id).await
    }
}
