//! Worker presence and network DTOs

use chrono::{DateTime, Utc};
use consulta_core::models::{NetworkMetrics, NetworkQuality, UserId, WorkerAvailability, WorkerStatus};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Change a counselor's availability
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SetAvailabilityRequest {
    pub status: WorkerStatus,

    #[validate(length(min = 1, max = 64, message = "Region must be 1-64 characters"))]
    pub region: String,

    /// Fresh measurements; without them going IDLE needs a recent network check
    #[validate(nested)]
    pub metrics: Option<NetworkMetrics>,
}

/// Report link measurements
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NetworkMetricsRequest {
    #[validate(nested)]
    pub metrics: NetworkMetrics,

    /// Ask for the low-bandwidth transport profile
    #[serde(default)]
    pub lite_mode: bool,
}

/// Availability record
#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityResponse {
    pub worker_id: UserId,
    pub status: WorkerStatus,
    pub region: String,
    pub last_heartbeat_at: DateTime<Utc>,
    pub last_network_quality: Option<NetworkQuality>,
}

impl From<WorkerAvailability> for AvailabilityResponse {
    fn from(record: WorkerAvailability) -> Self {
        Self {
            worker_id: record.worker_id,
            status: record.status,
            region: record.region,
            last_heartbeat_at: record.last_heartbeat_at,
            last_network_quality: record.last_network_quality,
        }
    }
}
