//! Worker availability model

use super::network::NetworkQuality;
use super::UserId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Presence status of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    /// Ready to be offered calls
    Idle,
    /// On a call
    Busy,
    #[default]
    Offline,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerStatus::Idle => write!(f, "IDLE"),
            WorkerStatus::Busy => write!(f, "BUSY"),
            WorkerStatus::Offline => write!(f, "OFFLINE"),
        }
    }
}

impl WorkerStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "IDLE" => Some(WorkerStatus::Idle),
            "BUSY" => Some(WorkerStatus::Busy),
            "OFFLINE" => Some(WorkerStatus::Offline),
            _ => None,
        }
    }
}

/// Availability record of one worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAvailability {
    pub worker_id: UserId,
    pub status: WorkerStatus,
    pub region: String,
    pub last_heartbeat_at: DateTime<Utc>,
    pub last_network_quality: Option<NetworkQuality>,
}

impl WorkerAvailability {
    /// Heartbeat within the TTL
    pub fn is_live(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_heartbeat_at <= ttl
    }

    /// Status as seen at `now`; a stale record reads as OFFLINE
    pub fn effective_status(&self, now: DateTime<Utc>, ttl: Duration) -> WorkerStatus {
        if self.is_live(now, ttl) {
            self.status
        } else {
            WorkerStatus::Offline
        }
    }

    /// Case-insensitive region match
    pub fn in_region(&self, region: &str) -> bool {
        self.region.eq_ignore_ascii_case(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_record_reads_offline() {
        let now = Utc::now();
        let record = WorkerAvailability {
            worker_id: 5,
            status: WorkerStatus::Idle,
            region: "Seoul".to_string(),
            last_heartbeat_at: now - Duration::seconds(91),
            last_network_quality: None,
        };
        let ttl = Duration::seconds(90);

        assert_eq!(record.effective_status(now, ttl), WorkerStatus::Offline);
        assert_eq!(
            record.effective_status(now - Duration::seconds(2), ttl),
            WorkerStatus::Idle
        );
        assert!(record.in_region("seoul"));
    }
}
