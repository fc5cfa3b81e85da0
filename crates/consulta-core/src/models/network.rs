//! Network quality and media transport models

use super::{SessionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Link measurements reported by a client
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct NetworkMetrics {
    /// Round-trip latency in milliseconds
    #[validate(range(max = 60000))]
    pub latency_ms: u32,

    /// Jitter in milliseconds
    #[validate(range(max = 60000))]
    pub jitter_ms: u32,

    /// Packet loss percentage
    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0))]
    pub packet_loss_percent: f64,

    /// Measured downstream bandwidth
    #[serde(default)]
    pub bandwidth_kbps: u32,
}

/// Link classification, ordered worst to best
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NetworkQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkQuality::Poor => write!(f, "POOR"),
            NetworkQuality::Fair => write!(f, "FAIR"),
            NetworkQuality::Good => write!(f, "GOOD"),
            NetworkQuality::Excellent => write!(f, "EXCELLENT"),
        }
    }
}

impl NetworkQuality {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "POOR" => Some(NetworkQuality::Poor),
            "FAIR" => Some(NetworkQuality::Fair),
            "GOOD" => Some(NetworkQuality::Good),
            "EXCELLENT" => Some(NetworkQuality::Excellent),
            _ => None,
        }
    }

    /// GOOD or better may go available
    pub fn allows_available(&self) -> bool {
        *self >= NetworkQuality::Good
    }

    /// Advice shown to a worker whose link is not good enough
    pub fn guidance(&self) -> &'static str {
        match self {
            NetworkQuality::Excellent | NetworkQuality::Good => "Network quality is sufficient.",
            NetworkQuality::Fair => {
                "Your connection is unstable. Move closer to your router or switch to a wired connection before going available."
            }
            NetworkQuality::Poor => {
                "Your connection is too weak for calls. Close other network-heavy apps or change networks, then try again."
            }
        }
    }
}

/// A classification kept for a short while
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub worker_id: UserId,
    pub quality: NetworkQuality,
    pub metrics: NetworkMetrics,
    pub assessed_at: DateTime<Utc>,
}

impl QualityAssessment {
    pub fn passed(&self) -> bool {
        self.quality.allows_available()
    }
}

/// Media transport parameters picked for a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportProfile {
    pub audio_bitrate_kbps: u32,
    pub sample_rate_hz: u32,
    pub channels: u8,
    pub video_enabled: bool,
    pub video_bitrate_kbps: u32,
}

/// Opaque media credential for one participant of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaToken {
    pub session_id: SessionId,
    pub participant_id: UserId,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}
