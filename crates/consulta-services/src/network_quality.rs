//! Network quality gate
//!
//! Classifies a worker's link from measured metrics, decides whether the worker
//! may go available, and maps a quality level to the transport settings a call
//! should use.

use consulta_core::config::NetworkConfig;
use consulta_core::models::{
    NetworkMetrics, NetworkQuality, Notification, QualityAssessment, TransportProfile, UserId,
};
use consulta_core::traits::{AvailabilityCache, NotificationChannel};
use consulta_core::{AppError, AppResult, Clock};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::constants::{LITE_AUDIO_BITRATE_KBPS, LITE_SAMPLE_RATE_HZ};

/// Classify metrics against the configured thresholds
///
/// Thresholds are strict upper bounds on latency and jitter. Packet loss at or
/// above the configured ceiling forces POOR.
pub fn classify(metrics: &NetworkMetrics, config: &NetworkConfig) -> NetworkQuality {
    if metrics.packet_loss_percent >= config.max_packet_loss_percent {
        return NetworkQuality::Poor;
    }

    let within = |latency: u32, jitter: u32| metrics.latency_ms < latency && metrics.jitter_ms < jitter;

    if within(config.excellent_latency_ms, config.excellent_jitter_ms) {
        NetworkQuality::Excellent
    } else if within(config.good_latency_ms, config.good_jitter_ms) {
        NetworkQuality::Good
    } else if within(config.fair_latency_ms, config.fair_jitter_ms) {
        NetworkQuality::Fair
    } else {
        NetworkQuality::Poor
    }
}

/// Transport settings for a quality level; lite mode wins over quality
pub fn adaptive_config(quality: NetworkQuality, lite_mode: bool) -> TransportProfile {
    if lite_mode {
        return TransportProfile {
            audio_bitrate_kbps: LITE_AUDIO_BITRATE_KBPS,
            sample_rate_hz: LITE_SAMPLE_RATE_HZ,
            channels: 1,
            video_enabled: false,
            video_bitrate_kbps: 0,
        };
    }

    match quality {
        NetworkQuality::Excellent => TransportProfile {
            audio_bitrate_kbps: 64,
            sample_rate_hz: 48_000,
            channels: 2,
            video_enabled: true,
            video_bitrate_kbps: 1_500,
        },
        NetworkQuality::Good => TransportProfile {
            audio_bitrate_kbps: 48,
            sample_rate_hz: 48_000,
            channels: 1,
            video_enabled: true,
            video_bitrate_kbps: 800,
        },
        NetworkQuality::Fair => TransportProfile {
            audio_bitrate_kbps: 32,
            sample_rate_hz: 24_000,
            channels: 1,
            video_enabled: false,
            video_bitrate_kbps: 0,
        },
        NetworkQuality::Poor => TransportProfile {
            audio_bitrate_kbps: 16,
            sample_rate_hz: 16_000,
            channels: 1,
            video_enabled: false,
            video_bitrate_kbps: 0,
        },
    }
}

/// Gate in front of a worker going available
pub struct NetworkQualityGate {
    cache: Arc<dyn AvailabilityCache>,
    notifier: Arc<dyn NotificationChannel>,
    clock: Arc<dyn Clock>,
    config: NetworkConfig,
}

impl NetworkQualityGate {
    pub fn new(
        cache: Arc<dyn AvailabilityCache>,
        notifier: Arc<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
        config: NetworkConfig,
    ) -> Self {
        Self {
            cache,
            notifier,
            clock,
            config,
        }
    }

    pub fn classify(&self, metrics: &NetworkMetrics) -> NetworkQuality {
        classify(metrics, &self.config)
    }

    pub fn adaptive_config(&self, quality: NetworkQuality, lite_mode: bool) -> TransportProfile {
        adaptive_config(quality, lite_mode)
    }

    /// Classify and cache a worker's metrics
    ///
    /// The assessment passes when the link is GOOD or better. A failing
    /// assessment publishes guidance to the worker.
    ///
    /// # Errors
    ///
    /// - `AppError::Validation` if the metrics are out of range
    /// - cache errors from storing the assessment
    #[instrument(skip(self, metrics))]
    pub async fn validate_for_available(
        &self,
        worker_id: UserId,
        metrics: &NetworkMetrics,
    ) -> AppResult<QualityAssessment> {
        metrics.validate()?;

        let quality = self.classify(metrics);
        let assessment = QualityAssessment {
            worker_id,
            quality,
            metrics: *metrics,
            assessed_at: self.clock.now(),
        };

        self.cache
            .set_quality(
                &assessment,
                Duration::from_secs(self.config.quality_cache_ttl_secs),
            )
            .await?;

        if assessment.passed() {
            debug!(worker_id, quality = %quality, "Network quality accepted");
        } else {
            warn!(
                worker_id,
                quality = %quality,
                latency_ms = metrics.latency_ms,
                jitter_ms = metrics.jitter_ms,
                packet_loss = metrics.packet_loss_percent,
                "Network quality below availability threshold"
            );
            self.notifier.publish(Notification::NetworkGuidance {
                worker_id,
                quality,
                message: quality.guidance().to_string(),
            });
        }

        Ok(assessment)
    }

    /// Decide whether a worker may become IDLE
    ///
    /// Uses the given metrics, or else the cached assessment. The directory is
    /// never touched here.
    ///
    /// # Errors
    ///
    /// `AppError::NetworkQualityInsufficient` when the link is below GOOD or no
    /// recent assessment exists.
    #[instrument(skip(self, metrics))]
    pub async fn admit(
        &self,
        worker_id: UserId,
        metrics: Option<&NetworkMetrics>,
    ) -> AppResult<QualityAssessment> {
        let assessment = match metrics {
            Some(metrics) => Some(self.validate_for_available(worker_id, metrics).await?),
            None => self.cache.get_quality(worker_id).await?,
        };

        match assessment {
            Some(assessment) if assessment.passed() => {
                info!(worker_id, quality = %assessment.quality, "Worker admitted");
                Ok(assessment)
            }
            Some(assessment) => Err(AppError::NetworkQualityInsufficient {
                quality: assessment.quality,
                guidance: assessment.quality.guidance().to_string(),
            }),
            None => Err(AppError::NetworkQualityInsufficient {
                quality: NetworkQuality::Poor,
                guidance: "Run a network check before going available.".to_string(),
            }),
        }
    }
}
