//! Background drivers
//!
//! Interval loops that call the relay and billing entry points. The services
//! themselves never sleep; tests call `advance_due` and `tick` directly.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::billing_meter::BillingMeter;
use crate::matching::MatchingScheduler;

/// Advance timed-out offers every `period`
pub fn spawn_relay_driver(scheduler: Arc<MatchingScheduler>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(period_ms = period.as_millis() as u64, "Relay driver started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match scheduler.advance_due().await {
                Ok(report) if report.advanced + report.exhausted > 0 => {
                    debug!(
                        advanced = report.advanced,
                        exhausted = report.exhausted,
                        "Relay pass"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Relay pass failed"),
            }
        }
    })
}

/// Bill active sessions every `period`
pub fn spawn_billing_driver(meter: Arc<BillingMeter>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(period_secs = period.as_secs(), "Billing driver started");
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = meter.tick().await {
                error!(error = %e, "Billing sweep failed");
            }
        }
    })
}

/// Handles of the running drivers
#[derive(Debug, Default)]
pub struct Drivers {
    handles: Vec<JoinHandle<()>>,
}

impl Drivers {
    /// Start the relay and billing loops
    pub fn start(
        scheduler: Arc<MatchingScheduler>,
        meter: Arc<BillingMeter>,
        relay_period: Duration,
        billing_period: Duration,
    ) -> Self {
        Self {
            handles: vec![
                spawn_relay_driver(scheduler, relay_period),
                spawn_billing_driver(meter, billing_period),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every loop
    pub fn shutdown(self) {
        for handle in &self.handles {
            handle.abort();
        }
        info!(drivers = self.handles.len(), "Background drivers stopped");
    }
}
