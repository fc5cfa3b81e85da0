//! Relay failover hooks

use async_trait::async_trait;
use consulta_core::models::CallSession;
use consulta_core::traits::FailoverHook;
use tracing::warn;

/// Records that nobody took a request; nothing is retried
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingFailover;

#[async_trait]
impl FailoverHook for LoggingFailover {
    async fn on_relay_exhausted(&self, session: &CallSession) {
        warn!(
            session_id = %session.id,
            requester_id = session.requester_id,
            candidates = session.candidate_list.len(),
            region = session.preferred_region.as_deref().unwrap_or("-"),
            "Relay exhausted without an accepting counselor"
        );
    }
}
