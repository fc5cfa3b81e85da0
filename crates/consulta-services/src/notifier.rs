//! Notification channel implementations

use crate::constants::NOTIFICATION_BUFFER;
use consulta_core::models::Notification;
use consulta_core::traits::NotificationChannel;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Fans notifications out to in-process subscribers
///
/// Publishing never blocks; subscribers that fall behind lose the oldest events.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new() -> Self {
        Self::with_capacity(NOTIFICATION_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationChannel for BroadcastNotifier {
    fn publish(&self, notification: Notification) {
        let kind = notification.kind();
        match self.sender.send(notification) {
            Ok(receivers) => debug!(kind, receivers, "Notification published"),
            Err(_) => debug!(kind, "Notification dropped, no subscribers"),
        }
    }
}

/// Writes every notification to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl NotificationChannel for TracingNotifier {
    fn publish(&self, notification: Notification) {
        info!(
            kind = notification.kind(),
            recipients = ?notification.recipients(),
            "Notification"
        );
    }
}
