//! In-process change notification fired after committed synchronisations.

use tokio::sync::watch;

/// Receives the freshness marker of every committed synchronisation.
pub trait ChangeWatcher: Send + Sync {
    /// Called once per successful commit with the new freshness marker.
    fn notify_changed(&self, marker: &str);
}

/// Broadcasts the latest marker to any number of subscribers.
///
/// Subscribers only ever see the most recent marker; intermediate markers
/// are coalesced.
#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    sender: watch::Sender<Option<String>>,
}

impl ChangeNotifier {
    /// Create a notifier with no marker published yet.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _receiver) = watch::channel(None);
        Self { sender }
    }

    /// Receiver that wakes whenever a new marker is published.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.sender.subscribe()
    }

    /// Most recently published marker.
    #[must_use]
    pub fn current(&self) -> Option<String> {
        self.sender.borrow().clone()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeWatcher for ChangeNotifier {
    fn notify_changed(&self, marker: &str) {
        self.sender.send_replace(Some(marker.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_observe_latest_marker() {
        let notifier = ChangeNotifier::new();
        let mut receiver = notifier.subscribe();
        assert_eq!(notifier.current(), None);

        notifier.notify_changed("2024-01-01T00:00:00.000001Z");
        notifier.notify_changed("2024-01-01T00:00:00.000002Z");

        assert!(receiver.changed().await.is_ok());
        assert_eq!(
            receiver.borrow_and_update().as_deref(),
            Some("2024-01-01T00:00:00.000002Z")
        );
        assert_eq!(
            notifier.current().as_deref(),
            Some("2024-01-01T00:00:00.000002Z")
        );
    }

    #[test]
    fn notifying_without_subscribers_keeps_marker() {
        let notifier = ChangeNotifier::default();
        notifier.notify_changed("marker");
        assert_eq!(notifier.current().as_deref(), Some("marker"));
    }
}
