//! Downstream sinks for relayed messages.
//!
//! [`MessageSink`] is the capability the relay publishes into. It is called
//! from the relay task, so implementations must accept cross-thread calls
//! and hand the value to their own consumers. [`LatestMessage`] is the
//! stock implementation: a watch channel that always holds the most recent
//! message.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;

use crate::codec::Message;
use crate::error::FeedError;

/// Receiver of relayed messages and errors.
pub trait MessageSink: Send + Sync + 'static {
    /// Delivers one decoded message.
    fn publish(&self, message: Message);

    /// Reports a decode or transport failure. Must not panic.
    ///
    /// The default implementation logs the error.
    fn report_error(&self, error: &FeedError) {
        if error.is_recoverable() {
            tracing::warn!(error = %error, "feed error");
        } else {
            tracing::error!(error = %error, "feed error");
        }
    }
}

/// Observable holding the latest published [`Message`].
#[derive(Debug)]
pub struct LatestMessage {
    sender: watch::Sender<Option<Message>>,
    published: AtomicU64,
}

impl LatestMessage {
    /// Creates an empty observable.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Returns a clone of the latest message, if any was published.
    #[must_use]
    pub fn latest(&self) -> Option<Message> {
        self.sender.borrow().clone()
    }

    /// Creates a receiver that is notified on every publish.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Option<Message>> {
        self.sender.subscribe()
    }

    /// Number of messages published so far.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for LatestMessage {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageSink for LatestMessage {
    fn publish(&self, message: Message) {
        self.sender.send_replace(Some(message));
        self.published.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::codec::StatusUpdate;

    #[test]
    fn starts_empty() {
        let sink = LatestMessage::new();
        assert!(sink.latest().is_none());
        assert_eq!(sink.published_count(), 0);
    }

    #[test]
    fn keeps_only_latest() {
        let sink = LatestMessage::new();
        sink.publish(Message::BookingOpened);
        sink.publish(Message::Status(StatusUpdate {
            status: "in_progress".to_string(),
        }));
        assert_eq!(sink.published_count(), 2);
        assert_eq!(sink.latest().map(|m| m.type_str()), Some("status"));
    }

    #[tokio::test]
    async fn subscribers_see_updates() {
        let sink = LatestMessage::new();
        let mut rx = sink.subscribe();
        sink.publish(Message::BookingClosed);
        assert!(rx.changed().await.is_ok());
        assert_eq!(*rx.borrow_and_update(), Some(Message::BookingClosed));
    }

    #[test]
    fn default_report_error_does_not_panic() {
        let sink = LatestMessage::new();
        sink.report_error(&FeedError::Consumption("boom".to_string()));
        assert!(sink.latest().is_none());
    }
}
