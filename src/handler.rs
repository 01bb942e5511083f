//! Connection handler: the event sink for one WebSocket connection.
//!
//! The transport driver reports connection events through the
//! [`SocketListener`] trait. [`ConnectionHandler`] turns them into
//! [`DeliveryItem`]s on the conduit it alone owns. Closing drops the only
//! sender, which is what ends the consumer's stream.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::codec;
use crate::delivery::{Conduit, ConduitSender, DeliveryItem, conduit};
use crate::error::FeedError;

/// Callback surface driven by the transport for a single connection.
///
/// Events arrive in order from one task: `on_open` first (unless the
/// connect attempt fails), then any number of `on_message`, then exactly
/// one of `on_closed` or `on_failure`. `on_closing` precedes `on_closed`
/// when the peer initiates the close handshake.
pub trait SocketListener: Send + Sync {
    /// The handshake completed with the given HTTP status.
    fn on_open(&self, status: u16) -> impl Future<Output = ()> + Send;

    /// A text frame arrived.
    fn on_message(&self, raw: &str) -> impl Future<Output = ()> + Send;

    /// The peer sent a close frame.
    fn on_closing(&self, code: u16, reason: &str) -> impl Future<Output = ()> + Send;

    /// The connection is fully closed.
    fn on_closed(&self, code: u16, reason: &str) -> impl Future<Output = ()> + Send;

    /// The connect attempt or the live connection failed.
    fn on_failure(&self, cause: FeedError) -> impl Future<Output = ()> + Send;
}

/// Single producer for one connection's conduit.
#[derive(Debug)]
pub struct ConnectionHandler {
    connection_id: Uuid,
    sender: Mutex<Option<ConduitSender>>,
    closed: CancellationToken,
    active: AtomicBool,
    log_frames: bool,
}

impl ConnectionHandler {
    /// Creates a handler and the conduit it feeds.
    #[must_use]
    pub fn new(connection_id: Uuid, capacity: usize, log_frames: bool) -> (Self, Conduit) {
        let (sender, conduit) = conduit(capacity, connection_id);
        let handler = Self {
            connection_id,
            sender: Mutex::new(Some(sender)),
            closed: CancellationToken::new(),
            active: AtomicBool::new(false),
            log_frames,
        };
        (handler, conduit)
    }

    /// Identifier of the connection this handler serves.
    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Returns `true` between `on_open` and close.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` once the conduit has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Closes the conduit. Returns `true` only for the call that actually
    /// closed it; later calls are no-ops.
    ///
    /// A push waiting for capacity is abandoned and its item dropped; items
    /// already buffered stay readable.
    pub fn close(&self) -> bool {
        self.active.store(false, Ordering::Release);
        self.closed.cancel();
        let taken = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if taken.is_some() {
            tracing::debug!(connection_id = %self.connection_id, "conduit closed");
        }
        taken.is_some()
    }

    fn sender(&self) -> Option<ConduitSender> {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes one item, waiting for capacity until the handler is closed.
    /// Returns `false` if the item was discarded.
    async fn push(&self, item: DeliveryItem) -> bool {
        let Some(sender) = self.sender() else {
            tracing::trace!(connection_id = %self.connection_id, "event after close ignored");
            return false;
        };
        tokio::select! {
            biased;
            () = self.closed.cancelled() => {
                tracing::trace!(connection_id = %self.connection_id, "pending item dropped on close");
                false
            }
            sent = sender.send(item) => {
                if sent.is_err() {
                    tracing::debug!(connection_id = %self.connection_id, "consumer dropped the conduit");
                    self.close();
                    return false;
                }
                true
            }
        }
    }
}

impl SocketListener for ConnectionHandler {
    async fn on_open(&self, status: u16) {
        if self.is_closed() {
            return;
        }
        self.active.store(true, Ordering::Release);
        tracing::info!(connection_id = %self.connection_id, status, "socket opened");
    }

    async fn on_message(&self, raw: &str) {
        if self.log_frames {
            tracing::debug!(connection_id = %self.connection_id, frame = raw, "frame received");
        }
        let item = match codec::decode(raw) {
            Ok(message) => DeliveryItem::Message(message),
            Err(err) => {
                tracing::warn!(connection_id = %self.connection_id, error = %err, "dropping undecodable frame");
                DeliveryItem::Error(err.into())
            }
        };
        self.push(item).await;
    }

    async fn on_closing(&self, code: u16, reason: &str) {
        tracing::info!(connection_id = %self.connection_id, code, reason, "socket closing");
        self.close();
    }

    async fn on_closed(&self, code: u16, reason: &str) {
        tracing::info!(connection_id = %self.connection_id, code, reason, "socket closed");
        self.close();
    }

    async fn on_failure(&self, cause: FeedError) {
        if self.is_closed() {
            tracing::debug!(connection_id = %self.connection_id, error = %cause, "failure after close ignored");
            return;
        }
        tracing::error!(connection_id = %self.connection_id, error = %cause, "socket failed");
        self.push(DeliveryItem::Error(cause)).await;
        self.close();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio_test::{assert_pending, assert_ready, task};
    use tokio_tungstenite::tungstenite;

    use super::*;
    use crate::codec::{DecodeErrorKind, Message};

    fn handler(capacity: usize) -> (ConnectionHandler, Conduit) {
        ConnectionHandler::new(Uuid::new_v4(), capacity, false)
    }

    #[tokio::test]
    async fn open_emits_nothing_and_marks_active() {
        let (h, mut rx) = handler(4);
        assert!(!h.is_active());
        h.on_open(101).await;
        assert!(h.is_active());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn bad_frame_is_reported_and_stream_continues() {
        let (h, mut rx) = handler(4);
        h.on_message(r#"{"type":"unknown"}"#).await;
        h.on_message(r#"{"type":"location","lat":1.0,"lon":2.0}"#).await;

        let Some(DeliveryItem::Error(err)) = rx.recv().await else {
            panic!("expected error item first");
        };
        assert_eq!(err.decode_kind(), Some(DecodeErrorKind::UnrecognizedType));
        let Some(DeliveryItem::Message(Message::Location(loc))) = rx.recv().await else {
            panic!("expected location next");
        };
        assert!((loc.lat - 1.0).abs() < f64::EPSILON);
        assert!(!h.is_closed());
    }

    #[tokio::test]
    async fn failure_emits_one_error_then_closes() {
        let (h, mut rx) = handler(4);
        h.on_open(101).await;
        h.on_failure(tungstenite::Error::ConnectionClosed.into()).await;
        h.on_failure(tungstenite::Error::AlreadyClosed.into()).await;
        h.on_message(r#"{"type":"booking_opened"}"#).await;

        let Some(DeliveryItem::Error(err)) = rx.recv().await else {
            panic!("expected transport error");
        };
        assert!(matches!(err, FeedError::Transport(_)));
        assert!(rx.recv().await.is_none());
        assert!(!h.is_active());
    }

    #[tokio::test]
    async fn closed_event_ends_conduit() {
        let (h, mut rx) = handler(4);
        h.on_message(r#"{"type":"booking_closed"}"#).await;
        h.on_closing(1000, "").await;
        h.on_closed(1000, "").await;

        assert!(matches!(
            rx.recv().await,
            Some(DeliveryItem::Message(Message::BookingClosed))
        ));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn close_is_idempotent() {
        let (h, _rx) = handler(1);
        assert!(h.close());
        assert!(!h.close());
        assert!(h.is_closed());
    }

    #[test]
    fn close_abandons_push_waiting_for_capacity() {
        let (h, mut rx) = handler(1);
        let mut first = task::spawn(h.on_message(r#"{"type":"booking_opened"}"#));
        assert_ready!(first.poll());

        let mut second = task::spawn(h.on_message(r#"{"type":"booking_closed"}"#));
        assert_pending!(second.poll());
        assert!(h.close());
        assert!(second.is_woken());
        assert_ready!(second.poll());

        assert!(matches!(
            rx.try_recv(),
            Ok(DeliveryItem::Message(Message::BookingOpened))
        ));
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[tokio::test]
    async fn dropped_consumer_closes_handler() {
        let (h, rx) = handler(1);
        drop(rx);
        h.on_message(r#"{"type":"booking_opened"}"#).await;
        assert!(h.is_closed());
    }
}
