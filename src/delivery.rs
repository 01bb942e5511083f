//! Delivery conduit between the connection handler and the relay.
//!
//! The conduit is a bounded [`tokio::sync::mpsc`] channel. The sending half
//! lives inside [`crate::handler::ConnectionHandler`]; the receiving half is
//! the [`Conduit`] returned by `start_socket`. When the channel is full the
//! connection task waits, so a slow consumer slows the socket read loop
//! instead of growing memory.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use uuid::Uuid;

use crate::codec::Message;
use crate::error::FeedError;

/// One unit handed from the producer to the consumer.
#[derive(Debug)]
pub enum DeliveryItem {
    /// A successfully decoded frame.
    Message(Message),
    /// A decode failure or a terminal transport failure.
    Error(FeedError),
}

impl DeliveryItem {
    /// Returns `true` for the [`DeliveryItem::Error`] variant.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Producer half of a conduit.
pub type ConduitSender = mpsc::Sender<DeliveryItem>;

/// Consumer half of a conduit: an ordered stream of [`DeliveryItem`]s for
/// one connection.
#[derive(Debug)]
pub struct Conduit {
    connection_id: Uuid,
    receiver: mpsc::Receiver<DeliveryItem>,
}

impl Conduit {
    /// Waits for the next item. Returns `None` once the producer closed the
    /// conduit and every buffered item was taken.
    pub async fn recv(&mut self) -> Option<DeliveryItem> {
        self.receiver.recv().await
    }

    /// Returns the next buffered item without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`TryRecvError::Empty`] when nothing is buffered yet and
    /// [`TryRecvError::Disconnected`] once the conduit is closed and drained.
    pub fn try_recv(&mut self) -> Result<DeliveryItem, TryRecvError> {
        self.receiver.try_recv()
    }

    /// Identifier of the connection that feeds this conduit.
    #[must_use]
    pub const fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Returns `true` if the producer side has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}

/// Creates a conduit with the given capacity. A capacity of zero is raised
/// to one.
#[must_use]
pub fn conduit(capacity: usize, connection_id: Uuid) -> (ConduitSender, Conduit) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        sender,
        Conduit {
            connection_id,
            receiver,
        },
    )
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;
    use crate::codec::Message;

    #[tokio::test]
    async fn items_arrive_in_send_order() {
        let (tx, mut rx) = conduit(8, Uuid::new_v4());
        for _ in 0..3 {
            let _ = tx.send(DeliveryItem::Message(Message::BookingOpened)).await;
        }
        let _ = tx
            .send(DeliveryItem::Message(Message::BookingClosed))
            .await;
        drop(tx);

        let mut seen = Vec::new();
        while let Some(item) = rx.recv().await {
            let DeliveryItem::Message(msg) = item else {
                panic!("unexpected error item");
            };
            seen.push(msg.type_str());
        }
        assert_eq!(
            seen,
            ["booking_opened", "booking_opened", "booking_opened", "booking_closed"]
        );
    }

    #[test]
    fn recv_waits_until_an_item_is_sent() {
        let (tx, mut rx) = conduit(1, Uuid::new_v4());
        {
            let mut recv = task::spawn(rx.recv());
            assert_pending!(recv.poll());
            assert!(tx.try_send(DeliveryItem::Message(Message::BookingOpened)).is_ok());
            assert!(recv.is_woken());
            let item = assert_ready!(recv.poll());
            assert!(matches!(item, Some(DeliveryItem::Message(_))));
        }
        drop(tx);
        assert!(rx.is_closed());
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let (tx, mut rx) = conduit(0, Uuid::new_v4());
        assert!(tx.try_send(DeliveryItem::Message(Message::BookingOpened)).is_ok());
        assert!(tx.try_send(DeliveryItem::Message(Message::BookingOpened)).is_err());
        assert!(rx.try_recv().is_ok());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        drop(tx);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[test]
    fn connection_id_is_carried() {
        let id = Uuid::new_v4();
        let (_tx, rx) = conduit(4, id);
        assert_eq!(rx.connection_id(), id);
    }
}
