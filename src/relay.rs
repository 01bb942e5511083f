//! Subscriber relay: the single consumption loop.
//!
//! [`spawn_relay`] starts one task that opens the socket, drains its
//! conduit into a [`MessageSink`], and stops the socket when it is done.
//! The loop is bound to the returned [`RelayHandle`]: cancelling or
//! dropping the handle ends it. Failures never escape the task; decode and
//! transport errors go to [`MessageSink::report_error`] and a panic while
//! draining is caught and logged.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::controller::SocketControl;
use crate::delivery::{Conduit, DeliveryItem};
use crate::error::FeedError;
use crate::sink::MessageSink;

/// Why the relay loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// The producer closed the conduit.
    ConduitClosed,
    /// The owning scope cancelled the loop.
    Cancelled,
    /// `start_socket` failed; nothing was relayed.
    StartFailed,
    /// The loop panicked; the fault was logged.
    Faulted,
}

/// Lifecycle handle for a running relay.
///
/// Dropping the handle cancels the loop; the task then stops the socket
/// on its own.
#[derive(Debug)]
pub struct RelayHandle {
    cancel: CancellationToken,
    finished: CancellationToken,
    task: JoinHandle<RelayExit>,
}

impl RelayHandle {
    /// Requests cancellation without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the relay task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Resolves once the relay loop has ended, without consuming the handle.
    pub async fn finished(&self) {
        self.finished.cancelled().await;
    }

    /// Cancels the loop and waits for it to exit.
    pub async fn shutdown(mut self) -> RelayExit {
        self.cancel.cancel();
        self.wait().await
    }

    /// Waits for the loop to exit on its own (end of conduit).
    pub async fn join(mut self) -> RelayExit {
        self.wait().await
    }

    async fn wait(&mut self) -> RelayExit {
        match (&mut self.task).await {
            Ok(exit) => exit,
            Err(err) => {
                tracing::error!(error = %err, "relay task did not complete");
                RelayExit::Faulted
            }
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawns the relay loop for `socket` publishing into `sink`.
///
/// Must be called from within a tokio runtime.
pub fn spawn_relay<S, K>(socket: S, sink: Arc<K>) -> RelayHandle
where
    S: SocketControl,
    K: MessageSink + ?Sized,
{
    let cancel = CancellationToken::new();
    let finished = CancellationToken::new();
    let done = finished.clone().drop_guard();
    let loop_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        let _done = done;
        run(socket, sink, loop_cancel).await
    });
    RelayHandle {
        cancel,
        finished,
        task,
    }
}

async fn run<S, K>(mut socket: S, sink: Arc<K>, cancel: CancellationToken) -> RelayExit
where
    S: SocketControl,
    K: MessageSink + ?Sized,
{
    let mut conduit = match socket.start_socket() {
        Ok(conduit) => conduit,
        Err(err) => {
            sink.report_error(&err);
            socket.stop_socket();
            return RelayExit::StartFailed;
        }
    };
    let connection_id = conduit.connection_id();
    tracing::debug!(%connection_id, "relay started");

    let drained = AssertUnwindSafe(drain(&mut conduit, sink.as_ref(), &cancel))
        .catch_unwind()
        .await;
    let exit = match drained {
        Ok(exit) => exit,
        Err(panic) => {
            let err = FeedError::Consumption(panic_message(panic.as_ref()));
            tracing::error!(%connection_id, error = %err, "relay loop panicked");
            RelayExit::Faulted
        }
    };

    socket.stop_socket();
    tracing::debug!(%connection_id, ?exit, "relay stopped");
    exit
}

async fn drain<K>(conduit: &mut Conduit, sink: &K, cancel: &CancellationToken) -> RelayExit
where
    K: MessageSink + ?Sized,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return RelayExit::Cancelled,
            item = conduit.recv() => match item {
                Some(DeliveryItem::Message(message)) => sink.publish(message),
                Some(DeliveryItem::Error(err)) => sink.report_error(&err),
                None => return RelayExit::ConduitClosed,
            },
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
