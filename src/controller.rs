//! Socket controller: start/stop lifecycle over one connection.
//!
//! [`SocketController`] owns at most one live connection. Starting spawns
//! the transport task with a fresh [`ConnectionHandler`] and returns the
//! read end of its conduit. Stopping sends a normal-closure frame and closes
//! the conduit. There is no retry: one best-effort attempt per start.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::FeedConfig;
use crate::delivery::Conduit;
use crate::error::FeedError;
use crate::handler::ConnectionHandler;
use crate::transport::{self, CloseRequest, TransportOptions};

/// Start/stop capability consumed by [`crate::relay::spawn_relay`].
pub trait SocketControl: Send + 'static {
    /// Opens a connection and returns the conduit it feeds.
    ///
    /// # Errors
    ///
    /// Returns a [`FeedError`] if the connection could not be started.
    fn start_socket(&mut self) -> Result<Conduit, FeedError>;

    /// Closes the active connection, if any. Must be idempotent.
    fn stop_socket(&mut self);
}

/// Live connection owned by the controller.
#[derive(Debug)]
struct Connection {
    id: Uuid,
    handler: Arc<ConnectionHandler>,
    close_tx: Option<oneshot::Sender<CloseRequest>>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Asks the transport task to close, then closes the conduit so any
    /// later event from this connection is discarded.
    fn close(mut self, request: CloseRequest) {
        if let Some(tx) = self.close_tx.take() {
            // The task may already have finished on its own.
            let _ = tx.send(request);
        }
        self.handler.close();
    }

    fn is_live(&self) -> bool {
        !self.task.is_finished() && !self.handler.is_closed()
    }
}

/// Owns the WebSocket connection for one consumer.
#[derive(Debug)]
pub struct SocketController {
    endpoint: String,
    transport: TransportOptions,
    conduit_capacity: usize,
    log_frames: bool,
    connection: Option<Connection>,
}

impl SocketController {
    /// Builds a controller from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::InvalidEndpoint`] if the endpoint is not a
    /// WebSocket URL, or [`FeedError::Config`] if the conduit capacity is
    /// zero.
    pub fn from_config(config: &FeedConfig) -> Result<Self, FeedError> {
        transport::validate_endpoint(&config.endpoint)?;
        if config.conduit_capacity == 0 {
            return Err(FeedError::Config(
                "conduit capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            endpoint: config.endpoint.clone(),
            transport: config.transport.clone(),
            conduit_capacity: config.conduit_capacity,
            log_frames: config.log_frames,
            connection: None,
        })
    }

    /// The endpoint every connection is opened against.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns `true` while a connection is held and still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_live)
    }

    /// Identifier of the held connection, if any.
    #[must_use]
    pub fn connection_id(&self) -> Option<Uuid> {
        self.connection.as_ref().map(|c| c.id)
    }

    /// Opens a new connection and returns its conduit.
    ///
    /// Must be called from within a tokio runtime. Connecting happens in the
    /// background; a failed connect shows up as one error item followed by
    /// the end of the conduit. Any previous connection is superseded: its
    /// conduit ends and it is closed normally.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::NoRuntime`] when no tokio runtime is available.
    pub fn start_socket(&mut self) -> Result<Conduit, FeedError> {
        let runtime = Handle::try_current().map_err(|_| FeedError::NoRuntime)?;

        if let Some(previous) = self.connection.take() {
            tracing::info!(connection_id = %previous.id, "superseding active connection");
            previous.close(CloseRequest::default());
        }

        let id = Uuid::new_v4();
        let (handler, conduit) = ConnectionHandler::new(id, self.conduit_capacity, self.log_frames);
        let handler = Arc::new(handler);
        let (close_tx, close_rx) = oneshot::channel();

        let task = runtime.spawn(transport::run_connection(
            id,
            self.endpoint.clone(),
            self.transport.clone(),
            Arc::clone(&handler),
            close_rx,
        ));

        tracing::info!(connection_id = %id, endpoint = %self.endpoint, "socket started");
        self.connection = Some(Connection {
            id,
            handler,
            close_tx: Some(close_tx),
            task,
        });
        Ok(conduit)
    }

    /// Closes the active connection with a normal-closure status and an
    /// empty reason. No-op when nothing is connected.
    pub fn stop_socket(&mut self) {
        let Some(connection) = self.connection.take() else {
            tracing::trace!("stop requested with no active connection");
            return;
        };
        tracing::info!(connection_id = %connection.id, "socket stopping");
        connection.close(CloseRequest::default());
    }
}

impl SocketControl for SocketController {
    fn start_socket(&mut self) -> Result<Conduit, FeedError> {
        Self::start_socket(self)
    }

    fn stop_socket(&mut self) {
        Self::stop_socket(self);
    }
}

impl Drop for SocketController {
    fn drop(&mut self) {
        self.stop_socket();
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::delivery::DeliveryItem;

    fn controller(endpoint: &str) -> SocketController {
        match SocketController::from_config(&FeedConfig::with_endpoint(endpoint)) {
            Ok(c) => c,
            Err(e) => panic!("controller build failed: {e}"),
        }
    }

    #[test]
    fn rejects_non_websocket_endpoint() {
        let result = SocketController::from_config(&FeedConfig::with_endpoint("tcp://host:1"));
        assert!(matches!(result, Err(FeedError::InvalidEndpoint { .. })));
    }

    #[test]
    fn start_outside_runtime_fails() {
        let mut c = controller("ws://127.0.0.1:9/feed");
        assert!(matches!(c.start_socket(), Err(FeedError::NoRuntime)));
        assert!(c.connection_id().is_none());
    }

    #[test]
    fn stop_without_connection_is_noop() {
        let mut c = controller("ws://127.0.0.1:9/feed");
        c.stop_socket();
        c.stop_socket();
        assert!(!c.is_active());
    }

    #[tokio::test]
    async fn connect_failure_yields_one_error_then_end() {
        // Bind then drop to get a port with nothing listening.
        let port = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(l) => l.local_addr().map(|a| a.port()).unwrap_or(9),
            Err(e) => panic!("bind failed: {e}"),
        };
        let mut c = controller(&format!("ws://127.0.0.1:{port}/feed"));
        let Ok(mut conduit) = c.start_socket() else {
            panic!("start failed");
        };

        let first = tokio::time::timeout(Duration::from_secs(5), conduit.recv()).await;
        let Ok(Some(DeliveryItem::Error(err))) = first else {
            panic!("expected a transport error item");
        };
        assert!(matches!(err, FeedError::Transport(_)));
        let end = tokio::time::timeout(Duration::from_secs(5), conduit.recv()).await;
        assert!(matches!(end, Ok(None)));
        assert!(!c.is_active());
    }

    #[tokio::test]
    async fn restart_supersedes_previous_connection() {
        let mut c = controller("ws://127.0.0.1:9/feed");
        let Ok(mut first) = c.start_socket() else {
            panic!("first start failed");
        };
        let first_id = c.connection_id();
        let Ok(second) = c.start_socket() else {
            panic!("second start failed");
        };
        assert_ne!(c.connection_id(), first_id);
        assert_eq!(c.connection_id(), Some(second.connection_id()));

        // The superseded conduit ends without delivering anything further.
        let next = tokio::time::timeout(Duration::from_secs(5), first.recv()).await;
        assert!(matches!(next, Ok(None)));
        c.stop_socket();
        assert!(c.connection_id().is_none());
    }
}
