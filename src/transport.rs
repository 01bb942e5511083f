//! WebSocket transport driver.
//!
//! [`run_connection`] owns one `tokio-tungstenite` stream for its whole
//! life: it connects, reads frames, and reports every event to a
//! [`SocketListener`]. A local close is requested through a oneshot so the
//! same task that reads the socket also writes the close frame.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config};
use uuid::Uuid;

use crate::error::FeedError;
use crate::handler::SocketListener;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code for a graceful, application-initiated shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Reported when the peer closes without a status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Transport settings applied to every connection.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Largest accepted message in bytes.
    pub max_message_size: usize,
    /// Disable Nagle's algorithm on the TCP socket.
    pub disable_nagle: bool,
    /// How long to wait for the peer's close reply after a local close.
    pub close_grace: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_message_size: 1 << 20,
            disable_nagle: true,
            close_grace: Duration::from_millis(1_000),
        }
    }
}

impl TransportOptions {
    fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_message_size))
    }
}

/// Local close instruction sent to a running connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseRequest {
    /// Close status code.
    pub code: u16,
    /// Close reason; empty for a normal stop.
    pub reason: String,
}

impl Default for CloseRequest {
    fn default() -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: String::new(),
        }
    }
}

/// Checks that `endpoint` is a `ws://` or `wss://` URL with a host.
///
/// # Errors
///
/// Returns [`FeedError::InvalidEndpoint`] if the transport would reject it.
pub fn validate_endpoint(endpoint: &str) -> Result<(), FeedError> {
    let invalid = |reason: String| FeedError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason,
    };

    let request = endpoint
        .into_client_request()
        .map_err(|e| invalid(e.to_string()))?;
    let uri = request.uri();
    match uri.scheme_str() {
        Some("ws" | "wss") => {}
        other => {
            return Err(invalid(format!(
                "unsupported scheme {}",
                other.unwrap_or("<none>")
            )));
        }
    }
    if uri.host().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }
    Ok(())
}

/// Drives one connection to completion.
///
/// Returns after the listener has seen its terminal event, or after a local
/// close was requested through `close_rx` (dropping the sender counts as a
/// normal close request).
pub async fn run_connection<L>(
    connection_id: Uuid,
    endpoint: String,
    options: TransportOptions,
    listener: Arc<L>,
    mut close_rx: oneshot::Receiver<CloseRequest>,
) where
    L: SocketListener + 'static,
{
    tracing::debug!(%connection_id, %endpoint, "connecting");

    let connect = connect_async_with_config(
        endpoint.as_str(),
        Some(options.websocket_config()),
        options.disable_nagle,
    );
    let (mut stream, response) = tokio::select! {
        biased;
        _ = &mut close_rx => {
            tracing::debug!(%connection_id, "close requested before handshake completed");
            return;
        }
        result = connect => match result {
            Ok(pair) => pair,
            Err(err) => {
                listener.on_failure(err.into()).await;
                return;
            }
        },
    };

    listener.on_open(response.status().as_u16()).await;

    let mut peer_close: Option<(u16, String)> = None;
    loop {
        tokio::select! {
            biased;
            request = &mut close_rx => {
                close_locally(connection_id, &mut stream, request.unwrap_or_default(), options.close_grace).await;
                return;
            }
            frame = stream.next() => match frame {
                Some(Ok(Frame::Text(text))) => listener.on_message(text.as_str()).await,
                Some(Ok(Frame::Close(frame))) => {
                    let (code, reason) = frame.map_or_else(
                        || (NO_STATUS_RECEIVED, String::new()),
                        |f| (u16::from(f.code), f.reason.to_string()),
                    );
                    listener.on_closing(code, &reason).await;
                    peer_close = Some((code, reason));
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    listener.on_failure(err.into()).await;
                    return;
                }
                None => {
                    let (code, reason) = peer_close
                        .take()
                        .unwrap_or_else(|| (NO_STATUS_RECEIVED, String::new()));
                    listener.on_closed(code, &reason).await;
                    return;
                }
            },
        }
    }
}

/// Sends a close frame and waits up to `grace` for the handshake to finish.
async fn close_locally(
    connection_id: Uuid,
    stream: &mut WsStream,
    request: CloseRequest,
    grace: Duration,
) {
    let frame = CloseFrame {
        code: CloseCode::from(request.code),
        reason: request.reason.into(),
    };
    if let Err(err) = stream.send(Frame::Close(Some(frame))).await {
        tracing::debug!(%connection_id, error = %err, "close frame not sent");
        return;
    }

    let drain = async { while let Some(Ok(_)) = stream.next().await {} };
    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::debug!(%connection_id, "peer did not finish close handshake in time");
    }
    tracing::debug!(%connection_id, "connection released");
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ws_urls() {
        assert!(validate_endpoint("ws://127.0.0.1:8080/feed").is_ok());
        assert!(validate_endpoint("wss://feed.example.com/rides").is_ok());
    }

    #[test]
    fn rejects_other_schemes() {
        let Err(FeedError::InvalidEndpoint { endpoint, .. }) =
            validate_endpoint("http://example.com/feed")
        else {
            panic!("expected invalid endpoint");
        };
        assert_eq!(endpoint, "http://example.com/feed");
    }

    #[test]
    fn rejects_garbage() {
        assert!(validate_endpoint("not a url").is_err());
        assert!(validate_endpoint("").is_err());
    }

    #[test]
    fn default_close_request_is_normal_closure() {
        let req = CloseRequest::default();
        assert_eq!(req.code, NORMAL_CLOSURE);
        assert!(req.reason.is_empty());
    }
}
