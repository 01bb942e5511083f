//! Feed error types.
//!
//! [`FeedError`] is the central error type for the crate. Decode and
//! transport failures travel through the conduit as data
//! ([`crate::delivery::DeliveryItem::Error`]); construction failures are
//! returned directly from [`crate::controller::SocketController`].

use tokio_tungstenite::tungstenite;

use crate::codec::{DecodeError, DecodeErrorKind};

/// Error enum covering every failure the feed can report.
///
/// # Categories
///
/// | Variant           | Recoverable | Reported as                  |
/// |-------------------|-------------|------------------------------|
/// | `Decode`          | yes         | conduit item, socket stays up |
/// | `Transport`       | no          | one conduit item, then close |
/// | `InvalidEndpoint` | n/a         | `Err` from construction      |
/// | `Config`          | n/a         | `Err` from configuration     |
/// | `NoRuntime`       | n/a         | `Err` from `start_socket`    |
/// | `Consumption`     | n/a         | logged by the relay          |
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// A frame could not be decoded into a [`crate::codec::Message`].
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The underlying WebSocket transport failed.
    #[error("transport failure: {0}")]
    Transport(Box<tungstenite::Error>),

    /// The configured endpoint is not a usable WebSocket URL.
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The rejected endpoint string.
        endpoint: String,
        /// Why the transport rejected it.
        reason: String,
    },

    /// A configuration value could not be used.
    #[error("configuration error: {0}")]
    Config(String),

    /// `start_socket` was called outside a tokio runtime.
    #[error("no tokio runtime available to drive the connection")]
    NoRuntime,

    /// The consumption loop faulted while draining the conduit.
    #[error("consumption failure: {0}")]
    Consumption(String),
}

impl FeedError {
    /// Returns `true` if the connection can keep running after this error.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }

    /// Returns the decode error kind, if this is a decode error.
    #[must_use]
    pub const fn decode_kind(&self) -> Option<DecodeErrorKind> {
        match self {
            Self::Decode(err) => Some(err.kind()),
            _ => None,
        }
    }
}

impl From<tungstenite::Error> for FeedError {
    fn from(err: tungstenite::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::codec::decode;

    #[test]
    fn decode_errors_are_recoverable() {
        let Err(err) = decode(r#"{"type":"teleport"}"#) else {
            panic!("expected decode failure");
        };
        let err = FeedError::from(err);
        assert!(err.is_recoverable());
        assert_eq!(err.decode_kind(), Some(DecodeErrorKind::UnrecognizedType));
    }

    #[test]
    fn transport_errors_are_terminal() {
        let err = FeedError::from(tungstenite::Error::ConnectionClosed);
        assert!(!err.is_recoverable());
        assert_eq!(err.decode_kind(), None);
        assert!(err.to_string().starts_with("transport failure"));
    }

    #[test]
    fn invalid_endpoint_message_names_endpoint() {
        let err = FeedError::InvalidEndpoint {
            endpoint: "ftp://nope".to_string(),
            reason: "unsupported scheme".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ftp://nope"));
        assert!(msg.contains("unsupported scheme"));
    }
}
