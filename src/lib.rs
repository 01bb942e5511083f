//! # ride-feed
//!
//! Single-subscriber WebSocket client for a live ride feed.
//!
//! One persistent connection receives JSON text frames. Each frame is
//! decoded into a typed [`codec::Message`] and handed, in arrival order,
//! through a bounded conduit to one relay loop that republishes it to a
//! [`sink::MessageSink`]. There is no reconnect: a transport failure is
//! reported once and the feed goes quiet.
//!
//! ## Architecture
//!
//! ```text
//! WebSocket endpoint
//!     │
//!     ├── transport (tokio-tungstenite task)
//!     ├── ConnectionHandler (handler/) ── codec
//!     │
//!     ├── Conduit (delivery/, bounded mpsc)
//!     │
//!     ├── Relay loop (relay/)
//!     └── MessageSink / LatestMessage (sink/)
//! ```
//!
//! [`controller::SocketController`] owns the connection and exposes
//! `start_socket` / `stop_socket`; [`relay::spawn_relay`] ties its lifetime
//! to a [`relay::RelayHandle`].

pub mod codec;
pub mod config;
pub mod controller;
pub mod delivery;
pub mod error;
pub mod handler;
pub mod relay;
pub mod sink;
pub mod transport;

pub use codec::{DecodeError, DecodeErrorKind, Message};
pub use config::FeedConfig;
pub use controller::{SocketControl, SocketController};
pub use delivery::{Conduit, DeliveryItem};
pub use error::FeedError;
pub use relay::{RelayExit, RelayHandle, spawn_relay};
pub use sink::{LatestMessage, MessageSink};
