/// Murmur Gateway
///
/// Client side of the chat WebSocket:
/// - `ConnectionManager` authenticates, dispatches frames to observers and
///   reconnects with linear backoff
/// - `MessageRouter` decrypts inbound messages and runs the typing indicator
///   for the open conversation

pub mod connection;
pub mod error;
pub mod observers;
pub mod router;
pub mod state;
pub mod transport;
pub mod typing;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use connection::{ConnectionConfig, ConnectionManager, DEFAULT_CONNECT_TIMEOUT};
pub use error::GatewayError;
pub use observers::{ObserverId, Subscription};
pub use router::{DecryptedMessage, MessageRouter, RouterConfig, RouterEvent, ensure_peer_key};
pub use state::{ConnectionState, ReconnectPolicy};
pub use transport::{Connector, Transport, WsConnector};
