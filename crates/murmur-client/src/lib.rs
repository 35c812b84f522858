/// Murmur client
///
/// Wires keys, the REST directory, the WebSocket connection and the message
/// router into one `ChatSession`.

pub mod config;
pub mod error;
pub mod session;

pub use config::Config;
pub use error::SessionError;
pub use session::ChatSession;
