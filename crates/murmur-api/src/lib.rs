/// Murmur API client
///
/// REST side of the chat server: the public-key directory and message
/// history, behind the `ChatApi` trait.

pub mod client;
pub mod error;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::{ApiClient, ChatApi};
pub use error::ApiError;
