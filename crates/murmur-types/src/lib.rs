//! Wire types shared by the Murmur client crates.
//!
//! `events` holds the JSON frames exchanged over the chat WebSocket,
//! `api` holds the request/response bodies of the REST collaborator.

pub mod api;
pub mod events;
