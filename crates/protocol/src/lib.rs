//! Wire protocol for the shardkeep data channel.
//!
//! A peer opens a WebSocket, sends one JSON [`AuthMessage`], and then either
//! streams shard bytes (consign) or receives them (retrieve). The server ends
//! every session with a close frame carrying a [`CloseCode`].

pub mod auth;
pub mod close;
pub mod constants;

// Re-export primary types for convenience.
pub use auth::{AuthMessage, Operation, UnknownOperation};
pub use close::CloseCode;
