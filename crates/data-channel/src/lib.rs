//! Token-gated data channel for shard transfers.
//!
//! A remote peer opens a WebSocket, sends one JSON authorization message
//! (`token`, `hash`, `operation`) and then either uploads shard bytes
//! (consign) or downloads them (retrieve). Tokens are single use: whatever
//! the outcome, the token is gone from the [`TokenRegistry`] once the
//! session ends, and the socket is closed with a
//! [`CloseCode`](shardkeep_protocol::CloseCode) describing that outcome.
//!
//! [`ChannelServer`] owns the listener and the registry and runs one
//! [`ConnectionHandler`] per accepted socket. [`DataChannelClient`] is the
//! peer side of the same protocol.

pub mod client;
mod consign;
pub mod error;
pub mod handler;
mod retrieve;
pub mod server;
pub mod socket;
pub mod stage;
pub mod token;
pub mod verdict;

#[cfg(test)]
mod testing;

pub use client::DataChannelClient;
pub use error::DataChannelError;
pub use handler::{ConnectionHandler, ConnectionState};
pub use server::{ChannelServer, ChannelSettings, ServerEvent};
pub use socket::{ReadyState, Socket, SocketEvent, WsTransport};
pub use stage::{HashingStage, HashingStageFactory, Stage, StageFactory};
pub use token::{AuthError, ClientHandle, TokenEntry, TokenRegistry, generate_token};
pub use verdict::Verdict;
