use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Transfer direction requested by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Peer uploads shard bytes to this node.
    Consign,
    /// Peer downloads shard bytes from this node.
    Retrieve,
}

impl Operation {
    /// Wire name of the operation.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Consign => "CONSIGN",
            Operation::Retrieve => "RETRIEVE",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an operation name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONSIGN" => Ok(Operation::Consign),
            "RETRIEVE" => Ok(Operation::Retrieve),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

/// First message of every data channel session.
///
/// `operation` stays a raw string: a message with an unsupported operation
/// still parses, so the server can tell a malformed message apart from an
/// authorized request for something it does not do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMessage {
    pub token: String,
    pub hash: String,
    pub operation: String,
}

impl AuthMessage {
    /// Creates an authorization message for the given operation.
    pub fn new(token: impl Into<String>, hash: impl Into<String>, operation: Operation) -> Self {
        Self {
            token: token.into(),
            hash: hash.into(),
            operation: operation.as_str().to_string(),
        }
    }

    /// Parses a raw frame payload (text or binary) as JSON.
    pub fn parse(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Serializes the message to its JSON wire form.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// The requested operation, if it is one the protocol defines.
    pub fn operation(&self) -> Result<Operation, UnknownOperation> {
        self.operation.parse()
    }
}
