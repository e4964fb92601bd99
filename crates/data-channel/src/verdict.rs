use std::fmt;

use shardkeep_protocol::CloseCode;
use shardkeep_protocol::constants::{CONSIGN_COMPLETE, RETRIEVE_COMPLETE};

/// How a session ended: the close code and reason sent to the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub code: CloseCode,
    pub reason: String,
}

impl Verdict {
    pub fn new(code: CloseCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// A verdict carrying the code's canonical message.
    pub fn of(code: CloseCode) -> Self {
        Self::new(code, code.message())
    }

    pub fn consigned() -> Self {
        Self::new(CloseCode::Success, CONSIGN_COMPLETE)
    }

    pub fn retrieved() -> Self {
        Self::new(CloseCode::Success, RETRIEVE_COMPLETE)
    }

    pub fn socket_error() -> Self {
        Self::of(CloseCode::Unexpected)
    }

    /// The token was revoked while the session was running.
    pub fn revoked() -> Self {
        Self::new(CloseCode::Unexpected, "Token revoked")
    }

    /// The transfer made no progress within the idle deadline.
    pub fn timed_out() -> Self {
        Self::new(CloseCode::Unexpected, "Transfer timed out")
    }

    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code.code(), self.reason)
    }
}
