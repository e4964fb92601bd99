//! Close codes sent when the server ends a data channel session.
//!
//! Codes are stable so a remote peer can interpret the outcome without
//! parsing the reason text. Everything except [`CloseCode::Success`] lives in
//! the 4000–4999 range RFC 6455 reserves for private use.

/// Outcome of a data channel session, as carried in the close frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CloseCode {
    Success = 1000,
    Unexpected = 4000,
    InvalidMessage = 4001,
    UnauthorizedToken = 4002,
    FailedIntegrity = 4003,
    InvalidOperation = 4004,
}

impl CloseCode {
    /// Numeric close code.
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Canonical reason text for this code.
    ///
    /// Success has two transfer-specific messages; this returns the generic
    /// one. Use [`crate::constants::CONSIGN_COMPLETE`] or
    /// [`crate::constants::RETRIEVE_COMPLETE`] where the direction is known.
    pub fn message(self) -> &'static str {
        match self {
            CloseCode::Success => "Transfer completed",
            CloseCode::Unexpected => "Socket error",
            CloseCode::InvalidMessage => "Failed to parse message",
            CloseCode::UnauthorizedToken => "The supplied token is not accepted",
            CloseCode::FailedIntegrity => "Calculated hash does not match the expected result",
            CloseCode::InvalidOperation => "Failed to handle the defined operation",
        }
    }

    /// Maps a received numeric code back to a known variant.
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1000 => Some(CloseCode::Success),
            4000 => Some(CloseCode::Unexpected),
            4001 => Some(CloseCode::InvalidMessage),
            4002 => Some(CloseCode::UnauthorizedToken),
            4003 => Some(CloseCode::FailedIntegrity),
            4004 => Some(CloseCode::InvalidOperation),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == CloseCode::Success
    }
}
