//! Token generation and the authorization table.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::Rng;
use shardkeep_storage::digests_match;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Token length in bytes (produces 32 hex characters).
const TOKEN_BYTES: usize = 16;

/// Generates a CSPRNG token as a 32-character lowercase hex string.
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Handle to the connection a token has been bound to.
///
/// Closing the handle asks that connection to end its session with
/// `UNEXPECTED`.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: Uuid,
    cancel: CancellationToken,
}

impl ClientHandle {
    pub fn new(id: Uuid, cancel: CancellationToken) -> Self {
        Self { id, cancel }
    }

    /// Connection id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns `true` while the connection has not been told to close.
    pub fn is_live(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Signals the connection to close.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Authorization granted for one content hash until a deadline.
#[derive(Debug, Clone)]
pub struct TokenEntry {
    /// Connection using the token; unset until a peer authorizes with it.
    pub client: Option<ClientHandle>,
    /// Content hash the token grants access to.
    pub hash: String,
    pub expires_at: Instant,
}

impl TokenEntry {
    pub fn new(hash: impl Into<String>, expires_at: Instant) -> Self {
        Self {
            client: None,
            hash: hash.into(),
            expires_at,
        }
    }

    /// Creates an entry that expires `ttl` from now.
    pub fn with_ttl(hash: impl Into<String>, ttl: Duration) -> Self {
        Self::new(hash, Instant::now() + ttl)
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// Why a token was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unknown token")]
    Unknown,

    #[error("token was issued for a different hash")]
    HashMismatch,

    #[error("token expired")]
    Expired,

    #[error("token already in use")]
    InUse,
}

/// In-memory authorization table shared by every connection.
///
/// Lookups and the binding of a connection happen under one lock, so a token
/// can only ever be bound once. Expired entries are not evicted on their own;
/// see [`prune_expired`](Self::prune_expired).
#[derive(Debug, Default)]
pub struct TokenRegistry {
    entries: Mutex<HashMap<String, TokenEntry>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, TokenEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers `token`, replacing any entry already stored under it.
    pub fn allow(&self, token: impl Into<String>, entry: TokenEntry) {
        let token = token.into();
        debug!(hash = %entry.hash, "token allowed");
        self.entries().insert(token, entry);
    }

    /// Checks `token` against `hash` and binds it to `client`.
    ///
    /// Returns a copy of the bound entry. While the bound connection is live a
    /// second attempt fails with [`AuthError::InUse`].
    pub fn authorize(
        &self,
        token: &str,
        hash: &str,
        client: ClientHandle,
    ) -> Result<TokenEntry, AuthError> {
        let mut entries = self.entries();
        let entry = entries.get_mut(token).ok_or(AuthError::Unknown)?;

        if !digests_match(&entry.hash, hash) {
            return Err(AuthError::HashMismatch);
        }
        if entry.is_expired_at(Instant::now()) {
            return Err(AuthError::Expired);
        }
        if entry.client.as_ref().is_some_and(ClientHandle::is_live) {
            return Err(AuthError::InUse);
        }

        entry.client = Some(client);
        Ok(entry.clone())
    }

    /// Revokes `token`. A live bound connection is told to close.
    ///
    /// Unknown tokens and tokens nobody has bound yet are simply removed.
    pub fn reject(&self, token: &str) {
        let removed = self.entries().remove(token);
        if let Some(client) = removed.and_then(|entry| entry.client) {
            if client.is_live() {
                debug!(conn = %client.id(), "closing connection for revoked token");
                client.close();
            }
        }
    }

    /// Removes `token` unconditionally. Returns `true` if it was present.
    pub fn consume(&self, token: &str) -> bool {
        self.entries().remove(token).is_some()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries().contains_key(token)
    }

    /// Returns `true` if a live connection is currently bound to `token`.
    pub fn is_in_use(&self, token: &str) -> bool {
        self.entries()
            .get(token)
            .and_then(|entry| entry.client.as_ref())
            .is_some_and(ClientHandle::is_live)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Drops expired entries that no connection is using.
    ///
    /// Returns the number of entries removed.
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.client.is_some() || !entry.is_expired_at(now));
        before - entries.len()
    }
}
