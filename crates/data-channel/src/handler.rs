//! Per-connection state machine.
//!
//! `Connected → Authenticating → {Consigning | Retrieving} → Closed`. The
//! first data frame must be an [`AuthMessage`]; everything after it belongs
//! to the operation it authorizes.

use std::sync::Arc;
use std::time::Duration;

use shardkeep_protocol::{AuthMessage, CloseCode, Operation};
use shardkeep_storage::{Manager, StorageItem};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::ChannelSettings;
use crate::socket::{Socket, SocketEvent, WsTransport};
use crate::stage::StageFactory;
use crate::token::{ClientHandle, TokenRegistry};
use crate::verdict::Verdict;
use crate::{consign, retrieve};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authenticating,
    Consigning,
    Retrieving,
    Closed,
}

/// Drives one data channel session from the first frame to the close.
pub struct ConnectionHandler<S: WsTransport> {
    id: Uuid,
    socket: Socket<S>,
    registry: Arc<TokenRegistry>,
    manager: Arc<dyn Manager>,
    stages: Arc<dyn StageFactory>,
    auth_timeout: Duration,
    idle_timeout: Duration,
    chunk_size: usize,
    state: ConnectionState,
}

impl<S: WsTransport> ConnectionHandler<S> {
    pub fn new(
        ws: S,
        registry: Arc<TokenRegistry>,
        manager: Arc<dyn Manager>,
        stages: Arc<dyn StageFactory>,
        settings: &ChannelSettings,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            socket: Socket::new(ws),
            registry,
            manager,
            stages,
            auth_timeout: settings.auth_timeout,
            idle_timeout: settings.idle_timeout,
            chunk_size: settings.chunk_size,
            state: ConnectionState::Connected,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs the session to completion and closes the socket.
    ///
    /// Returns the verdict sent to the peer, or `None` if the peer went away
    /// before there was anything to tell it. Once the session has been
    /// authorized its token is removed from the registry before the close
    /// frame goes out.
    pub async fn run(&mut self) -> Option<Verdict> {
        let verdict = self.serve().await;
        self.state = ConnectionState::Closed;
        match &verdict {
            Some(v) => self.socket.close(v.code, &v.reason).await,
            None => self.socket.shutdown().await,
        }
        verdict
    }

    async fn serve(&mut self) -> Option<Verdict> {
        let first = match tokio::time::timeout(self.auth_timeout, self.socket.next_event()).await {
            Ok(SocketEvent::Data(data)) => data,
            Ok(SocketEvent::Closed) => {
                debug!(conn = %self.id, "peer left before authorizing");
                return None;
            }
            Ok(SocketEvent::Error(e)) => {
                warn!(conn = %self.id, "socket error before authorization: {e}");
                return Some(Verdict::socket_error());
            }
            Err(_) => {
                warn!(conn = %self.id, "no authorization message received");
                return Some(Verdict::new(CloseCode::Unexpected, "Authorization timed out"));
            }
        };

        self.state = ConnectionState::Authenticating;
        let msg = match AuthMessage::parse(&first) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(conn = %self.id, "unparseable authorization message: {e}");
                return Some(Verdict::of(CloseCode::InvalidMessage));
            }
        };

        let cancel = CancellationToken::new();
        let client = ClientHandle::new(self.id, cancel.clone());
        if let Err(e) = self.registry.authorize(&msg.token, &msg.hash, client) {
            warn!(conn = %self.id, hash = %msg.hash, "token not accepted: {e}");
            return Some(Verdict::of(CloseCode::UnauthorizedToken));
        }

        let verdict = self.dispatch(&msg, &cancel).await;
        self.registry.consume(&msg.token);
        verdict
    }

    async fn dispatch(&mut self, msg: &AuthMessage, cancel: &CancellationToken) -> Option<Verdict> {
        let operation = match msg.operation() {
            Ok(op) => op,
            Err(e) => {
                warn!(conn = %self.id, "{e}");
                return Some(Verdict::of(CloseCode::InvalidOperation));
            }
        };
        info!(conn = %self.id, hash = %msg.hash, %operation, "session authorized");

        self.state = match operation {
            Operation::Consign => ConnectionState::Consigning,
            Operation::Retrieve => ConnectionState::Retrieving,
        };
        let session = Session {
            socket: &mut self.socket,
            manager: self.manager.as_ref(),
            hash: &msg.hash,
            cancel,
            idle: self.idle_timeout,
            conn: self.id,
        };

        match operation {
            Operation::Consign => consign::run(session, self.stages.as_ref()).await,
            Operation::Retrieve => retrieve::run(session, self.chunk_size).await,
        }
    }
}

/// What an operation gets to work with once a session is authorized.
pub(crate) struct Session<'a, S: WsTransport> {
    pub socket: &'a mut Socket<S>,
    pub manager: &'a dyn Manager,
    pub hash: &'a str,
    /// Cancelled when the token is revoked.
    pub cancel: &'a CancellationToken,
    /// Longest the transfer may go without progress.
    pub idle: Duration,
    pub conn: Uuid,
}

impl<S: WsTransport> Session<'_, S> {
    /// Loads the storage item for the session's hash.
    pub async fn load(&self) -> Result<StorageItem, Verdict> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Verdict::revoked()),
            result = self.manager.load(self.hash) => result.map_err(|e| {
                warn!(conn = %self.conn, hash = %self.hash, "storage load failed: {e}");
                Verdict::new(CloseCode::Unexpected, e.to_string())
            }),
        }
    }
}
