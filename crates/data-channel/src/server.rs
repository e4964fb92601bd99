//! WebSocket data channel server (farmer side).
//!
//! Owns the listener and the token registry. Every accepted socket is
//! upgraded and handed to its own [`ConnectionHandler`] task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use shardkeep_protocol::constants::{
    AUTH_TIMEOUT, TRANSFER_IDLE_TIMEOUT, WS_CHUNK_SIZE, WS_MAX_MESSAGE_SIZE,
};
use shardkeep_storage::Manager;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DataChannelError;
use crate::handler::ConnectionHandler;
use crate::stage::{HashingStageFactory, StageFactory};
use crate::token::{TokenEntry, TokenRegistry};

/// Capacity of the server event channel.
const EVENT_BUFFER: usize = 16;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    /// Address to listen on (port 0 = OS-assigned).
    pub bind_addr: SocketAddr,
    /// Largest WebSocket message or frame accepted from a peer.
    pub max_message_size: usize,
    /// Frame size for retrieves.
    pub chunk_size: usize,
    /// Time a peer has to send its authorization message.
    pub auth_timeout: Duration,
    /// Read deadline once a transfer is running.
    pub idle_timeout: Duration,
    /// How often expired, unused tokens are pruned. `None` keeps them until
    /// they are consumed or rejected.
    pub token_sweep_interval: Option<Duration>,
}

impl ChannelSettings {
    /// WebSocket limits applied to every accepted connection.
    pub fn ws_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.max_message_size);
        config.max_frame_size = Some(self.max_message_size);
        config
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            bind_addr: ([0, 0, 0, 0], 0).into(),
            max_message_size: WS_MAX_MESSAGE_SIZE,
            chunk_size: WS_CHUNK_SIZE,
            auth_timeout: AUTH_TIMEOUT,
            idle_timeout: TRANSFER_IDLE_TIMEOUT,
            token_sweep_interval: None,
        }
    }
}

/// Listener lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Listening(SocketAddr),
    /// Accepting a TCP connection failed; the server keeps running.
    AcceptFailed(String),
    /// The listener has been shut down.
    Closed,
}

/// The data channel server.
pub struct ChannelServer {
    settings: ChannelSettings,
    registry: Arc<TokenRegistry>,
    manager: Arc<dyn Manager>,
    stages: Arc<dyn StageFactory>,
    listener: Mutex<Option<TcpListener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    running: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    events: broadcast::Sender<ServerEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChannelServer {
    /// Creates a server that loads shards through `manager`.
    pub fn new(settings: ChannelSettings, manager: Arc<dyn Manager>) -> Arc<Self> {
        Self::with_stage_factory(settings, manager, Arc::new(HashingStageFactory))
    }

    /// Like [`new`](Self::new), with a custom upload stage.
    pub fn with_stage_factory(
        settings: ChannelSettings,
        manager: Arc<dyn Manager>,
        stages: Arc<dyn StageFactory>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Arc::new(Self {
            settings,
            registry: Arc::new(TokenRegistry::new()),
            manager,
            stages,
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            running: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            events,
        })
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    /// Authorizes `token` for one transfer of the shard behind `entry.hash`.
    pub fn allow(&self, token: impl Into<String>, entry: TokenEntry) {
        self.registry.allow(token, entry);
    }

    /// Revokes `token`, closing the connection using it if there is one.
    pub fn reject(&self, token: &str) {
        self.registry.reject(token);
    }

    /// Subscribes to listener events.
    pub fn events(&self) -> broadcast::Receiver<ServerEvent> {
        self.events.subscribe()
    }

    /// Returns the address the server is bound to, once bound.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Binds the listener without accepting yet.
    ///
    /// Useful to learn the OS-assigned port before [`run`](Self::run).
    /// Binding again returns the existing address.
    pub async fn bind(&self) -> Result<SocketAddr, DataChannelError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }
        let listener = TcpListener::bind(self.settings.bind_addr).await?;
        let addr = listener.local_addr()?;
        *lock(&self.listener) = Some(listener);
        *lock(&self.local_addr) = Some(addr);
        info!(%addr, "data channel listening");
        let _ = self.events.send(ServerEvent::Listening(addr));
        Ok(addr)
    }

    /// Stops accepting connections. Sessions already running finish on
    /// their own. Calling it again does nothing.
    ///
    /// [`ServerEvent::Closed`] is published exactly once, whether or not the
    /// server was ever bound or run.
    pub fn close(&self) {
        self.cancel.cancel();
        // A listener that was bound but never run is dropped here. A running
        // accept loop publishes `Closed` itself once it drops its listener.
        let unrun = lock(&self.listener).take().is_some();
        if unrun || !self.running.load(Ordering::SeqCst) {
            self.finish();
        }
    }

    fn finish(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("data channel closed");
            let _ = self.events.send(ServerEvent::Closed);
        }
    }

    /// Accepts connections until [`close`](Self::close).
    pub async fn run(self: &Arc<Self>) -> Result<(), DataChannelError> {
        if self.cancel.is_cancelled() {
            self.finish();
            return Ok(());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(DataChannelError::AlreadyRunning);
        }

        self.bind().await?;
        let Some(listener) = lock(&self.listener).take() else {
            // Closed between bind and here.
            return Ok(());
        };

        if let Some(period) = self.settings.token_sweep_interval.filter(|p| !p.is_zero()) {
            self.spawn_sweep(period);
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.finish();
                    break Ok(());
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            let server = Arc::clone(self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, peer_addr).await {
                                    warn!(%peer_addr, "connection error: {e}");
                                }
                            });
                        }
                        Err(e) => {
                            warn!("accept error: {e}");
                            let _ = self.events.send(ServerEvent::AcceptFailed(e.to_string()));
                        }
                    }
                }
            }
        }
    }

    fn spawn_sweep(&self, period: Duration) {
        let registry = Arc::clone(&self.registry);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let pruned = registry.prune_expired();
                        if pruned > 0 {
                            debug!(pruned, "expired tokens pruned");
                        }
                    }
                }
            }
        });
    }

    /// Upgrades one TCP connection and runs its session.
    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<(), DataChannelError> {
        let ws_stream = accept_async_with_config(stream, Some(self.settings.ws_config())).await?;

        let mut handler = ConnectionHandler::new(
            ws_stream,
            Arc::clone(&self.registry),
            Arc::clone(&self.manager),
            Arc::clone(&self.stages),
            &self.settings,
        );
        let conn = handler.id();
        debug!(%peer_addr, %conn, "WebSocket connection established");

        match handler.run().await {
            Some(verdict) if verdict.is_success() => {
                info!(%peer_addr, %conn, %verdict, "session complete");
            }
            Some(verdict) => {
                warn!(%peer_addr, %conn, %verdict, "session failed");
            }
            None => {
                debug!(%peer_addr, %conn, "session ended by peer");
            }
        }
        Ok(())
    }
}
