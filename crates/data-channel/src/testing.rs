//! Shared test fixtures: in-memory WebSocket pairs and storage doubles.

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::StreamExt;
use shardkeep_protocol::AuthMessage;
use shardkeep_storage::{Contract, LoadFuture, Manager, Shard, StorageError, StorageItem};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::{Message as WsMessage, Role};

use crate::handler::{ConnectionHandler, ConnectionState};
use crate::server::ChannelSettings;
use crate::stage::{HashingStage, HashingStageFactory, Stage, StageFactory};
use crate::token::TokenRegistry;
use crate::verdict::Verdict;

pub(crate) type MemoryWs = WebSocketStream<DuplexStream>;

/// Server and client ends of a WebSocket over an in-memory pipe.
pub(crate) async fn ws_pair() -> (MemoryWs, MemoryWs) {
    ws_pair_with(&ChannelSettings::default()).await
}

/// Like [`ws_pair`], with the server end limited the way the server
/// configures accepted connections.
pub(crate) async fn ws_pair_with(settings: &ChannelSettings) -> (MemoryWs, MemoryWs) {
    let (a, b) = tokio::io::duplex(256 * 1024);
    let server = WebSocketStream::from_raw_socket(a, Role::Server, Some(settings.ws_config())).await;
    let client = WebSocketStream::from_raw_socket(b, Role::Client, None).await;
    (server, client)
}

pub(crate) fn auth_frame(token: &str, hash: &str, operation: &str) -> WsMessage {
    let msg = AuthMessage {
        token: token.into(),
        hash: hash.into(),
        operation: operation.into(),
    };
    WsMessage::Text(msg.to_json().unwrap().into())
}

pub(crate) fn binary(data: &[u8]) -> WsMessage {
    WsMessage::Binary(data.to_vec().into())
}

/// What the client side saw before the server closed.
#[derive(Debug, Default)]
pub(crate) struct Observed {
    pub frames: Vec<Vec<u8>>,
    pub close: Option<(u16, String)>,
}

/// Reads until the server's close frame, then answers it.
pub(crate) async fn observe(mut client: MemoryWs) -> Observed {
    let mut seen = Observed::default();
    while let Some(msg) = client.next().await {
        match msg {
            Ok(WsMessage::Binary(data)) => seen.frames.push(data.to_vec()),
            Ok(WsMessage::Close(frame)) => {
                seen.close = frame.map(|f| (u16::from(f.code), f.reason.to_string()));
                break;
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }
    let _ = client.close(None).await;
    seen
}

pub(crate) fn spawn_handler(
    ws: MemoryWs,
    registry: &Arc<TokenRegistry>,
    manager: Arc<dyn Manager>,
) -> JoinHandle<(Option<Verdict>, ConnectionState)> {
    spawn_handler_with(
        ws,
        registry,
        manager,
        Arc::new(HashingStageFactory),
        ChannelSettings::default(),
    )
}

pub(crate) fn spawn_handler_with(
    ws: MemoryWs,
    registry: &Arc<TokenRegistry>,
    manager: Arc<dyn Manager>,
    stages: Arc<dyn StageFactory>,
    settings: ChannelSettings,
) -> JoinHandle<(Option<Verdict>, ConnectionState)> {
    let mut handler = ConnectionHandler::new(ws, Arc::clone(registry), manager, stages, &settings);
    tokio::spawn(async move {
        let verdict = handler.run().await;
        (verdict, handler.state())
    })
}

// ---------------------------------------------------------------------------
// Storage doubles
// ---------------------------------------------------------------------------

/// A manager whose loads always fail.
pub(crate) struct FailingManager;

impl Manager for FailingManager {
    fn load<'a>(&'a self, _hash: &'a str) -> LoadFuture<'a> {
        Box::pin(async {
            Err::<StorageItem, _>(StorageError::Io(io::Error::other("disk unavailable")))
        })
    }
}

/// Serves one stored shard and records what happens to its reader.
#[derive(Clone, Default)]
pub(crate) struct TrackedManager {
    data: Arc<Vec<u8>>,
    dropped: Arc<AtomicBool>,
    read: Arc<AtomicUsize>,
}

impl TrackedManager {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            ..Self::default()
        }
    }

    pub fn reader_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }

    pub fn bytes_read(&self) -> usize {
        self.read.load(Ordering::SeqCst)
    }
}

impl Manager for TrackedManager {
    fn load<'a>(&'a self, hash: &'a str) -> LoadFuture<'a> {
        let reader = TrackedReader {
            data: Arc::clone(&self.data),
            pos: 0,
            dropped: Arc::clone(&self.dropped),
            read: Arc::clone(&self.read),
        };
        Box::pin(async move {
            Ok(StorageItem {
                hash: hash.to_string(),
                contracts: Default::default(),
                shard: Shard::Readable(Box::new(reader)),
            })
        })
    }
}

struct TrackedReader {
    data: Arc<Vec<u8>>,
    pos: usize,
    dropped: Arc<AtomicBool>,
    read: Arc<AtomicUsize>,
}

impl AsyncRead for TrackedReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let rest = &self.data[self.pos..];
        let n = rest.len().min(buf.remaining());
        buf.put_slice(&rest[..n]);
        self.pos += n;
        self.read.fetch_add(n, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

impl Drop for TrackedReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

/// How a [`FaultyManager`]'s shard misbehaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Fault {
    /// Stored shard whose reads fail.
    Read,
    /// Stored shard whose reads never complete.
    Stall,
    /// Upload target whose writes fail.
    Write,
    /// Upload target that accepts writes but fails to commit.
    Commit,
}

/// Serves one shard that fails in a chosen way. Upload targets come with a
/// 10-byte contract.
#[derive(Clone)]
pub(crate) struct FaultyManager {
    fault: Fault,
    dropped: Arc<AtomicBool>,
}

impl FaultyManager {
    pub fn new(fault: Fault) -> Self {
        Self {
            fault,
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn shard_dropped(&self) -> bool {
        self.dropped.load(Ordering::SeqCst)
    }
}

impl Manager for FaultyManager {
    fn load<'a>(&'a self, hash: &'a str) -> LoadFuture<'a> {
        let handle = FaultyShard {
            fault: self.fault,
            dropped: Arc::clone(&self.dropped),
        };
        let (contracts, shard) = match self.fault {
            Fault::Read | Fault::Stall => (Default::default(), Shard::Readable(Box::new(handle))),
            Fault::Write | Fault::Commit => {
                let contract = Contract::new("renter", hash, 10);
                (
                    [("renter-peer".to_string(), contract)].into(),
                    Shard::Writable(Box::new(handle)),
                )
            }
        };
        Box::pin(async move {
            Ok(StorageItem {
                hash: hash.to_string(),
                contracts,
                shard,
            })
        })
    }
}

struct FaultyShard {
    fault: Fault,
    dropped: Arc<AtomicBool>,
}

impl AsyncRead for FaultyShard {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.fault {
            Fault::Read => Poll::Ready(Err(io::Error::other("disk exploded"))),
            Fault::Stall => Poll::Pending,
            Fault::Write | Fault::Commit => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for FaultyShard {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.fault {
            Fault::Write => Poll::Ready(Err(io::Error::other("disk full"))),
            _ => Poll::Ready(Ok(buf.len())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.fault {
            Fault::Commit => Poll::Ready(Err(io::Error::other("commit refused"))),
            _ => Poll::Ready(Ok(())),
        }
    }
}

impl Drop for FaultyShard {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Stage doubles
// ---------------------------------------------------------------------------

/// Everything a recorded stage was asked to do.
#[derive(Debug, Clone, Default)]
pub(crate) struct StageLog {
    pub limit: Option<u64>,
    pub admitted: Vec<u8>,
    pub ended: bool,
}

/// Wraps [`HashingStage`] and logs its input.
#[derive(Clone, Default)]
pub(crate) struct RecordingStages {
    log: Arc<Mutex<StageLog>>,
}

impl RecordingStages {
    pub fn snapshot(&self) -> StageLog {
        self.log.lock().unwrap().clone()
    }
}

impl StageFactory for RecordingStages {
    fn create(&self, limit: u64) -> Box<dyn Stage> {
        self.log.lock().unwrap().limit = Some(limit);
        Box::new(RecordingStage {
            inner: HashingStage::new(limit),
            log: Arc::clone(&self.log),
        })
    }
}

struct RecordingStage {
    inner: HashingStage,
    log: Arc<Mutex<StageLog>>,
}

impl Stage for RecordingStage {
    fn write(&mut self, chunk: &[u8]) -> usize {
        let taken = self.inner.write(chunk);
        self.log.lock().unwrap().admitted.extend_from_slice(&chunk[..taken]);
        taken
    }

    fn end(&mut self) {
        self.inner.end();
        self.log.lock().unwrap().ended = true;
    }

    fn is_ended(&self) -> bool {
        self.inner.is_ended()
    }

    fn forwarded(&self) -> u64 {
        self.inner.forwarded()
    }

    fn digest(&self) -> String {
        self.inner.digest()
    }
}
