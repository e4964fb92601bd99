//! Download path: shard reader → binary frames.

use shardkeep_protocol::CloseCode;
use shardkeep_storage::Shard;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::handler::Session;
use crate::socket::{SocketEvent, WsTransport};
use crate::verdict::Verdict;

/// Streams a stored shard to the peer in frames of at most `chunk_size`.
///
/// Each frame waits for the socket to accept it before the next read, so a
/// slow peer slows the reader down instead of filling memory. A frame not
/// accepted within the idle deadline ends the download. Returns `None`
/// when the peer is gone and there is nobody left to send a verdict to.
pub(crate) async fn run<S: WsTransport>(
    mut session: Session<'_, S>,
    chunk_size: usize,
) -> Option<Verdict> {
    let item = match session.load().await {
        Ok(item) => item,
        Err(verdict) => return Some(verdict),
    };

    let mut reader = match item.shard {
        Shard::Readable(reader) => reader,
        Shard::Writable(_) => {
            warn!(conn = %session.conn, hash = %session.hash, "retrieve of a shard that is not stored");
            return Some(Verdict::new(CloseCode::Unexpected, "Shard data not found"));
        }
    };

    session.socket.drain_ready();
    if !session.socket.is_open() {
        debug!(conn = %session.conn, "peer gone before retrieve started");
        return None;
    }

    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut sent: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = session.cancel.cancelled() => {
                info!(conn = %session.conn, sent, "token revoked during download");
                return Some(Verdict::revoked());
            }
            event = session.socket.next_event() => match event {
                SocketEvent::Data(_) => {
                    debug!(conn = %session.conn, "ignoring data frame during retrieve");
                }
                SocketEvent::Closed => {
                    debug!(conn = %session.conn, sent, "peer closed during download");
                    return None;
                }
                SocketEvent::Error(e) => {
                    warn!(conn = %session.conn, "socket error during download: {e}");
                    return Some(Verdict::socket_error());
                }
            },
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    info!(conn = %session.conn, hash = %session.hash, bytes = sent, "shard retrieved");
                    return Some(Verdict::retrieved());
                }
                Ok(n) => {
                    let send = session.socket.send_binary(buf[..n].to_vec());
                    match tokio::time::timeout(session.idle, send).await {
                        Ok(Ok(())) => sent += n as u64,
                        Ok(Err(e)) => {
                            warn!(conn = %session.conn, "send failed during download: {e}");
                            return Some(Verdict::socket_error());
                        }
                        Err(_) => {
                            warn!(conn = %session.conn, sent, "peer stopped reading the download");
                            return Some(Verdict::timed_out());
                        }
                    }
                }
                Err(e) => {
                    warn!(conn = %session.conn, hash = %session.hash, "shard read failed: {e}");
                    return Some(Verdict::new(CloseCode::Unexpected, e.to_string()));
                }
            },
        }
    }
}
