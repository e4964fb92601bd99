//! Upload path: socket frames → stage → shard writer.

use shardkeep_protocol::CloseCode;
use shardkeep_storage::{Shard, digests_match};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::handler::Session;
use crate::socket::{SocketEvent, WsTransport};
use crate::stage::StageFactory;
use crate::verdict::Verdict;

/// Receives a shard and verifies it against the contract's hash.
///
/// Accepts at most `data_size` bytes; anything the peer sends past that is
/// dropped. A peer that goes quiet for the session's idle deadline before
/// the contract size is reached ends the upload with a timeout. The shard
/// writer is shut down before verification, so the bytes are persisted
/// whatever the verdict.
pub(crate) async fn run<S: WsTransport>(
    mut session: Session<'_, S>,
    stages: &dyn StageFactory,
) -> Option<Verdict> {
    let item = match session.load().await {
        Ok(item) => item,
        Err(verdict) => return Some(verdict),
    };

    let contract = item.contract().cloned();
    let mut writer = match item.shard {
        Shard::Writable(writer) => writer,
        Shard::Readable(_) => {
            info!(conn = %session.conn, hash = %session.hash, "shard already stored");
            return Some(Verdict::consigned());
        }
    };
    let Some(contract) = contract else {
        warn!(conn = %session.conn, hash = %session.hash, "no contract for shard");
        return Some(Verdict::new(CloseCode::Unexpected, "No contract found for shard"));
    };

    let limit = contract.data_size;
    let mut stage = stages.create(limit);

    // Read deadline, pushed back by every frame.
    let deadline = tokio::time::sleep(session.idle);
    tokio::pin!(deadline);

    while !stage.is_ended() && stage.forwarded() < limit {
        let event = tokio::select! {
            biased;
            _ = session.cancel.cancelled() => {
                info!(conn = %session.conn, "token revoked during upload");
                return Some(Verdict::revoked());
            }
            event = session.socket.next_event() => event,
            _ = &mut deadline => {
                warn!(
                    conn = %session.conn,
                    received = stage.forwarded(),
                    expected = limit,
                    "upload stalled"
                );
                return Some(Verdict::timed_out());
            }
        };

        match event {
            SocketEvent::Data(chunk) => {
                deadline.as_mut().reset(tokio::time::Instant::now() + session.idle);
                let taken = stage.write(&chunk);
                if taken < chunk.len() {
                    debug!(
                        conn = %session.conn,
                        dropped = chunk.len() - taken,
                        "bytes past contract size dropped"
                    );
                }
                if let Err(e) = writer.write_all(&chunk[..taken]).await {
                    warn!(conn = %session.conn, hash = %session.hash, "shard write failed: {e}");
                    return Some(Verdict::new(CloseCode::Unexpected, e.to_string()));
                }
            }
            SocketEvent::Closed => {
                debug!(
                    conn = %session.conn,
                    received = stage.forwarded(),
                    expected = limit,
                    "peer closed before upload completed"
                );
                break;
            }
            SocketEvent::Error(e) => {
                warn!(conn = %session.conn, "socket error during upload: {e}");
                return Some(Verdict::socket_error());
            }
        }
    }
    stage.end();

    if let Err(e) = writer.shutdown().await {
        warn!(conn = %session.conn, hash = %session.hash, "shard commit failed: {e}");
        return Some(Verdict::new(CloseCode::Unexpected, e.to_string()));
    }

    let digest = stage.digest();
    if digests_match(&digest, &contract.data_hash) {
        info!(
            conn = %session.conn,
            hash = %session.hash,
            bytes = stage.forwarded(),
            "shard consigned"
        );
        Some(Verdict::consigned())
    } else {
        warn!(
            conn = %session.conn,
            expected = %contract.data_hash,
            actual = %digest,
            "shard failed integrity check"
        );
        Some(Verdict::of(CloseCode::FailedIntegrity))
    }
}
