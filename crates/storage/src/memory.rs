//! In-process storage adapter.

use std::collections::{BTreeMap, HashMap};
use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

use crate::{Contract, LoadFuture, Manager, Shard, StorageError, StorageItem};

#[derive(Default)]
struct Record {
    contracts: BTreeMap<String, Contract>,
    data: Option<Vec<u8>>,
}

type Records = Arc<Mutex<HashMap<String, Record>>>;

fn lock(records: &Records) -> MutexGuard<'_, HashMap<String, Record>> {
    records.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Keeps contracts and shard bytes in memory.
///
/// Cloning shares the same store. An upload becomes visible when its
/// writer is shut down.
#[derive(Clone, Default)]
pub struct MemoryManager {
    records: Records,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a contract for `hash` agreed with `peer`.
    pub fn add_contract(&self, hash: impl Into<String>, peer: impl Into<String>, contract: Contract) {
        lock(&self.records)
            .entry(hash.into())
            .or_default()
            .contracts
            .insert(peer.into(), contract);
    }

    /// Stores shard bytes directly, bypassing the upload path.
    pub fn put_shard(&self, hash: impl Into<String>, data: Vec<u8>) {
        lock(&self.records).entry(hash.into()).or_default().data = Some(data);
    }

    /// Returns the stored bytes for `hash`, if any.
    pub fn shard(&self, hash: &str) -> Option<Vec<u8>> {
        lock(&self.records).get(hash).and_then(|r| r.data.clone())
    }

    fn open(&self, hash: &str) -> Result<StorageItem, StorageError> {
        let records = lock(&self.records);
        let record = records
            .get(hash)
            .ok_or_else(|| StorageError::NotFound(hash.to_string()))?;

        let shard = match &record.data {
            Some(data) => Shard::Readable(Box::new(Cursor::new(data.clone()))),
            None => Shard::Writable(Box::new(MemoryShardWriter {
                hash: hash.to_string(),
                records: Arc::clone(&self.records),
                buf: Vec::new(),
                committed: false,
            })),
        };

        Ok(StorageItem {
            hash: hash.to_string(),
            contracts: record.contracts.clone(),
            shard,
        })
    }
}

impl Manager for MemoryManager {
    fn load<'a>(&'a self, hash: &'a str) -> LoadFuture<'a> {
        Box::pin(async move { self.open(hash) })
    }
}

/// Buffers an upload and commits it to the store on shutdown.
struct MemoryShardWriter {
    hash: String,
    records: Records,
    buf: Vec<u8>,
    committed: bool,
}

impl AsyncWrite for MemoryShardWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.committed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "shard writer already shut down",
            )));
        }
        self.buf.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if !self.committed {
            let data = std::mem::take(&mut self.buf);
            lock(&self.records).entry(self.hash.clone()).or_default().data = Some(data);
            self.committed = true;
        }
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn unknown_hash_is_not_found() {
        let manager = MemoryManager::new();
        let result = manager.load("missing").await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn contract_without_data_is_writable() {
        let manager = MemoryManager::new();
        manager.add_contract("h1", "peer", Contract::new("r", "h1", 3));

        let item = manager.load("h1").await.unwrap();
        assert!(item.shard.is_writable());
        assert_eq!(item.contract().unwrap().data_size, 3);
    }

    #[tokio::test]
    async fn upload_commits_on_shutdown() {
        let manager = MemoryManager::new();
        manager.add_contract("h1", "peer", Contract::new("r", "h1", 3));

        let Shard::Writable(mut writer) = manager.load("h1").await.unwrap().shard else {
            panic!("expected writable shard");
        };
        writer.write_all(b"abc").await.unwrap();
        assert_eq!(manager.shard("h1"), None);

        writer.shutdown().await.unwrap();
        assert_eq!(manager.shard("h1").unwrap(), b"abc");
    }

    #[tokio::test]
    async fn stored_shard_is_readable() {
        let manager = MemoryManager::new();
        manager.put_shard("h1", b"stored".to_vec());

        let Shard::Readable(mut reader) = manager.load("h1").await.unwrap().shard else {
            panic!("expected readable shard");
        };
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"stored");
    }

    #[tokio::test]
    async fn write_after_shutdown_fails() {
        let manager = MemoryManager::new();
        manager.add_contract("h1", "peer", Contract::new("r", "h1", 3));

        let Shard::Writable(mut writer) = manager.load("h1").await.unwrap().shard else {
            panic!("expected writable shard");
        };
        writer.shutdown().await.unwrap();
        assert!(writer.write_all(b"late").await.is_err());
    }

    #[tokio::test]
    async fn dropped_upload_stays_writable() {
        let manager = MemoryManager::new();
        manager.add_contract("h1", "peer", Contract::new("r", "h1", 3));

        let Shard::Writable(mut writer) = manager.load("h1").await.unwrap().shard else {
            panic!("expected writable shard");
        };
        writer.write_all(b"ab").await.unwrap();
        drop(writer);

        assert_eq!(manager.shard("h1"), None);
        assert!(manager.load("h1").await.unwrap().shard.is_writable());
    }
}
