//! Directory-backed storage adapter.
//!
//! Layout under the root:
//!
//! ```text
//! contracts/<hash>.json   peer id -> contract map
//! shards/<hash>           committed shard bytes
//! shards/<hash>.partial   upload in progress
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use tokio::io::AsyncWrite;

use crate::{Contract, LoadFuture, Manager, Shard, StorageError, StorageItem, validate_hash};

/// Stores contracts as JSON and shards as plain files.
#[derive(Debug, Clone)]
pub struct FsManager {
    root: PathBuf,
}

impl FsManager {
    /// Opens (and creates if needed) a store rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let manager = Self { root: root.into() };
        tokio::fs::create_dir_all(manager.root.join("contracts")).await?;
        tokio::fs::create_dir_all(manager.root.join("shards")).await?;
        tracing::debug!(root = %manager.root.display(), "shard store opened");
        Ok(manager)
    }

    /// Returns the store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Records a contract for `hash` agreed with `peer`.
    pub async fn save_contract(
        &self,
        hash: &str,
        peer: &str,
        contract: Contract,
    ) -> Result<(), StorageError> {
        validate_hash(hash)?;
        let mut contracts = self.read_contracts(hash).await?;
        contracts.insert(peer.to_string(), contract);
        let json = serde_json::to_vec_pretty(&contracts)?;
        tokio::fs::write(self.contract_path(hash), json).await?;
        Ok(())
    }

    fn contract_path(&self, hash: &str) -> PathBuf {
        self.root.join("contracts").join(format!("{hash}.json"))
    }

    fn shard_path(&self, hash: &str) -> PathBuf {
        self.root.join("shards").join(hash)
    }

    async fn read_contracts(&self, hash: &str) -> Result<BTreeMap<String, Contract>, StorageError> {
        match tokio::fs::read(self.contract_path(hash)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn load_item(&self, hash: &str) -> Result<StorageItem, StorageError> {
        validate_hash(hash)?;
        let contracts = self.read_contracts(hash).await?;
        let target = self.shard_path(hash);

        let shard = if tokio::fs::try_exists(&target).await? {
            Shard::Readable(Box::new(tokio::fs::File::open(&target).await?))
        } else if contracts.is_empty() {
            return Err(StorageError::NotFound(hash.to_string()));
        } else {
            let partial = target.with_extension("partial");
            let file = tokio::fs::File::create(&partial).await?;
            Shard::Writable(Box::new(PartialShard::new(file, partial, target)))
        };

        Ok(StorageItem {
            hash: hash.to_string(),
            contracts,
            shard,
        })
    }
}

impl Manager for FsManager {
    fn load<'a>(&'a self, hash: &'a str) -> LoadFuture<'a> {
        Box::pin(self.load_item(hash))
    }
}

type CommitFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send>>;

/// Writes an upload to `<hash>.partial` and renames it into place on shutdown.
///
/// An upload dropped before shutdown completes removes its partial file.
struct PartialShard {
    file: tokio::fs::File,
    partial: PathBuf,
    target: PathBuf,
    commit: Option<CommitFuture>,
    committed: bool,
}

impl PartialShard {
    fn new(file: tokio::fs::File, partial: PathBuf, target: PathBuf) -> Self {
        Self {
            file,
            partial,
            target,
            commit: None,
            committed: false,
        }
    }
}

impl AsyncWrite for PartialShard {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.file).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.file).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if self.committed {
            return Poll::Ready(Ok(()));
        }
        ready!(Pin::new(&mut self.file).poll_shutdown(cx))?;

        let this = &mut *self;
        let commit = this.commit.get_or_insert_with(|| {
            Box::pin(tokio::fs::rename(this.partial.clone(), this.target.clone()))
        });
        let result = ready!(commit.as_mut().poll(cx));
        this.commit = None;
        result?;
        this.committed = true;
        tracing::debug!(path = %this.target.display(), "shard committed");
        Poll::Ready(Ok(()))
    }
}

impl Drop for PartialShard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let partial = std::mem::take(&mut self.partial);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = tokio::fs::remove_file(&partial).await {
                        tracing::debug!(path = %partial.display(), "partial shard not removed: {e}");
                    }
                });
            }
            Err(_) => {
                let _ = std::fs::remove_file(&partial);
            }
        }
    }
}
