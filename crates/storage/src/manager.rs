//! The storage interface the data channel consumes.

use std::future::Future;
use std::pin::Pin;

use crate::{StorageError, StorageItem};

/// A boxed future returned by [`Manager::load`].
pub type LoadFuture<'a> = Pin<Box<dyn Future<Output = Result<StorageItem, StorageError>> + Send + 'a>>;

/// Loads storage items on demand.
///
/// Each call produces exactly one outcome. Items are not cached by the
/// caller, and the shard handle in the item belongs to whoever loaded it.
/// Keeping two transfers of the same hash apart is the manager's business.
///
/// A writer that is shut down commits its bytes, and the upload's digest is
/// only checked afterwards. An upload that fails verification therefore
/// stays stored: later loads hand out a readable shard, and a repeated
/// consign of that hash succeeds without re-uploading. Clearing such a shard
/// is up to the adapter's owner. A writer dropped without shutdown must
/// leave the shard writable.
pub trait Manager: Send + Sync + 'static {
    fn load<'a>(&'a self, hash: &'a str) -> LoadFuture<'a>;
}
