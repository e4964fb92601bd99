//! Byte-accumulation stage used while consigning.
//!
//! Every admitted upload byte passes through a [`Stage`] on its way to the
//! shard writer. The stage enforces the contract's size bound and keeps a
//! running digest. It is built by a [`StageFactory`] handed to the server,
//! so tests can observe exactly what was admitted.

use shardkeep_storage::ContentHasher;

/// Pass-through accumulator for one upload.
pub trait Stage: Send {
    /// Admits as much of `chunk` as the bound allows and returns how many
    /// bytes were taken. Returns 0 once the stage has ended.
    fn write(&mut self, chunk: &[u8]) -> usize;

    /// Marks the end of input. Further writes are refused.
    fn end(&mut self);

    fn is_ended(&self) -> bool;

    /// Total bytes admitted so far.
    fn forwarded(&self) -> u64;

    /// Content hash of the admitted bytes.
    fn digest(&self) -> String;
}

/// Builds one [`Stage`] per upload.
pub trait StageFactory: Send + Sync + 'static {
    fn create(&self, limit: u64) -> Box<dyn Stage>;
}

/// Hashes admitted bytes with SHA-256 and refuses anything past `limit`.
#[derive(Clone)]
pub struct HashingStage {
    limit: u64,
    forwarded: u64,
    hasher: ContentHasher,
    ended: bool,
}

impl HashingStage {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            forwarded: 0,
            hasher: ContentHasher::new(),
            ended: false,
        }
    }
}

impl Stage for HashingStage {
    fn write(&mut self, chunk: &[u8]) -> usize {
        if self.ended {
            return 0;
        }
        let room = self.limit - self.forwarded;
        let take = chunk.len().min(usize::try_from(room).unwrap_or(usize::MAX));
        self.hasher.update(&chunk[..take]);
        self.forwarded += take as u64;
        take
    }

    fn end(&mut self) {
        self.ended = true;
    }

    fn is_ended(&self) -> bool {
        self.ended
    }

    fn forwarded(&self) -> u64 {
        self.forwarded
    }

    fn digest(&self) -> String {
        self.hasher.clone().finalize()
    }
}

/// Default factory producing [`HashingStage`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashingStageFactory;

impl StageFactory for HashingStageFactory {
    fn create(&self, limit: u64) -> Box<dyn Stage> {
        Box::new(HashingStage::new(limit))
    }
}
