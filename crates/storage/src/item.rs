use std::collections::BTreeMap;
use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::Contract;

/// Read handle for a stored shard.
pub type ShardReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write handle for a shard that has not been stored yet.
///
/// Bytes become durable once the writer is shut down.
pub type ShardWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shard byte stream handed out with a [`StorageItem`].
pub enum Shard {
    /// The shard is already stored.
    Readable(ShardReader),
    /// No bytes are stored yet; the writer accepts an upload.
    Writable(ShardWriter),
}

impl Shard {
    pub fn is_writable(&self) -> bool {
        matches!(self, Shard::Writable(_))
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shard::Readable(_) => f.write_str("Shard::Readable"),
            Shard::Writable(_) => f.write_str("Shard::Writable"),
        }
    }
}

/// Everything the node knows about one content hash.
#[derive(Debug)]
pub struct StorageItem {
    pub hash: String,
    /// Contracts keyed by renter peer id.
    pub contracts: BTreeMap<String, Contract>,
    pub shard: Shard,
}

impl StorageItem {
    /// The contract governing this shard.
    ///
    /// Prefers a contract whose `data_hash` matches the item hash, falling
    /// back to the first contract in peer-id order.
    pub fn contract(&self) -> Option<&Contract> {
        self.contracts
            .values()
            .find(|c| c.data_hash == self.hash)
            .or_else(|| self.contracts.values().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(contracts: &[(&str, Contract)]) -> StorageItem {
        StorageItem {
            hash: "aa".into(),
            contracts: contracts
                .iter()
                .map(|(peer, c)| (peer.to_string(), c.clone()))
                .collect(),
            shard: Shard::Readable(Box::new(std::io::Cursor::new(Vec::new()))),
        }
    }

    #[test]
    fn prefers_contract_for_item_hash() {
        let item = item(&[
            ("peer-a", Contract::new("r1", "bb", 1)),
            ("peer-b", Contract::new("r2", "aa", 2)),
        ]);
        assert_eq!(item.contract().unwrap().renter_id, "r2");
    }

    #[test]
    fn falls_back_to_first_contract() {
        let item = item(&[
            ("peer-b", Contract::new("r2", "cc", 2)),
            ("peer-a", Contract::new("r1", "bb", 1)),
        ]);
        assert_eq!(item.contract().unwrap().renter_id, "r1");
    }

    #[test]
    fn no_contracts() {
        assert!(item(&[]).contract().is_none());
    }

    #[test]
    fn shard_debug_hides_handle() {
        let shard = Shard::Writable(Box::new(Vec::<u8>::new()));
        assert!(shard.is_writable());
        assert_eq!(format!("{shard:?}"), "Shard::Writable");
    }
}
