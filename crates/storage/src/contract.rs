use serde::{Deserialize, Serialize};

/// Storage agreement between a renter and this node for one shard.
///
/// Only `data_size` and `data_hash` matter to the data channel; the rest is
/// carried so a stored contract round-trips intact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub renter_id: String,
    /// Exact number of shard bytes the renter may upload.
    pub data_size: u64,
    /// Expected content hash of the shard bytes.
    pub data_hash: String,
    /// Start of the storage window (unix millis).
    #[serde(default)]
    pub store_begin: i64,
    /// End of the storage window (unix millis).
    #[serde(default)]
    pub store_end: i64,
    #[serde(default)]
    pub audit_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renter_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farmer_signature: Option<String>,
    #[serde(default)]
    pub payment_storage_price: u64,
    #[serde(default)]
    pub payment_download_price: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_destination: Option<String>,
}

impl Contract {
    /// Creates a contract with the fields the data channel relies on.
    pub fn new(renter_id: impl Into<String>, data_hash: impl Into<String>, data_size: u64) -> Self {
        Self {
            renter_id: renter_id.into(),
            data_size,
            data_hash: data_hash.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_defaults() {
        let json = r#"{"renter_id":"r1","data_size":10,"data_hash":"abc"}"#;
        let contract: Contract = serde_json::from_str(json).unwrap();
        assert_eq!(contract, Contract::new("r1", "abc", 10));
    }

    #[test]
    fn omits_unset_optionals() {
        let json = serde_json::to_string(&Contract::new("r1", "abc", 10)).unwrap();
        assert!(!json.contains("signature"));
        assert!(!json.contains("payment_destination"));
    }
}
