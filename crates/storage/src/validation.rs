use crate::StorageError;

/// Longest hash accepted (covers SHA-512 hex digests).
const MAX_HASH_LEN: usize = 128;

/// Validates that a content hash is safe to use as a file name.
///
/// Rejects:
/// - Empty hashes
/// - Hashes longer than 128 characters
/// - Anything other than lowercase hex digits, which also rules out path
///   separators, `..` and drive prefixes
pub fn validate_hash(hash: &str) -> Result<(), StorageError> {
    if hash.is_empty() {
        return Err(StorageError::InvalidHash("empty hash".into()));
    }

    if hash.len() > MAX_HASH_LEN {
        return Err(StorageError::InvalidHash(format!(
            "hash too long: {} characters (max {MAX_HASH_LEN})",
            hash.len()
        )));
    }

    if !hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err(StorageError::InvalidHash(format!(
            "not a lowercase hex digest: {hash}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_hash;

    #[test]
    fn rejects_empty_hash() {
        assert!(validate_hash("").is_err());
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        assert!(validate_hash("../../etc/passwd").is_err());
    }

    #[test]
    fn rejects_path_separators() {
        assert!(validate_hash("ab/cd").is_err());
        assert!(validate_hash("ab\\cd").is_err());
    }

    #[test]
    fn rejects_uppercase() {
        assert!(validate_hash("ABCDEF").is_err());
    }

    #[test]
    fn rejects_overlong() {
        assert!(validate_hash(&"a".repeat(MAX_HASH_LEN + 1)).is_err());
    }

    #[test]
    fn accepts_sha256_digest() {
        assert!(validate_hash(&content_hash(b"data")).is_ok());
    }
}
