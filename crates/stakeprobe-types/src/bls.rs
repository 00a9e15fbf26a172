use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// BLS key generated by the wallet CLI (`keys generate-bls-key`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlsKey {
    /// Hex-encoded public key
    #[serde(rename = "public-key")]
    pub public_key: String,
    /// Absolute path of the passphrase-encrypted private key file
    #[serde(rename = "encrypted-private-key-path")]
    pub encrypted_private_key_path: PathBuf,
}

impl BlsKey {
    /// Create a key record.
    pub fn new(public_key: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            public_key: public_key.into(),
            encrypted_private_key_path: path.into(),
        }
    }
}

/// Decode a hex BLS public key, tolerating a `0x` prefix and mixed case.
pub fn decode_bls_key(key: &str) -> Option<Vec<u8>> {
    let key = key.trim();
    let key = key
        .strip_prefix("0x")
        .or_else(|| key.strip_prefix("0X"))
        .unwrap_or(key);
    hex::decode(key).ok()
}

/// Compare two BLS public keys by value rather than by spelling.
pub fn same_bls_key(a: &str, b: &str) -> bool {
    match (decode_bls_key(a), decode_bls_key(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
