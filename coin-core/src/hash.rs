//! Hash utilities for the blockchain

use sha2::{Digest, Sha256};

/// 256-bit hash value - fixed size array for blockchain use
pub type Hash256 = [u8; 32];

/// The all-zero hash, used as the previous hash of the genesis block and as
/// the reference hash of the coinbase input.
pub const ZERO_HASH: Hash256 = [0u8; 32];

/// Compute SHA256(SHA256(data))
pub fn hash256(data: &[u8]) -> Hash256 {
    let first_hash = Sha256::digest(data);
    let second_hash = Sha256::digest(first_hash);

    let mut result = [0u8; 32];
    result.copy_from_slice(&second_hash);
    result
}

/// Convert hash to hexadecimal string
pub fn hash_to_hex(hash_bytes: &[u8]) -> String {
    hex::encode(hash_bytes)
}

/// Converts a hexadecimal string to a 32-byte array.
///
/// Shorter inputs are left-padded with zeros so that `"ff"` parses to the
/// numeric value 255 under big-endian comparison.
pub fn hex_to_hash256(hex_str: &str) -> Result<Hash256, hex::FromHexError> {
    let hex_str = hex_str.trim_start_matches("0x");
    let bytes = hex::decode(hex_str)?;
    if bytes.len() > 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }

    let mut result = [0u8; 32];
    result[32 - bytes.len()..].copy_from_slice(&bytes);
    Ok(result)
}

/// Check if a hash meets a difficulty target.
///
/// Both values are compared as unsigned big-endian integers and the hash must
/// be strictly below the target.
pub fn meets_difficulty(hash: &Hash256, target: &Hash256) -> bool {
    hash < target
}
