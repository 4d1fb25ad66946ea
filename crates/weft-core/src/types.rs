//! Strong identifier types for Weft.
//!
//! All identifiers are newtypes to prevent misuse at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::{Blake3Hash, Ed25519PublicKey};

/// A peer's network identity. This is the peer's public key.
pub type PeerId = Ed25519PublicKey;

/// A 32-byte block address, computed as Blake3(stored block bytes).
///
/// Because the hash covers the encrypted form, any change to a block
/// yields a different id.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub [u8; 32]);

impl BlockId {
    /// Create a new BlockId from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Compute the address of stored block bytes.
    pub fn of(bytes: &[u8]) -> Self {
        Self(Blake3Hash::hash(bytes).0)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        decode_hex32(s).map(Self)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for BlockId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for BlockId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for BlockId {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

/// A thread identifier: the thread's Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ThreadId(pub [u8; 32]);

impl ThreadId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The thread id for a thread public key.
    pub const fn from_public_key(key: &Ed25519PublicKey) -> Self {
        Self(key.0)
    }

    /// The thread public key, used to check thread signatures.
    pub const fn public_key(&self) -> Ed25519PublicKey {
        Ed25519PublicKey(self.0)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        decode_hex32(s).map(Self)
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

impl AsRef<[u8]> for ThreadId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for ThreadId {
    type Error = std::array::TryFromSliceError;

    fn try_from(slice: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 32] = slice.try_into()?;
        Ok(Self(arr))
    }
}

pub(crate) fn decode_hex32(s: &str) -> Result<[u8; 32], hex::FromHexError> {
    let bytes = hex::decode(s)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_block_id_hex_roundtrip() {
        let id = BlockId::from_bytes([0x42; 32]);
        let recovered = BlockId::from_hex(&id.to_hex()).unwrap();
        assert_eq!(id, recovered);
    }

    #[test]
    fn test_block_id_is_content_address() {
        assert_eq!(BlockId::of(b"abc"), BlockId::of(b"abc"));
        assert_ne!(BlockId::of(b"abc"), BlockId::of(b"abd"));
    }

    #[test]
    fn test_block_id_display() {
        let id = BlockId::from_bytes([0xab; 32]);
        assert_eq!(format!("{}", id), "abababababababab");
        assert!(format!("{:?}", id).starts_with("BlockId("));
    }

    #[test]
    fn test_thread_id_matches_public_key() {
        let kp = Keypair::from_seed(&[7; 32]);
        let id = ThreadId::from_public_key(&kp.public_key());
        assert_eq!(id.public_key(), kp.public_key());
    }

    #[test]
    fn test_from_hex_rejects_short_input() {
        assert!(ThreadId::from_hex("abcd").is_err());
        assert!(BlockId::from_hex("zz").is_err());
    }

    #[test]
    fn test_block_id_json() {
        let id = BlockId::from_bytes([1; 32]);
        let json = serde_json::to_string(&id).unwrap();
        let back: BlockId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
