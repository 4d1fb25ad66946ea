//! Symmetric authenticated encryption of thread content.
//!
//! A key is 44 bytes: a 32-byte ChaCha20-Poly1305 key followed by the 12-byte
//! nonce it is used with. Because the nonce is part of the key, a key must
//! never encrypt two different plaintexts. Threads therefore derive a fresh
//! subkey per block from a random salt (see [`SymmetricKey::derive`]).

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Total key length: cipher key plus nonce.
pub const KEY_LEN: usize = 44;

const CIPHER_KEY_LEN: usize = 32;

const SUBKEY_CONTEXT: &str = "weft thread block subkey v1";

/// Errors from the symmetric cipher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    #[error("invalid key: expected {KEY_LEN} bytes, got {0}")]
    InvalidKey(usize),

    /// Tampered ciphertext or wrong key. No plaintext is returned.
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptionFailed,
}

/// Generate a fresh random 44-byte key.
pub fn generate_key() -> Vec<u8> {
    SymmetricKey::generate().as_bytes().to_vec()
}

/// Encrypt `plaintext` with a 44-byte key.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    SymmetricKey::from_slice(key)?.encrypt(plaintext)
}

/// Decrypt `ciphertext` with a 44-byte key.
pub fn decrypt(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError> {
    SymmetricKey::from_slice(key)?.decrypt(ciphertext)
}

/// A 44-byte key-plus-nonce blob.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymmetricKey(#[serde(with = "weft_core::serde_array")] [u8; KEY_LEN]);

impl SymmetricKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Fails with `InvalidKey` unless `bytes` is exactly 44 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CipherError> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKey(bytes.len()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Derive a subkey bound to `salt`.
    pub fn derive(&self, salt: &[u8]) -> SymmetricKey {
        let mut hasher = blake3::Hasher::new_derive_key(SUBKEY_CONTEXT);
        hasher.update(&self.0);
        hasher.update(salt);
        let mut out = [0u8; KEY_LEN];
        hasher.finalize_xof().fill(&mut out);
        SymmetricKey(out)
    }

    fn cipher(&self) -> (ChaCha20Poly1305, &Nonce) {
        let (key, nonce) = self.0.split_at(CIPHER_KEY_LEN);
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
        (cipher, Nonce::from_slice(nonce))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let (cipher, nonce) = self.cipher();
        cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CipherError::EncryptionFailed)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let (cipher, nonce) = self.cipher();
        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CipherError::AuthenticationFailed)
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_generated_key_length() {
        assert_eq!(generate_key().len(), KEY_LEN);
        assert_ne!(generate_key(), generate_key());
    }

    #[test]
    fn test_encrypt_decrypt() {
        let key = generate_key();
        let ciphertext = encrypt(b"hello, world!", &key).unwrap();
        assert_ne!(&ciphertext[..], b"hello, world!");
        assert_eq!(decrypt(&ciphertext, &key).unwrap(), b"hello, world!");
    }

    #[test]
    fn test_wrong_length_keys_rejected() {
        for len in [0, 32, 43, 45, 64] {
            let key = vec![7u8; len];
            assert_eq!(encrypt(b"x", &key), Err(CipherError::InvalidKey(len)));
            assert_eq!(decrypt(b"x", &key), Err(CipherError::InvalidKey(len)));
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = generate_key();
        let mut ciphertext = encrypt(b"secret", &key).unwrap();
        ciphertext[0] ^= 0x01;
        assert_eq!(
            decrypt(&ciphertext, &key),
            Err(CipherError::AuthenticationFailed)
        );
    }

    #[test]
    fn test_truncated_ciphertext_fails() {
        let key = generate_key();
        let ciphertext = encrypt(b"secret", &key).unwrap();
        assert!(decrypt(&ciphertext[..4], &key).is_err());
    }

    #[test]
    fn test_derive_is_deterministic_and_salted() {
        let key = SymmetricKey::generate();
        assert_eq!(key.derive(b"a"), key.derive(b"a"));
        assert_ne!(key.derive(b"a"), key.derive(b"b"));
        assert_ne!(&key.derive(b"a"), &key);
    }

    #[test]
    fn test_debug_hides_material() {
        let key = SymmetricKey::from_bytes([0xab; KEY_LEN]);
        assert!(!format!("{:?}", key).contains("ab"));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(plaintext in prop::collection::vec(any::<u8>(), 0..512)) {
            let key = generate_key();
            let ciphertext = encrypt(&plaintext, &key).unwrap();
            prop_assert_eq!(decrypt(&ciphertext, &key).unwrap(), plaintext);
        }

        #[test]
        fn prop_other_key_fails(plaintext in prop::collection::vec(any::<u8>(), 0..256)) {
            let key = generate_key();
            let other = generate_key();
            prop_assume!(key != other);
            let ciphertext = encrypt(&plaintext, &key).unwrap();
            prop_assert_eq!(decrypt(&ciphertext, &other), Err(CipherError::AuthenticationFailed));
        }
    }
}
