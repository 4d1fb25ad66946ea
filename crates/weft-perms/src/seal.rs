//! Sealed boxes addressed to an identity key.
//!
//! The sender generates an ephemeral X25519 key, agrees a shared secret with
//! the recipient's identity, and encrypts under a key derived from it. Only
//! the holder of the recipient identity can open the box.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use weft_core::{decode_cbor, encode_cbor, Ed25519PublicKey, Keypair};

use crate::crypto::{EphemeralKeyPair, X25519PublicKey, X25519StaticSecret};
use crate::error::{PermsError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    /// Sender's side of the ECDH.
    pub ephemeral_public: X25519PublicKey,

    pub ciphertext: Bytes,
}

impl SealedBox {
    /// Seal `plaintext` for the holder of `recipient`.
    pub fn seal(plaintext: &[u8], recipient: &Ed25519PublicKey) -> Result<Self> {
        let recipient_public = X25519PublicKey::from_identity(recipient)?;

        let ephemeral = EphemeralKeyPair::generate();
        let ephemeral_public = ephemeral.public_key();
        let key = ephemeral
            .diffie_hellman(&recipient_public)
            .derive_key(&ephemeral_public, &recipient_public);

        Ok(Self {
            ephemeral_public,
            ciphertext: key.encrypt(plaintext)?.into(),
        })
    }

    /// Open the box with the recipient identity.
    pub fn open(&self, identity: &Keypair) -> Result<Vec<u8>> {
        let secret = X25519StaticSecret::from_identity(identity);
        let key = secret
            .diffie_hellman(&self.ephemeral_public)
            .derive_key(&self.ephemeral_public, &secret.public_key());
        Ok(key.decrypt(&self.ciphertext)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(encode_cbor(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode_cbor(bytes).map_err(|e| PermsError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::CipherError;

    #[test]
    fn test_seal_open_roundtrip() {
        let recipient = Keypair::generate();
        let sealed = SealedBox::seal(b"thread secret", &recipient.public_key()).unwrap();
        assert_eq!(sealed.open(&recipient).unwrap(), b"thread secret");
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let recipient = Keypair::generate();
        let other = Keypair::generate();
        let sealed = SealedBox::seal(b"thread secret", &recipient.public_key()).unwrap();
        assert!(matches!(
            sealed.open(&other),
            Err(PermsError::Cipher(CipherError::AuthenticationFailed))
        ));
    }

    #[test]
    fn test_serialization() {
        let recipient = Keypair::generate();
        let sealed = SealedBox::seal(b"x", &recipient.public_key()).unwrap();
        let recovered = SealedBox::from_bytes(&sealed.to_bytes().unwrap()).unwrap();
        assert_eq!(sealed, recovered);
        assert_eq!(recovered.open(&recipient).unwrap(), b"x");
    }

    #[test]
    fn test_each_seal_uses_fresh_ephemeral() {
        let recipient = Keypair::generate().public_key();
        let a = SealedBox::seal(b"same", &recipient).unwrap();
        let b = SealedBox::seal(b"same", &recipient).unwrap();
        assert_ne!(a.ephemeral_public, b.ephemeral_public);
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
