//! X25519 key agreement over identity keys.
//!
//! Identities are Ed25519 keys. For sealing they are used in their
//! Montgomery form, so a peer can receive sealed secrets at the same address
//! it signs blocks with.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};

use weft_core::{Ed25519PublicKey, Keypair};

use crate::cipher::SymmetricKey;
use crate::error::{PermsError, Result};

const SEAL_CONTEXT: &str = "weft invite seal v1";

/// An X25519 public key (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct X25519PublicKey(pub [u8; 32]);

impl X25519PublicKey {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The key-agreement form of an identity key.
    pub fn from_identity(identity: &Ed25519PublicKey) -> Result<Self> {
        identity
            .to_x25519()
            .map(Self)
            .map_err(|_| PermsError::InvalidPublicKey)
    }

    fn to_dalek(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

impl From<PublicKey> for X25519PublicKey {
    fn from(pk: PublicKey) -> Self {
        Self(*pk.as_bytes())
    }
}

/// An X25519 static secret.
pub struct X25519StaticSecret(StaticSecret);

impl X25519StaticSecret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// The key-agreement secret of an identity keypair.
    pub fn from_identity(identity: &Keypair) -> Self {
        Self(StaticSecret::from(identity.to_x25519_secret()))
    }

    pub fn public_key(&self) -> X25519PublicKey {
        X25519PublicKey::from(PublicKey::from(&self.0))
    }

    pub fn diffie_hellman(&self, peer_public: &X25519PublicKey) -> SharedKey {
        SharedKey(*self.0.diffie_hellman(&peer_public.to_dalek()).as_bytes())
    }
}

/// A shared secret derived from X25519 key agreement.
#[derive(Clone)]
pub struct SharedKey([u8; 32]);

impl SharedKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Derive a single-use symmetric key, bound to both public halves of the
    /// exchange.
    pub fn derive_key(
        &self,
        ephemeral: &X25519PublicKey,
        recipient: &X25519PublicKey,
    ) -> SymmetricKey {
        let mut hasher = blake3::Hasher::new_derive_key(SEAL_CONTEXT);
        hasher.update(&self.0);
        hasher.update(ephemeral.as_bytes());
        hasher.update(recipient.as_bytes());
        let mut out = [0u8; crate::cipher::KEY_LEN];
        hasher.finalize_xof().fill(&mut out);
        SymmetricKey::from_bytes(out)
    }
}

/// Ephemeral key pair for one-time key agreement.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: X25519PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(rand::thread_rng());
        let public = X25519PublicKey::from(PublicKey::from(&secret));
        Self { secret, public }
    }

    pub fn public_key(&self) -> X25519PublicKey {
        self.public
    }

    /// Consumes the ephemeral secret.
    pub fn diffie_hellman(self, peer_public: &X25519PublicKey) -> SharedKey {
        SharedKey(*self.secret.diffie_hellman(&peer_public.to_dalek()).as_bytes())
    }
}
