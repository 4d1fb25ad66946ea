//! Invite secrets: everything a new member needs to join a thread.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use weft_core::{decode_cbor, encode_cbor, Ed25519PublicKey, Keypair, ThreadId};

use crate::cipher::SymmetricKey;
use crate::error::{PermsError, Result};
use crate::seal::SealedBox;

/// The material carried inside an invite block.
///
/// Direct invites seal it for one identity. External invites lock it with a
/// bearer key that travels in the invite link.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteSecret {
    /// Seed of the thread signing keypair.
    pub thread_seed: [u8; 32],

    /// Thread content key.
    pub key: SymmetricKey,

    /// The inviter's name for the thread.
    pub name: String,

    /// Current members, inviter included.
    pub peers: Vec<Ed25519PublicKey>,
}

impl InviteSecret {
    pub fn thread_keypair(&self) -> Keypair {
        Keypair::from_seed(&self.thread_seed)
    }

    pub fn thread_id(&self) -> ThreadId {
        ThreadId::from_public_key(&self.thread_keypair().public_key())
    }

    /// Fails unless the secret belongs to `thread`.
    pub fn check_thread(&self, thread: &ThreadId) -> Result<()> {
        if self.thread_id() != *thread {
            return Err(PermsError::InvalidInvite(format!(
                "secret is for thread {}, block is in {}",
                self.thread_id(),
                thread
            )));
        }
        Ok(())
    }

    /// Seal for a single recipient identity.
    pub fn seal_for(&self, recipient: &Ed25519PublicKey) -> Result<Bytes> {
        let plaintext = encode_cbor(self)?;
        Ok(SealedBox::seal(&plaintext, recipient)?.to_bytes()?.into())
    }

    /// Open a sealed secret with the recipient identity.
    pub fn open_sealed(sealed: &[u8], identity: &Keypair) -> Result<Self> {
        let plaintext = SealedBox::from_bytes(sealed)?.open(identity)?;
        decode_cbor(&plaintext).map_err(|e| PermsError::Serialization(e.to_string()))
    }

    /// Lock with a bearer key.
    pub fn lock(&self, unlock_key: &SymmetricKey) -> Result<Bytes> {
        let plaintext = encode_cbor(self)?;
        Ok(unlock_key.encrypt(&plaintext)?.into())
    }

    /// Unlock with a bearer key. Fails with `InvalidKey` unless the key is
    /// 44 bytes, and `AuthenticationFailed` if it is the wrong key.
    pub fn unlock(locked: &[u8], unlock_key: &[u8]) -> Result<Self> {
        let plaintext = SymmetricKey::from_slice(unlock_key)?.decrypt(locked)?;
        decode_cbor(&plaintext).map_err(|e| PermsError::Serialization(e.to_string()))
    }
}

impl std::fmt::Debug for InviteSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteSecret")
            .field("thread", &self.thread_id())
            .field("name", &self.name)
            .field("peers", &self.peers.len())
            .finish()
    }
}
