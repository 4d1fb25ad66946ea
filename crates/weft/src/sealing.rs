//! Turning signed blocks into stored blocks and back.
//!
//! Thread-encrypted kinds are encrypted under a subkey of the thread key,
//! derived from a random per-block salt. Invite kinds are stored in the
//! clear; their secret is already protected inside the payload.

use bytes::Bytes;
use rand::RngCore;

use weft_core::{
    Block, BlockKind, SignedBlock, StoredBlock, ThreadId, ValidationError, BLOCK_VERSION,
};
use weft_perms::SymmetricKey;

use crate::error::{Result, WeftError};

const SALT_LEN: usize = 16;

/// Wrap a signed block in its stored form.
pub fn seal_block(block: &SignedBlock, key: &SymmetricKey) -> Result<StoredBlock> {
    let kind = block.kind();
    let encoded = block.to_bytes();
    let (salt, body) = if kind.is_thread_encrypted() {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let body = key.derive(&salt).encrypt(&encoded)?;
        (Some(salt), Bytes::from(body))
    } else {
        (None, Bytes::from(encoded))
    };
    Ok(StoredBlock {
        version: BLOCK_VERSION,
        thread: block.header.thread,
        kind,
        salt,
        body,
    })
}

/// Decrypt (when needed) and verify a stored block.
///
/// `key` may be `None` only for kinds that are stored in the clear. The
/// outer thread and kind must agree with the signed header.
pub fn open_block(
    stored: &StoredBlock,
    key: Option<&SymmetricKey>,
) -> Result<(SignedBlock, Block)> {
    let plaintext = match (stored.kind.is_thread_encrypted(), stored.salt) {
        (true, Some(salt)) => {
            let key = key.ok_or_else(|| {
                ValidationError::Malformed(format!("no key to open {} block", stored.kind.label()))
            })?;
            Bytes::from(key.derive(&salt).decrypt(&stored.body)?)
        }
        (false, None) => stored.body.clone(),
        (true, None) => {
            return Err(malformed(stored.kind, "must be encrypted"));
        }
        (false, Some(_)) => {
            return Err(malformed(stored.kind, "must not be encrypted"));
        }
    };

    let signed = SignedBlock::from_bytes(&plaintext).map_err(ValidationError::from)?;
    check_envelope(stored, &signed)?;
    let block = signed.verify()?;
    Ok((signed, block))
}

/// Parse stored bytes, checking they belong to `thread`.
pub fn decode_stored(bytes: &[u8], thread: &ThreadId) -> Result<StoredBlock> {
    let stored = StoredBlock::from_bytes(bytes).map_err(ValidationError::from)?;
    if stored.thread != *thread {
        return Err(ValidationError::ThreadMismatch.into());
    }
    Ok(stored)
}

fn check_envelope(stored: &StoredBlock, signed: &SignedBlock) -> Result<()> {
    if signed.header.thread != stored.thread {
        return Err(ValidationError::ThreadMismatch.into());
    }
    if signed.kind() != stored.kind {
        return Err(ValidationError::KindMismatch {
            header: signed.kind(),
            payload: stored.kind,
        }
        .into());
    }
    Ok(())
}

fn malformed(kind: BlockKind, what: &str) -> WeftError {
    ValidationError::Malformed(format!("{} block {}", kind.label(), what)).into()
}
