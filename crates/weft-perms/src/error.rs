//! Error types for thread encryption and invites.

use thiserror::Error;

use crate::cipher::CipherError;

#[derive(Debug, Error)]
pub enum PermsError {
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The identity key has no valid key-agreement form.
    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The invite opened, but its contents are inconsistent.
    #[error("invalid invite: {0}")]
    InvalidInvite(String),

    #[error("malformed invite link: {0}")]
    MalformedLink(String),

    #[error("core error: {0}")]
    Core(#[from] weft_core::CoreError),
}

pub type Result<T> = std::result::Result<T, PermsError>;
