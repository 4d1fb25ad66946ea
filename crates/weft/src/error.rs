//! Error types for the wallet and thread engine.

use thiserror::Error;
use weft_core::{BlockId, CoreError, ThreadId, ValidationError};
use weft_net::NetError;
use weft_perms::{CipherError, PermsError};
use weft_store::StoreError;

/// Errors that can occur during wallet and thread operations.
#[derive(Debug, Error)]
pub enum WeftError {
    /// A block failed structural or signature checks.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("crypto error: {0}")]
    Perms(#[from] PermsError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// An ancestor could not be obtained locally or from any peer.
    #[error("backfill of {block} failed: {reason}")]
    Backfill { block: BlockId, reason: String },

    /// Fetched bytes do not hash to the requested address.
    #[error("content of {0} does not match its address")]
    AddressMismatch(BlockId),

    #[error("thread not found: {0}")]
    ThreadNotFound(ThreadId),

    #[error("thread already exists: {0}")]
    ThreadExists(ThreadId),

    #[error("block not found: {0}")]
    BlockNotFound(BlockId),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("invalid invite: {0}")]
    InvalidInvite(String),

    /// A merge was requested with no divergent branch to merge.
    #[error("nothing to merge in thread {0}")]
    NothingToMerge(ThreadId),

    #[error("wallet is closed")]
    Closed,
}

impl From<CipherError> for WeftError {
    fn from(e: CipherError) -> Self {
        WeftError::Perms(PermsError::Cipher(e))
    }
}

/// What kind of failure an error is, for callers that only need to branch
/// on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad signature, malformed payload, wrong key length.
    Validation,
    /// Authentication failure while decrypting.
    Crypto,
    Storage,
    Network,
    Backfill,
    NotFound,
    Conflict,
    Closed,
}

impl WeftError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WeftError::Validation(_) | WeftError::Core(_) | WeftError::InvalidInvite(_) => {
                ErrorKind::Validation
            }
            WeftError::Perms(e) => match e {
                PermsError::Cipher(CipherError::InvalidKey(_))
                | PermsError::MalformedLink(_)
                | PermsError::InvalidInvite(_)
                | PermsError::Serialization(_)
                | PermsError::Core(_) => ErrorKind::Validation,
                PermsError::Cipher(_) | PermsError::InvalidPublicKey => ErrorKind::Crypto,
            },
            WeftError::Store(StoreError::NotFound(_)) => ErrorKind::NotFound,
            WeftError::Store(_) => ErrorKind::Storage,
            WeftError::Net(_) => ErrorKind::Network,
            WeftError::Backfill { .. } | WeftError::AddressMismatch(_) => ErrorKind::Backfill,
            WeftError::ThreadNotFound(_)
            | WeftError::BlockNotFound(_)
            | WeftError::DeviceNotFound(_) => ErrorKind::NotFound,
            WeftError::ThreadExists(_) | WeftError::NothingToMerge(_) => ErrorKind::Conflict,
            WeftError::Closed => ErrorKind::Closed,
        }
    }
}

/// Result type for wallet and thread operations.
pub type Result<T> = std::result::Result<T, WeftError>;
