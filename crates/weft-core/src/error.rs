//! Error types for Weft core.

use thiserror::Error;

use crate::block::BlockKind;
use crate::types::BlockId;

/// Core errors that can occur while encoding or checking primitives.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("unsupported block version: {0}")]
    UnsupportedVersion(u8),

    #[error("malformed block: {0}")]
    Malformed(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("decoding error: {0}")]
    DecodingError(String),
}

/// Validation errors for block structure and signatures.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// One of the two signatures on a block did not verify.
    #[error("bad {0} signature")]
    BadSignature(&'static str),

    #[error("malformed: {0}")]
    Malformed(String),

    #[error("payload hash does not match header")]
    PayloadHashMismatch,

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),

    #[error("parents exceed maximum of {max}")]
    TooManyParents { max: usize },

    #[error("duplicate parent {0:?}")]
    DuplicateParent(BlockId),

    #[error("{kind:?} block with {count} parents")]
    ParentCount { kind: BlockKind, count: usize },

    #[error("ignore target must be tagged: {0}")]
    InvalidIgnoreTarget(String),

    #[error("header kind {header:?} does not match payload kind {payload:?}")]
    KindMismatch { header: BlockKind, payload: BlockKind },

    #[error("block belongs to a different thread")]
    ThreadMismatch,
}

impl From<CoreError> for ValidationError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::InvalidSignature | CoreError::InvalidPublicKey => {
                ValidationError::BadSignature("author")
            }
            CoreError::UnsupportedVersion(v) => ValidationError::UnsupportedVersion(v),
            CoreError::Malformed(msg)
            | CoreError::EncodingError(msg)
            | CoreError::DecodingError(msg) => ValidationError::Malformed(msg),
        }
    }
}
