//! Wire messages exchanged between peers.
//!
//! Every message travels in an [`Envelope`] carrying the protocol version.
//! Envelopes are CBOR on the wire.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use weft_core::{decode_cbor, encode_cbor, BlockId, BlockKind, ThreadId};

use crate::error::{NetError, Result};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 0;

/// Message size limits.
pub mod limits {
    /// Max stored-block bytes in `Block` and `BlockData`.
    pub const MAX_BLOCK_BYTES: usize = 4 * 1024 * 1024;
    /// Max length of an error message.
    pub const MAX_ERROR_MESSAGE: usize = 1024;
    /// Max encoded envelope size.
    pub const MAX_ENVELOPE_BYTES: usize = MAX_BLOCK_BYTES + 4096;
}

/// Peer protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Push of a stored block into a thread.
    Block {
        thread: ThreadId,
        kind: BlockKind,
        /// Stored-block bytes, exactly as addressed.
        bytes: Bytes,
    },

    /// Request a stored block by address.
    GetBlock { id: BlockId },

    /// Response to `GetBlock`.
    BlockData { id: BlockId, bytes: Bytes },

    /// Request a thread's current head.
    GetHead { thread: ThreadId },

    /// Response to `GetHead`. `None` if the thread has no blocks.
    Head {
        thread: ThreadId,
        head: Option<BlockId>,
    },

    /// Generic success.
    Ack,

    /// Error condition.
    Error { code: ErrorCode, message: String },
}

impl Message {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.len() > limits::MAX_ERROR_MESSAGE {
            let mut end = limits::MAX_ERROR_MESSAGE;
            while !message.is_char_boundary(end) {
                end -= 1;
            }
            message.truncate(end);
        }
        Message::Error { code, message }
    }

    /// Short name for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Message::Block { .. } => "block",
            Message::GetBlock { .. } => "get_block",
            Message::BlockData { .. } => "block_data",
            Message::GetHead { .. } => "get_head",
            Message::Head { .. } => "head",
            Message::Ack => "ack",
            Message::Error { .. } => "error",
        }
    }

    /// Check if this message respects size limits.
    pub fn validate_limits(&self) -> std::result::Result<(), &'static str> {
        match self {
            Message::Block { bytes, .. } | Message::BlockData { bytes, .. } => {
                if bytes.len() > limits::MAX_BLOCK_BYTES {
                    return Err("block too large");
                }
            }
            Message::Error { message, .. } => {
                if message.len() > limits::MAX_ERROR_MESSAGE {
                    return Err("error message too long");
                }
            }
            Message::GetBlock { .. }
            | Message::GetHead { .. }
            | Message::Head { .. }
            | Message::Ack => {}
        }
        Ok(())
    }
}

/// Error codes carried by `Message::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Unknown = 0,
    VersionMismatch = 1,
    MessageTooLarge = 2,
    InvalidMessage = 3,
    /// Requested block or thread is not known here.
    NotFound = 4,
    /// The pushed block failed verification or application.
    Rejected = 5,
    InternalError = 6,
}

/// A versioned message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub version: u8,
    pub message: Message,
}

impl Envelope {
    pub fn new(message: Message) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
        }
    }

    /// Check version and size limits.
    pub fn validate(&self) -> Result<()> {
        if self.version != PROTOCOL_VERSION {
            return Err(NetError::VersionMismatch {
                local: PROTOCOL_VERSION,
                peer: self.version,
            });
        }
        self.message
            .validate_limits()
            .map_err(|e| NetError::InvalidMessage(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = encode_cbor(self).map_err(|e| NetError::Codec(e.to_string()))?;
        if bytes.len() > limits::MAX_ENVELOPE_BYTES {
            return Err(NetError::InvalidMessage("envelope too large".into()));
        }
        Ok(bytes)
    }

    /// Decode and validate an envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > limits::MAX_ENVELOPE_BYTES {
            return Err(NetError::InvalidMessage("envelope too large".into()));
        }
        let envelope: Envelope = decode_cbor(bytes).map_err(|e| NetError::Codec(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }

    /// Turn an `Error` reply into a `Remote` error.
    pub fn into_result(self) -> Result<Message> {
        match self.message {
            Message::Error { code, message } => Err(NetError::Remote { code, message }),
            other => Ok(other),
        }
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        Envelope::new(message)
    }
}
