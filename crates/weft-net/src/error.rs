//! Error types for the network module.

use thiserror::Error;

use crate::messages::ErrorCode;

/// Errors that can occur talking to peers.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("protocol version mismatch: local={local}, peer={peer}")]
    VersionMismatch { local: u8, peer: u8 },

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("codec error: {0}")]
    Codec(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// The peer dropped the request without answering.
    #[error("no response from {0}")]
    NoResponse(String),

    #[error("timeout: {0}")]
    Timeout(String),

    /// Peer sent an error message.
    #[error("peer error ({code:?}): {message}")]
    Remote { code: ErrorCode, message: String },

    /// The peer answered with a message of the wrong type.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(&'static str),
}

/// Result type for network operations.
pub type Result<T> = std::result::Result<T, NetError>;
