//! Blocks: the immutable entries of a thread.
//!
//! A block is a signed header plus one typed payload. Blocks are never
//! edited; hiding or reconciling content is done by appending new blocks.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::canonical::{canonical_header_bytes, decode_cbor, encode_cbor};
use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
use crate::error::{CoreError, ValidationError};
use crate::types::{BlockId, ThreadId};

/// The current block schema version.
pub const BLOCK_VERSION: u8 = 0;

/// Maximum number of parents a block may name.
pub const MAX_PARENTS: usize = 16;

/// Tag prepended to the target id of an ignore block.
pub const IGNORE_PREFIX: &str = "ignore-";

/// The kind of block, determining how the payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum BlockKind {
    // Content kinds (0x0000 - 0x00FF)
    /// A reference to externally stored media.
    Photo = 0x0001,
    /// Hides an earlier block from listings.
    Ignore = 0x0002,
    /// Reconciles divergent heads.
    Merge = 0x0003,

    // Membership kinds (0x0100 - 0x01FF)
    /// Thread secret sealed for one recipient.
    Invite = 0x0100,
    /// Thread secret locked with a bearer key.
    ExternalInvite = 0x0101,
    /// A new member announces itself.
    Join = 0x0102,
    /// A member leaves.
    Leave = 0x0103,
}

impl BlockKind {
    /// Convert to u16 for serialization.
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    /// Try to parse from u16.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Photo),
            0x0002 => Some(Self::Ignore),
            0x0003 => Some(Self::Merge),
            0x0100 => Some(Self::Invite),
            0x0101 => Some(Self::ExternalInvite),
            0x0102 => Some(Self::Join),
            0x0103 => Some(Self::Leave),
            _ => None,
        }
    }

    pub fn is_content(self) -> bool {
        (self.to_u16() & 0xFF00) == 0x0000
    }

    pub fn is_membership(self) -> bool {
        (self.to_u16() & 0xFF00) == 0x0100
    }

    /// Whether blocks of this kind are stored encrypted under the thread key.
    ///
    /// Invites are read by parties who do not hold the thread key yet, so
    /// they are stored signed but in the clear. Their secret is sealed
    /// separately inside the payload.
    pub fn is_thread_encrypted(self) -> bool {
        !matches!(self, Self::Invite | Self::ExternalInvite)
    }

    /// Short lowercase label, used in logs and index rows.
    pub fn label(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Ignore => "ignore",
            Self::Merge => "merge",
            Self::Invite => "invite",
            Self::ExternalInvite => "external_invite",
            Self::Join => "join",
            Self::Leave => "leave",
        }
    }
}

/// Descriptive metadata carried by a photo block.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhotoMetadata {
    pub name: String,
    pub ext: String,
    pub width: u32,
    pub height: u32,
    /// When the media was added (Unix milliseconds).
    pub added: i64,
}

/// Payload of a photo block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoPayload {
    /// Address of the media in the object store.
    pub data_id: String,
    pub caption: String,
    pub metadata: PhotoMetadata,
}

/// The typed payload of a block. One variant per [`BlockKind`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockPayload {
    Photo(PhotoPayload),
    Ignore {
        /// `ignore-<hex block id>`.
        data_id: String,
    },
    Invite {
        recipient: Ed25519PublicKey,
        /// Invite secret sealed for `recipient`.
        sealed: Bytes,
    },
    ExternalInvite {
        /// Invite secret locked with the bearer key.
        locked: Bytes,
    },
    Join {
        /// The invite block this member was admitted through, if known.
        invite: Option<BlockId>,
    },
    Leave,
    Merge,
}

impl BlockPayload {
    /// An ignore payload targeting `target`.
    pub fn ignore(target: &BlockId) -> Self {
        Self::Ignore {
            data_id: format!("{}{}", IGNORE_PREFIX, target.to_hex()),
        }
    }

    pub fn kind(&self) -> BlockKind {
        match self {
            Self::Photo(_) => BlockKind::Photo,
            Self::Ignore { .. } => BlockKind::Ignore,
            Self::Invite { .. } => BlockKind::Invite,
            Self::ExternalInvite { .. } => BlockKind::ExternalInvite,
            Self::Join { .. } => BlockKind::Join,
            Self::Leave => BlockKind::Leave,
            Self::Merge => BlockKind::Merge,
        }
    }

    /// The payload-specific secondary key recorded in the index.
    pub fn data_id(&self) -> Option<&str> {
        match self {
            Self::Photo(photo) => Some(&photo.data_id),
            Self::Ignore { data_id } => Some(data_id),
            _ => None,
        }
    }

    /// The block hidden by an ignore payload.
    pub fn ignore_target(&self) -> Option<BlockId> {
        match self {
            Self::Ignore { data_id } => data_id
                .strip_prefix(IGNORE_PREFIX)
                .and_then(|hex| BlockId::from_hex(hex).ok()),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        encode_cbor(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        decode_cbor(bytes)
    }
}

/// The header of a block. Covered by both signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Schema version (currently 0).
    pub version: u8,

    pub kind: BlockKind,

    /// Author-claimed timestamp (Unix milliseconds). Untrusted.
    pub date: i64,

    /// Causal predecessors. Empty only for the first block of a thread.
    pub parents: Vec<BlockId>,

    pub author: Ed25519PublicKey,

    pub thread: ThreadId,

    /// Blake3 hash of the encoded payload.
    pub payload_hash: Blake3Hash,
}

/// A header and payload with the author's and the thread's signatures.
///
/// The thread signature can only be produced by someone holding the thread
/// secret, which is only handed out through invites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock {
    pub header: BlockHeader,

    /// The encoded [`BlockPayload`].
    pub payload: Bytes,

    /// Author signature over the canonical header.
    pub author_signature: Ed25519Signature,

    /// Thread signature over the canonical header.
    pub thread_signature: Ed25519Signature,
}

impl SignedBlock {
    pub fn author(&self) -> &Ed25519PublicKey {
        &self.header.author
    }

    pub fn kind(&self) -> BlockKind {
        self.header.kind
    }

    pub fn parents(&self) -> &[BlockId] {
        &self.header.parents
    }

    /// Verify both signatures and the block structure, then decode the payload.
    pub fn verify(&self) -> Result<Block, ValidationError> {
        crate::validation::verify_block(self)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::canonical::encode_signed_block(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        crate::canonical::decode_signed_block(bytes)
    }
}

/// A verified block with its decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub payload: BlockPayload,
}

impl Block {
    pub fn kind(&self) -> BlockKind {
        self.header.kind
    }

    pub fn author(&self) -> &Ed25519PublicKey {
        &self.header.author
    }

    pub fn parents(&self) -> &[BlockId] {
        &self.header.parents
    }
}

/// Builder for creating signed blocks.
pub struct BlockBuilder {
    thread: ThreadId,
    date: i64,
    parents: Vec<BlockId>,
    payload: BlockPayload,
}

impl BlockBuilder {
    /// Start building a block for a thread.
    pub fn new(thread: ThreadId, payload: BlockPayload) -> Self {
        Self {
            thread,
            date: 0,
            parents: Vec::new(),
            payload,
        }
    }

    pub fn date(mut self, date: i64) -> Self {
        self.date = date;
        self
    }

    pub fn parent(mut self, parent: BlockId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn parents(mut self, parents: impl IntoIterator<Item = BlockId>) -> Self {
        self.parents.extend(parents);
        self
    }

    /// Encode the payload and sign the header with both keys.
    pub fn sign(self, author: &Keypair, thread: &Keypair) -> Result<SignedBlock, CoreError> {
        let payload = Bytes::from(self.payload.to_bytes()?);

        let header = BlockHeader {
            version: BLOCK_VERSION,
            kind: self.payload.kind(),
            date: self.date,
            parents: self.parents,
            author: author.public_key(),
            thread: self.thread,
            payload_hash: Blake3Hash::hash(&payload),
        };

        let message = canonical_header_bytes(&header);
        Ok(SignedBlock {
            author_signature: author.sign(&message),
            thread_signature: thread.sign(&message),
            header,
            payload,
        })
    }
}

/// The object-store form of a block.
///
/// For thread-encrypted kinds `body` is the encoded [`SignedBlock`]
/// encrypted under a subkey of the thread key derived from `salt`.
/// Otherwise `salt` is `None` and `body` is the encoded block itself.
/// The block's address is the hash of this structure's canonical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlock {
    pub version: u8,
    pub thread: ThreadId,
    pub kind: BlockKind,
    pub salt: Option<[u8; 16]>,
    pub body: Bytes,
}

impl StoredBlock {
    pub fn is_encrypted(&self) -> bool {
        self.salt.is_some()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::canonical::encode_stored_block(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        crate::canonical::decode_stored_block(bytes)
    }

    /// The block address of these bytes.
    pub fn id(&self) -> BlockId {
        BlockId::of(&self.to_bytes())
    }
}
