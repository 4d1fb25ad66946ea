//! # Weft Core
//!
//! Pure primitives for Weft: identities, thread blocks, and their canonical
//! encoding.
//!
//! This crate contains no I/O, no storage, no networking and no encryption.
//! Encryption of stored blocks lives in `weft-perms`; this crate only knows
//! the shape of the stored form.
//!
//! ## Key Types
//!
//! - [`SignedBlock`] - A block header and payload signed by author and thread
//! - [`BlockPayload`] - The closed set of block variants
//! - [`StoredBlock`] - The object-store form whose hash is the [`BlockId`]
//! - [`ThreadId`] - A thread's public key
//!
//! ## Canonicalization
//!
//! Headers and blocks use deterministic CBOR. See the [`canonical`] module.

pub mod block;
pub mod canonical;
pub mod crypto;
pub mod error;
pub mod serde_array;
pub mod types;
pub mod validation;

pub use block::{
    Block, BlockBuilder, BlockHeader, BlockKind, BlockPayload, PhotoMetadata, PhotoPayload,
    SignedBlock, StoredBlock, BLOCK_VERSION, IGNORE_PREFIX, MAX_PARENTS,
};
pub use canonical::{canonical_header_bytes, decode_cbor, encode_cbor};
pub use crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature, Keypair};
pub use error::{CoreError, ValidationError};
pub use types::{BlockId, PeerId, ThreadId};
pub use validation::{validate_header, verify_block};
