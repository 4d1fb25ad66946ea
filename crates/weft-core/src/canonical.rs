//! Canonical CBOR encoding for deterministic serialization.
//!
//! Headers, signed blocks and stored blocks are written with RFC 8949 core
//! deterministic encoding:
//! - Map keys are small integers written in ascending order
//! - Integers use the smallest valid encoding
//! - Definite lengths only
//! - No floats (dates are i64 milliseconds)
//!
//! Decoding re-encodes the parsed value and rejects any input that is not
//! byte-for-byte canonical, so one block has exactly one address.

use ciborium::value::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::block::{BlockHeader, BlockKind, SignedBlock, StoredBlock};
use crate::crypto::{Blake3Hash, Ed25519PublicKey, Ed25519Signature};
use crate::error::CoreError;
use crate::types::{BlockId, ThreadId};

/// Header field keys. Keys 0-23 encode as single bytes.
mod header_keys {
    pub const VERSION: u64 = 0;
    pub const KIND: u64 = 1;
    pub const DATE: u64 = 2;
    pub const PARENTS: u64 = 3;
    pub const AUTHOR: u64 = 4;
    pub const THREAD: u64 = 5;
    pub const PAYLOAD_HASH: u64 = 6;
}

mod stored_keys {
    pub const VERSION: u64 = 0;
    pub const THREAD: u64 = 1;
    pub const KIND: u64 = 2;
    pub const SALT: u64 = 3;
    pub const BODY: u64 = 4;
}

/// Encode any serde value as CBOR. Used for payloads and secrets, whose
/// bytes are hashed or sealed rather than re-derived.
pub fn encode_cbor<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::EncodingError(e.to_string()))?;
    Ok(buf)
}

/// Decode a serde value from CBOR.
pub fn decode_cbor<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
}

/// Encode a block header to canonical CBOR bytes. This is the signed message.
pub fn canonical_header_bytes(header: &BlockHeader) -> Vec<u8> {
    let mut enc = Encoder::default();
    write_header(&mut enc, header);
    enc.finish()
}

/// Encode a signed block: `[header, payload, author_sig, thread_sig]`.
pub fn encode_signed_block(block: &SignedBlock) -> Vec<u8> {
    let mut enc = Encoder::default();
    enc.array(4);
    write_header(&mut enc, &block.header);
    enc.bytes(&block.payload);
    enc.bytes(&block.author_signature.0);
    enc.bytes(&block.thread_signature.0);
    enc.finish()
}

/// Decode a signed block from canonical bytes.
pub fn decode_signed_block(bytes: &[u8]) -> Result<SignedBlock, CoreError> {
    let value = read_value(bytes)?;
    let items = match &value {
        Value::Array(items) if items.len() == 4 => items,
        _ => return Err(malformed("expected 4-element array")),
    };

    let block = SignedBlock {
        header: value_to_header(&items[0])?,
        payload: as_bytes(&items[1], "payload")?.to_vec().into(),
        author_signature: signature(&items[2], "author signature")?,
        thread_signature: signature(&items[3], "thread signature")?,
    };

    ensure_canonical(bytes, &encode_signed_block(&block))?;
    Ok(block)
}

/// Encode a stored block to canonical bytes.
pub fn encode_stored_block(block: &StoredBlock) -> Vec<u8> {
    let mut enc = Encoder::default();
    enc.map(5);
    enc.uint(stored_keys::VERSION);
    enc.uint(block.version.into());
    enc.uint(stored_keys::THREAD);
    enc.bytes(&block.thread.0);
    enc.uint(stored_keys::KIND);
    enc.uint(block.kind.to_u16().into());
    enc.uint(stored_keys::SALT);
    match &block.salt {
        Some(salt) => enc.bytes(salt),
        None => enc.null(),
    }
    enc.uint(stored_keys::BODY);
    enc.bytes(&block.body);
    enc.finish()
}

/// Decode a stored block from canonical bytes.
pub fn decode_stored_block(bytes: &[u8]) -> Result<StoredBlock, CoreError> {
    let value = read_value(bytes)?;
    let map = as_map(&value)?;

    let version = as_u64(field(map, stored_keys::VERSION, "version")?, "version")?;
    let salt = match field(map, stored_keys::SALT, "salt")? {
        Value::Null => None,
        v => {
            let raw = as_bytes(v, "salt")?;
            let salt: [u8; 16] = raw.try_into().map_err(|_| malformed("salt length"))?;
            Some(salt)
        }
    };

    let block = StoredBlock {
        version: u8::try_from(version).map_err(|_| malformed("version out of range"))?,
        thread: ThreadId(as_bytes32(field(map, stored_keys::THREAD, "thread")?, "thread")?),
        kind: kind(field(map, stored_keys::KIND, "kind")?)?,
        salt,
        body: as_bytes(field(map, stored_keys::BODY, "body")?, "body")?
            .to_vec()
            .into(),
    };

    ensure_canonical(bytes, &encode_stored_block(&block))?;
    Ok(block)
}

fn write_header(enc: &mut Encoder, header: &BlockHeader) {
    enc.map(7);
    enc.uint(header_keys::VERSION);
    enc.uint(header.version.into());
    enc.uint(header_keys::KIND);
    enc.uint(header.kind.to_u16().into());
    enc.uint(header_keys::DATE);
    enc.int(header.date);
    enc.uint(header_keys::PARENTS);
    enc.array(header.parents.len() as u64);
    for parent in &header.parents {
        enc.bytes(&parent.0);
    }
    enc.uint(header_keys::AUTHOR);
    enc.bytes(&header.author.0);
    enc.uint(header_keys::THREAD);
    enc.bytes(&header.thread.0);
    enc.uint(header_keys::PAYLOAD_HASH);
    enc.bytes(&header.payload_hash.0);
}

fn value_to_header(value: &Value) -> Result<BlockHeader, CoreError> {
    let map = as_map(value)?;

    let version = as_u64(field(map, header_keys::VERSION, "version")?, "version")?;
    let date = as_i64(field(map, header_keys::DATE, "date")?, "date")?;

    let parents = match field(map, header_keys::PARENTS, "parents")? {
        Value::Array(items) => items
            .iter()
            .map(|item| as_bytes32(item, "parent").map(BlockId))
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(malformed("parents must be an array")),
    };

    Ok(BlockHeader {
        version: u8::try_from(version).map_err(|_| malformed("version out of range"))?,
        kind: kind(field(map, header_keys::KIND, "kind")?)?,
        date,
        parents,
        author: Ed25519PublicKey(as_bytes32(field(map, header_keys::AUTHOR, "author")?, "author")?),
        thread: ThreadId(as_bytes32(field(map, header_keys::THREAD, "thread")?, "thread")?),
        payload_hash: Blake3Hash(as_bytes32(
            field(map, header_keys::PAYLOAD_HASH, "payload_hash")?,
            "payload_hash",
        )?),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Writer
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    fn finish(self) -> Vec<u8> {
        self.buf
    }

    /// Write a major type with its argument in the shortest form.
    fn head(&mut self, major: u8, n: u64) {
        let mt = major << 5;
        if n < 24 {
            self.buf.push(mt | (n as u8));
        } else if n <= 0xff {
            self.buf.push(mt | 24);
            self.buf.push(n as u8);
        } else if n <= 0xffff {
            self.buf.push(mt | 25);
            self.buf.extend_from_slice(&(n as u16).to_be_bytes());
        } else if n <= 0xffff_ffff {
            self.buf.push(mt | 26);
            self.buf.extend_from_slice(&(n as u32).to_be_bytes());
        } else {
            self.buf.push(mt | 27);
            self.buf.extend_from_slice(&n.to_be_bytes());
        }
    }

    fn uint(&mut self, n: u64) {
        self.head(0, n);
    }

    fn int(&mut self, n: i64) {
        if n >= 0 {
            self.head(0, n as u64);
        } else {
            // CBOR encodes -1 as 0, -2 as 1, etc.
            self.head(1, !n as u64);
        }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.head(2, bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    fn array(&mut self, len: u64) {
        self.head(4, len);
    }

    fn map(&mut self, len: u64) {
        self.head(5, len);
    }

    fn null(&mut self) {
        self.buf.push(0xf6);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reader helpers
// ─────────────────────────────────────────────────────────────────────────────

fn malformed(msg: &str) -> CoreError {
    CoreError::Malformed(msg.to_string())
}

fn read_value(bytes: &[u8]) -> Result<Value, CoreError> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))
}

fn ensure_canonical(input: &[u8], reencoded: &[u8]) -> Result<(), CoreError> {
    if input != reencoded {
        return Err(malformed("non-canonical encoding"));
    }
    Ok(())
}

fn as_map(value: &Value) -> Result<&[(Value, Value)], CoreError> {
    match value {
        Value::Map(entries) => Ok(entries),
        _ => Err(malformed("expected map")),
    }
}

fn field<'a>(map: &'a [(Value, Value)], key: u64, name: &str) -> Result<&'a Value, CoreError> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Integer(i) if i128::from(*i) == i128::from(key)))
        .map(|(_, v)| v)
        .ok_or_else(|| malformed(&format!("missing {}", name)))
}

fn as_u64(value: &Value, name: &str) -> Result<u64, CoreError> {
    match value {
        Value::Integer(i) => {
            u64::try_from(i128::from(*i)).map_err(|_| malformed(&format!("{} out of range", name)))
        }
        _ => Err(malformed(&format!("{} must be an integer", name))),
    }
}

fn as_i64(value: &Value, name: &str) -> Result<i64, CoreError> {
    match value {
        Value::Integer(i) => {
            i64::try_from(i128::from(*i)).map_err(|_| malformed(&format!("{} out of range", name)))
        }
        _ => Err(malformed(&format!("{} must be an integer", name))),
    }
}

fn as_bytes<'a>(value: &'a Value, name: &str) -> Result<&'a [u8], CoreError> {
    match value {
        Value::Bytes(b) => Ok(b),
        _ => Err(malformed(&format!("{} must be bytes", name))),
    }
}

fn as_bytes32(value: &Value, name: &str) -> Result<[u8; 32], CoreError> {
    as_bytes(value, name)?
        .try_into()
        .map_err(|_| malformed(&format!("{} must be 32 bytes", name)))
}

fn signature(value: &Value, name: &str) -> Result<Ed25519Signature, CoreError> {
    let raw: [u8; 64] = as_bytes(value, name)?
        .try_into()
        .map_err(|_| malformed(&format!("{} must be 64 bytes", name)))?;
    Ok(Ed25519Signature(raw))
}

fn kind(value: &Value) -> Result<BlockKind, CoreError> {
    let raw = as_u64(value, "kind")?;
    u16::try_from(raw)
        .ok()
        .and_then(BlockKind::from_u16)
        .ok_or_else(|| malformed(&format!("invalid kind: {}", raw)))
}
