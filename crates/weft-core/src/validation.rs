//! Block validation: signature verification and structural checks.

use std::collections::HashSet;

use crate::block::{
    Block, BlockHeader, BlockKind, BlockPayload, SignedBlock, BLOCK_VERSION, MAX_PARENTS,
};
use crate::canonical::canonical_header_bytes;
use crate::crypto::Blake3Hash;
use crate::error::ValidationError;

/// Verify a signed block and decode its payload.
///
/// This performs:
/// - Structural header checks
/// - Payload hash verification
/// - Author and thread signature verification
/// - Payload decoding and kind agreement
pub fn verify_block(block: &SignedBlock) -> Result<Block, ValidationError> {
    validate_header(&block.header)?;

    if Blake3Hash::hash(&block.payload) != block.header.payload_hash {
        return Err(ValidationError::PayloadHashMismatch);
    }

    let message = canonical_header_bytes(&block.header);
    block
        .header
        .author
        .verify(&message, &block.author_signature)
        .map_err(|_| ValidationError::BadSignature("author"))?;
    block
        .header
        .thread
        .public_key()
        .verify(&message, &block.thread_signature)
        .map_err(|_| ValidationError::BadSignature("thread"))?;

    let payload = BlockPayload::from_bytes(&block.payload)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    validate_payload(&block.header, &payload)?;

    Ok(Block {
        header: block.header.clone(),
        payload,
    })
}

/// Validate header structure without touching signatures.
pub fn validate_header(header: &BlockHeader) -> Result<(), ValidationError> {
    if header.version != BLOCK_VERSION {
        return Err(ValidationError::UnsupportedVersion(header.version));
    }

    if header.parents.len() > MAX_PARENTS {
        return Err(ValidationError::TooManyParents { max: MAX_PARENTS });
    }

    let mut seen = HashSet::with_capacity(header.parents.len());
    for parent in &header.parents {
        if !seen.insert(parent) {
            return Err(ValidationError::DuplicateParent(*parent));
        }
    }

    // Only merges may join branches.
    let count = header.parents.len();
    let ok = match header.kind {
        BlockKind::Merge => count >= 2,
        _ => count <= 1,
    };
    if !ok {
        return Err(ValidationError::ParentCount {
            kind: header.kind,
            count,
        });
    }

    Ok(())
}

fn validate_payload(header: &BlockHeader, payload: &BlockPayload) -> Result<(), ValidationError> {
    if payload.kind() != header.kind {
        return Err(ValidationError::KindMismatch {
            header: header.kind,
            payload: payload.kind(),
        });
    }

    if let BlockPayload::Ignore { data_id } = payload {
        if payload.ignore_target().is_none() {
            return Err(ValidationError::InvalidIgnoreTarget(data_id.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockBuilder, PhotoMetadata, PhotoPayload};
    use crate::crypto::{Ed25519Signature, Keypair};
    use crate::types::{BlockId, ThreadId};

    struct Keys {
        author: Keypair,
        thread_kp: Keypair,
        thread: ThreadId,
    }

    fn keys() -> Keys {
        let thread_kp = Keypair::from_seed(&[0x10; 32]);
        Keys {
            author: Keypair::from_seed(&[0x42; 32]),
            thread: ThreadId::from_public_key(&thread_kp.public_key()),
            thread_kp,
        }
    }

    fn photo() -> BlockPayload {
        BlockPayload::Photo(PhotoPayload {
            data_id: "media".into(),
            caption: String::new(),
            metadata: PhotoMetadata::default(),
        })
    }

    #[test]
    fn test_valid_block() {
        let k = keys();
        let signed = BlockBuilder::new(k.thread, photo())
            .date(1000)
            .sign(&k.author, &k.thread_kp)
            .unwrap();
        let block = signed.verify().unwrap();
        assert_eq!(block.kind(), BlockKind::Photo);
        assert_eq!(block.payload, photo());
    }

    #[test]
    fn test_tampered_date_fails() {
        let k = keys();
        let mut signed = BlockBuilder::new(k.thread, photo())
            .date(1000)
            .sign(&k.author, &k.thread_kp)
            .unwrap();
        signed.header.date = 1001;
        assert!(matches!(
            signed.verify(),
            Err(ValidationError::BadSignature("author"))
        ));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let k = keys();
        let mut signed = BlockBuilder::new(k.thread, photo())
            .sign(&k.author, &k.thread_kp)
            .unwrap();
        signed.payload = BlockPayload::Leave.to_bytes().unwrap().into();
        assert!(matches!(
            signed.verify(),
            Err(ValidationError::PayloadHashMismatch)
        ));
    }

    #[test]
    fn test_wrong_thread_key_fails() {
        let k = keys();
        let outsider = Keypair::from_seed(&[0x99; 32]);
        let signed = BlockBuilder::new(k.thread, photo())
            .sign(&k.author, &outsider)
            .unwrap();
        assert!(matches!(
            signed.verify(),
            Err(ValidationError::BadSignature("thread"))
        ));
    }

    #[test]
    fn test_zero_signature_fails() {
        let k = keys();
        let mut signed = BlockBuilder::new(k.thread, photo())
            .sign(&k.author, &k.thread_kp)
            .unwrap();
        signed.author_signature = Ed25519Signature::ZERO;
        assert!(signed.verify().is_err());
    }

    #[test]
    fn test_merge_needs_two_parents() {
        let k = keys();
        let signed = BlockBuilder::new(k.thread, BlockPayload::Merge)
            .parent(BlockId::from_bytes([1; 32]))
            .sign(&k.author, &k.thread_kp)
            .unwrap();
        assert!(matches!(
            signed.verify(),
            Err(ValidationError::ParentCount { kind: BlockKind::Merge, count: 1 })
        ));
    }

    #[test]
    fn test_plain_block_single_parent() {
        let k = keys();
        let signed = BlockBuilder::new(k.thread, photo())
            .parents([BlockId::from_bytes([1; 32]), BlockId::from_bytes([2; 32])])
            .sign(&k.author, &k.thread_kp)
            .unwrap();
        assert!(signed.verify().is_err());
    }

    #[test]
    fn test_duplicate_parents_rejected() {
        let k = keys();
        let p = BlockId::from_bytes([1; 32]);
        let signed = BlockBuilder::new(k.thread, BlockPayload::Merge)
            .parents([p, p])
            .sign(&k.author, &k.thread_kp)
            .unwrap();
        assert!(matches!(
            signed.verify(),
            Err(ValidationError::DuplicateParent(_))
        ));
    }

    #[test]
    fn test_too_many_parents() {
        let k = keys();
        let parents = (0..=MAX_PARENTS as u8).map(|i| BlockId::from_bytes([i; 32]));
        let signed = BlockBuilder::new(k.thread, BlockPayload::Merge)
            .parents(parents)
            .sign(&k.author, &k.thread_kp)
            .unwrap();
        assert!(matches!(
            signed.verify(),
            Err(ValidationError::TooManyParents { .. })
        ));
    }

    #[test]
    fn test_untagged_ignore_rejected() {
        let k = keys();
        let signed = BlockBuilder::new(
            k.thread,
            BlockPayload::Ignore {
                data_id: "some-block".into(),
            },
        )
        .sign(&k.author, &k.thread_kp)
        .unwrap();
        assert!(matches!(
            signed.verify(),
            Err(ValidationError::InvalidIgnoreTarget(_))
        ));
    }

    #[test]
    fn test_roundtrip_then_verify() {
        let k = keys();
        let payload = BlockPayload::ignore(&BlockId::from_bytes([3; 32]));
        let signed = BlockBuilder::new(k.thread, payload)
            .parent(BlockId::from_bytes([4; 32]))
            .sign(&k.author, &k.thread_kp)
            .unwrap();
        let decoded = SignedBlock::from_bytes(&signed.to_bytes()).unwrap();
        assert!(decoded.verify().is_ok());
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_header_edits_break_signatures(
                date in any::<i64>(),
                shift in 1i64..1_000_000,
                parent in any::<[u8; 32]>(),
            ) {
                let k = keys();
                let signed = BlockBuilder::new(k.thread, photo())
                    .date(date)
                    .parent(BlockId::from_bytes(parent))
                    .sign(&k.author, &k.thread_kp)
                    .unwrap();
                prop_assert!(signed.verify().is_ok());

                let mut redated = signed.clone();
                redated.header.date = date.wrapping_add(shift);
                prop_assert!(matches!(
                    redated.verify(),
                    Err(ValidationError::BadSignature("author"))
                ));

                let mut reparented = signed;
                reparented.header.parents[0].0[0] ^= 0xff;
                prop_assert!(matches!(
                    reparented.verify(),
                    Err(ValidationError::BadSignature("author"))
                ));
            }
        }
    }
}
