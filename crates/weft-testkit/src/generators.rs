//! Proptest generators for property-based testing.

use proptest::prelude::*;

use weft::sealing::seal_block;
use weft_core::{
    BlockBuilder, BlockId, BlockPayload, Ed25519PublicKey, Keypair, PhotoMetadata, PhotoPayload,
    SignedBlock, StoredBlock, ThreadId,
};
use weft_perms::{SymmetricKey, KEY_LEN};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random BlockId.
pub fn block_id() -> impl Strategy<Value = BlockId> {
    any::<[u8; 32]>().prop_map(BlockId)
}

/// Generate a random ThreadId.
pub fn thread_id() -> impl Strategy<Value = ThreadId> {
    any::<[u8; 32]>().prop_map(ThreadId)
}

/// Generate a random Ed25519PublicKey.
pub fn public_key() -> impl Strategy<Value = Ed25519PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate raw key material of the cipher's key length.
pub fn key_bytes() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), KEY_LEN)
}

/// Generate a thread key.
pub fn symmetric_key() -> impl Strategy<Value = SymmetricKey> {
    any::<([u8; 32], [u8; 12])>().prop_map(|(a, b)| {
        let mut bytes = [0u8; KEY_LEN];
        bytes[..32].copy_from_slice(&a);
        bytes[32..].copy_from_slice(&b);
        SymmetricKey::from_bytes(bytes)
    })
}

/// Generate a reasonable timestamp.
pub fn date() -> impl Strategy<Value = i64> {
    0i64..=1_900_000_000_000i64
}

/// Generate a thread name.
pub fn thread_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9 -]{0,31}".prop_map(String::from)
}

/// Generate plaintext bytes of specified max length.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

pub fn photo_metadata() -> impl Strategy<Value = PhotoMetadata> {
    ("[a-z]{1,12}", "(jpg|png|heic)", 0u32..8192, 0u32..8192, date()).prop_map(
        |(name, ext, width, height, added)| PhotoMetadata {
            name,
            ext,
            width,
            height,
            added,
        },
    )
}

pub fn photo_payload() -> impl Strategy<Value = PhotoPayload> {
    ("[A-Za-z0-9]{8,46}", ".{0,64}", photo_metadata()).prop_map(
        |(data_id, caption, metadata)| PhotoPayload {
            data_id,
            caption,
            metadata,
        },
    )
}

/// Payloads valid for a single-parent block.
pub fn linear_payload() -> impl Strategy<Value = BlockPayload> {
    prop_oneof![
        photo_payload().prop_map(BlockPayload::Photo),
        block_id().prop_map(|id| BlockPayload::ignore(&id)),
        proptest::option::of(block_id()).prop_map(|invite| BlockPayload::Join { invite }),
        Just(BlockPayload::Leave),
    ]
}

/// Parameters for generating a block.
#[derive(Debug, Clone)]
pub struct BlockParams {
    pub author: Keypair,
    pub thread: Keypair,
    pub payload: BlockPayload,
    pub date: i64,
    pub parent: Option<BlockId>,
}

impl Arbitrary for BlockParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            keypair(),
            keypair(),
            linear_payload(),
            date(),
            proptest::option::of(block_id()),
        )
            .prop_map(|(author, thread, payload, date, parent)| BlockParams {
                author,
                thread,
                payload,
                date,
                parent,
            })
            .boxed()
    }
}

impl BlockParams {
    pub fn thread_id(&self) -> ThreadId {
        ThreadId::from_public_key(&self.thread.public_key())
    }
}

/// Sign a block from parameters.
pub fn block_from_params(params: &BlockParams) -> SignedBlock {
    BlockBuilder::new(params.thread_id(), params.payload.clone())
        .date(params.date)
        .parents(params.parent)
        .sign(&params.author, &params.thread)
        .expect("generated parameters are valid")
}

/// Sign and seal a block from parameters.
pub fn stored_from_params(params: &BlockParams, key: &SymmetricKey) -> StoredBlock {
    seal_block(&block_from_params(params), key).expect("seal generated block")
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft::sealing::open_block;
    use weft_core::canonical_header_bytes;
    use weft_perms::{build_link, parse_link};

    proptest! {
        #[test]
        fn test_generated_blocks_verify(params: BlockParams) {
            let block = block_from_params(&params);
            let opened = block.verify().unwrap();

            prop_assert_eq!(&opened.payload, &params.payload);
            prop_assert_eq!(*opened.author(), params.author.public_key());
            let parents: Vec<BlockId> = params.parent.into_iter().collect();
            prop_assert_eq!(opened.parents().to_vec(), parents);
        }

        #[test]
        fn test_canonical_header_deterministic(params: BlockParams) {
            let b1 = block_from_params(&params);
            let b2 = block_from_params(&params);

            prop_assert_eq!(
                canonical_header_bytes(&b1.header),
                canonical_header_bytes(&b2.header)
            );
            prop_assert_eq!(b1.author_signature, b2.author_signature);
        }

        #[test]
        fn test_sealed_blocks_open_under_thread_key(
            params: BlockParams,
            key in symmetric_key(),
        ) {
            let stored = stored_from_params(&params, &key);
            prop_assert_eq!(stored.is_encrypted(), params.payload.kind().is_thread_encrypted());

            let decoded = StoredBlock::from_bytes(&stored.to_bytes()).unwrap();
            let (signed, block) = open_block(&decoded, Some(&key)).unwrap();
            prop_assert_eq!(signed, block_from_params(&params));
            prop_assert_eq!(&block.payload, &params.payload);
        }

        #[test]
        fn test_sealed_blocks_reject_other_keys(
            params: BlockParams,
            key in symmetric_key(),
            other in symmetric_key(),
        ) {
            prop_assume!(key != other);
            let stored = stored_from_params(&params, &key);
            prop_assert!(open_block(&stored, Some(&other)).is_err());
        }

        #[test]
        fn test_links_parse_what_they_build(
            id in block_id(),
            key in key_bytes(),
            name in ".{0,40}",
        ) {
            let parsed = parse_link(&build_link(&id, &key, &name)).unwrap();
            prop_assert_eq!(parsed.id, id);
            prop_assert_eq!(parsed.key, key);
            prop_assert_eq!(parsed.name, name);
        }

        #[test]
        fn test_ciphertext_differs_per_key(
            data in plaintext(256),
            key in symmetric_key(),
            other in symmetric_key(),
        ) {
            prop_assume!(key != other);
            prop_assert_ne!(key.encrypt(&data).unwrap(), other.encrypt(&data).unwrap());
        }
    }
}
