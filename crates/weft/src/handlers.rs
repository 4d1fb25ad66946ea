//! Per-kind side effects of applying a block.
//!
//! Every applied block gets a row in the block index. On top of that each
//! kind may touch other tables. Handlers only describe those rows; the
//! engine hands the resulting [`BlockWrite`] to the index in one call.
//! Dispatch is an exhaustive match, so a new kind does not compile until it
//! is handled here.

use tracing::debug;

use weft_core::{Block, BlockId, BlockPayload, PeerId};
use weft_store::{BlockRow, BlockWrite, PhotoRow};

/// The index row for an applied block.
pub fn block_row(id: &BlockId, block: &Block) -> BlockRow {
    BlockRow {
        id: *id,
        thread: block.header.thread,
        author: *block.author(),
        kind: block.kind(),
        date: block.header.date,
        parents: block.parents().to_vec(),
        data_id: block.payload.data_id().map(str::to_owned),
    }
}

/// Every index change `block` makes.
///
/// `local` is this wallet's identity; membership blocks never add or remove
/// it from its own peer list.
pub fn write(local: &PeerId, id: &BlockId, block: &Block) -> BlockWrite {
    let mut write = BlockWrite::new(block_row(id, block));
    let author = block.author();

    match &block.payload {
        BlockPayload::Photo(photo) => {
            write.photo = Some(PhotoRow {
                block: *id,
                thread: block.header.thread,
                data_id: photo.data_id.clone(),
                caption: photo.caption.clone(),
                metadata: photo.metadata.clone(),
                date: block.header.date,
            });
        }
        BlockPayload::Ignore { .. } => {
            // The block row's data id is what hides the target.
            debug!(block = %id, target = ?block.payload.ignore_target(), "ignore recorded");
        }
        BlockPayload::Invite { recipient, .. } => {
            debug!(block = %id, recipient = %recipient, "invite recorded");
        }
        BlockPayload::ExternalInvite { .. } => {
            debug!(block = %id, "external invite recorded");
        }
        BlockPayload::Join { .. } => {
            if author != local {
                debug!(thread = %block.header.thread, peer = %author, "peer joined");
                write.joined = Some(*author);
            }
        }
        BlockPayload::Leave => {
            if author != local {
                debug!(thread = %block.header.thread, peer = %author, "peer left");
                write.left = Some(*author);
            }
        }
        BlockPayload::Merge => {}
    }
    write
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{
        BlockBuilder, Keypair, PhotoMetadata, PhotoPayload, StoredBlock, ThreadId,
    };
    use weft_store::{Index, MemoryStore, Page};

    struct Fixture {
        thread_kp: Keypair,
        thread: ThreadId,
        index: MemoryStore,
    }

    fn fixture() -> Fixture {
        let thread_kp = Keypair::from_seed(&[0x33; 32]);
        Fixture {
            thread: ThreadId::from_public_key(&thread_kp.public_key()),
            thread_kp,
            index: MemoryStore::new(),
        }
    }

    fn build(f: &Fixture, author: &Keypair, payload: BlockPayload) -> (BlockId, Block) {
        let signed = BlockBuilder::new(f.thread, payload)
            .date(42)
            .sign(author, &f.thread_kp)
            .unwrap();
        let id = StoredBlock {
            version: 0,
            thread: f.thread,
            kind: signed.kind(),
            salt: None,
            body: signed.to_bytes().into(),
        }
        .id();
        (id, signed.verify().unwrap())
    }

    #[tokio::test]
    async fn test_photo_indexes_metadata() {
        let f = fixture();
        let author = Keypair::from_seed(&[1; 32]);
        let payload = BlockPayload::Photo(PhotoPayload {
            data_id: "media".into(),
            caption: "dunes".into(),
            metadata: PhotoMetadata {
                name: "dunes".into(),
                ext: "jpg".into(),
                width: 640,
                height: 480,
                added: 42,
            },
        });
        let (id, block) = build(&f, &author, payload);

        let rows = write(&author.public_key(), &id, &block);
        assert!(rows.joined.is_none());
        f.index.apply_block(&rows).await.unwrap();

        let photo = f.index.get_photo(&id).await.unwrap().unwrap();
        assert_eq!(photo.caption, "dunes");
        assert_eq!(photo.metadata.width, 640);
        assert_eq!(f.index.list_photos(&f.thread, &Page::default()).await.unwrap().len(), 1);
        assert_eq!(block_row(&id, &block).data_id.as_deref(), Some("media"));
    }

    #[tokio::test]
    async fn test_join_and_leave_update_peers() {
        let f = fixture();
        let local = Keypair::from_seed(&[1; 32]);
        let other = Keypair::from_seed(&[2; 32]);

        let (id, join) = build(&f, &other, BlockPayload::Join { invite: None });
        f.index
            .apply_block(&write(&local.public_key(), &id, &join))
            .await
            .unwrap();
        assert_eq!(
            f.index.list_peers(&f.thread).await.unwrap(),
            vec![other.public_key()]
        );

        let (id, leave) = build(&f, &other, BlockPayload::Leave);
        f.index
            .apply_block(&write(&local.public_key(), &id, &leave))
            .await
            .unwrap();
        assert!(f.index.list_peers(&f.thread).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_own_join_is_not_a_peer() {
        let f = fixture();
        let local = Keypair::from_seed(&[1; 32]);
        let (id, join) = build(&f, &local, BlockPayload::Join { invite: None });
        let rows = write(&local.public_key(), &id, &join);
        assert!(rows.joined.is_none());
        f.index.apply_block(&rows).await.unwrap();
        assert!(f.index.list_peers(&f.thread).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ignore_row_carries_target() {
        let f = fixture();
        let author = Keypair::from_seed(&[1; 32]);
        let target = BlockId::from_bytes([7; 32]);
        let (id, block) = build(&f, &author, BlockPayload::ignore(&target));

        let rows = write(&author.public_key(), &id, &block);
        assert!(rows.photo.is_none());
        assert_eq!(rows.block.data_id, Some(weft_store::ignore_key(&target)));
    }
}
