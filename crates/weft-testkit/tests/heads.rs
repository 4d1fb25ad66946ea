//! Head and tip bookkeeping on a single replica, driven with crafted blocks.

use weft::core::{BlockPayload, Keypair, PhotoMetadata, PhotoPayload};
use weft::store::ObjectStore;
use weft::ErrorKind;
use weft_testkit::{secret_from_link, BlockForge, TestNetwork};

fn photo(caption: &str) -> BlockPayload {
    BlockPayload::Photo(PhotoPayload {
        data_id: format!("media-{}", caption),
        caption: caption.into(),
        metadata: PhotoMetadata::default(),
    })
}

#[tokio::test]
async fn test_sibling_becomes_head_and_keeps_tip() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let node = net.node().await;
    let thread = node.wallet.add_thread("album", Keypair::generate()).await?;
    let link = thread.add_external_invite().await?;
    let root = link.id;
    let forge = BlockForge::new(secret_from_link(&node, &link).await, Keypair::generate());

    let (left, left_bytes) = forge.block(photo("left"), &[root]);
    let (right, right_bytes) = forge.block(photo("right"), &[root]);

    thread.add_block(None, &left_bytes).await?;
    assert_eq!(thread.head().await, Some(left));
    assert!(thread.tips().await.is_empty());

    thread.add_block(None, &right_bytes).await?;
    assert_eq!(thread.head().await, Some(right));
    assert_eq!(thread.tips().await, vec![left]);

    let merge = thread.merge().await?;
    let block = thread.get_block(&merge).await?;
    assert_eq!(block.parents(), &[right, left]);
    assert_eq!(thread.head().await, Some(merge));
    assert!(thread.tips().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_descendant_of_tip_clears_it() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let node = net.node().await;
    let thread = node.wallet.add_thread("album", Keypair::generate()).await?;
    let link = thread.add_external_invite().await?;
    let forge = BlockForge::new(secret_from_link(&node, &link).await, Keypair::generate());

    let (a, a_bytes) = forge.block(photo("a"), &[link.id]);
    let (b, b_bytes) = forge.block(photo("b"), &[link.id]);
    thread.add_block(None, &a_bytes).await?;
    thread.add_block(None, &b_bytes).await?;
    assert_eq!(thread.tips().await, vec![a]);

    // Built by someone who had already seen both branches.
    let (joined, joined_bytes) = forge.block(BlockPayload::Merge, &[a, b]);
    thread.add_block(None, &joined_bytes).await?;
    assert_eq!(thread.head().await, Some(joined));
    assert!(thread.tips().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_tip_behind_second_parent_is_cleared() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let node = net.node().await;
    let thread = node.wallet.add_thread("album", Keypair::generate()).await?;
    let link = thread.add_external_invite().await?;
    let forge = BlockForge::new(secret_from_link(&node, &link).await, Keypair::generate());

    let (left, left_bytes) = forge.block(photo("left"), &[link.id]);
    let (right, right_bytes) = forge.block(photo("right"), &[link.id]);
    thread.add_block(None, &left_bytes).await?;
    thread.add_block(None, &right_bytes).await?;
    assert_eq!(thread.tips().await, vec![left]);

    // Known here, but only as history.
    let (after_left, after_left_bytes) = forge.block(photo("after-left"), &[left]);
    thread.handle_block(None, &after_left_bytes, true).await?;
    assert_eq!(thread.tips().await, vec![left]);

    // Extends the head and reaches the tip through its other parent.
    let (joined, joined_bytes) = forge.block(BlockPayload::Merge, &[right, after_left]);
    thread.add_block(None, &joined_bytes).await?;
    assert_eq!(thread.head().await, Some(joined));
    assert!(thread.tips().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_late_ancestor_leaves_head_alone() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let node = net.node().await;
    let thread = node.wallet.add_thread("album", Keypair::generate()).await?;
    let link = thread.add_external_invite().await?;
    let forge = BlockForge::new(secret_from_link(&node, &link).await, Keypair::generate());

    let (first, first_bytes) = forge.block(photo("first"), &[link.id]);
    let (second, second_bytes) = forge.block(photo("second"), &[first]);

    thread.handle_block(None, &first_bytes, true).await?;
    thread.handle_block(None, &second_bytes, true).await?;
    assert_eq!(thread.head().await, Some(link.id));

    thread.handle_head(&second, &[first], false).await?;
    assert_eq!(thread.head().await, Some(second));

    // The older block's head update lands last.
    thread.handle_head(&first, &[link.id], false).await?;
    assert_eq!(thread.head().await, Some(second));
    assert!(thread.tips().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_ancestor_without_peers_is_backfill_error() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let node = net.node().await;
    let thread = node.wallet.add_thread("album", Keypair::generate()).await?;
    let link = thread.add_external_invite().await?;
    let forge = BlockForge::new(secret_from_link(&node, &link).await, Keypair::generate());

    let (lost, _) = forge.block(photo("lost"), &[link.id]);
    let (child, child_bytes) = forge.block(photo("child"), &[lost]);

    let err = thread.add_block(None, &child_bytes).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backfill);
    assert!(thread.get_block(&child).await.is_err());
    assert_eq!(thread.head().await, Some(link.id));
    Ok(())
}

#[tokio::test]
async fn test_forged_ancestor_rejects_descendant() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let node = net.node().await;
    let thread = node.wallet.add_thread("album", Keypair::generate()).await?;
    let link = thread.add_external_invite().await?;
    let forge = BlockForge::new(secret_from_link(&node, &link).await, Keypair::generate());

    let (forged, forged_bytes) = forge.forged(photo("forged"), &[link.id]);
    let (child, child_bytes) = forge.block(photo("child"), &[forged]);

    let err = thread.add_block(None, &forged_bytes).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    // Even when the bytes sit in the object store, they never verify.
    node.store.put(forged_bytes).await?;
    let err = thread.add_block(None, &child_bytes).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert!(thread.get_block(&forged).await.is_err());
    assert!(thread.get_block(&child).await.is_err());
    assert_eq!(thread.head().await, Some(link.id));
    Ok(())
}

#[tokio::test]
async fn test_reapplied_block_changes_nothing() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let node = net.node().await;
    let thread = node.wallet.add_thread("album", Keypair::generate()).await?;
    let link = thread.add_external_invite().await?;
    let forge = BlockForge::new(secret_from_link(&node, &link).await, Keypair::generate());

    let (id, bytes) = forge.block(photo("once"), &[link.id]);
    let mut updates = thread.subscribe();
    thread.add_block(None, &bytes).await?;
    let later = thread.add_photo("media-later", "later", PhotoMetadata::default()).await?;

    assert_eq!(thread.add_block(None, &bytes).await?, id);
    assert_eq!(thread.head().await, Some(later));
    assert_eq!(thread.photos(&Default::default()).await?.len(), 2);

    assert_eq!(updates.try_recv().map(|u| u.block), Some(id));
    assert_eq!(updates.try_recv().map(|u| u.block), Some(later));
    assert!(updates.try_recv().is_none());
    Ok(())
}
