//! Index failures during commit and apply leave no partial state behind.

use std::sync::Arc;

use weft::core::{Keypair, PhotoMetadata};
use weft::store::Index;
use weft::ErrorKind;
use weft_testkit::{eventually, settle, shared_thread, FaultyStore, TestNetwork};

#[tokio::test]
async fn test_failed_commit_leaves_no_trace() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let store = Arc::new(FaultyStore::new());
    let node = net.node_with(Keypair::generate(), Arc::clone(&store)).await;
    let thread = node.wallet.add_thread("album", Keypair::generate()).await?;
    let first = thread
        .add_photo("media-1", "", PhotoMetadata::default())
        .await?;
    let mut updates = thread.subscribe();

    store.fail_writes(true);
    let err = thread
        .add_photo("media-2", "", PhotoMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    assert_eq!(thread.head().await, Some(first));
    assert_eq!(thread.blocks(None, &Default::default()).await?.len(), 1);
    assert_eq!(thread.photos(&Default::default()).await?.len(), 1);
    let row = store.get_thread(&thread.id()).await?.expect("thread row");
    assert_eq!(row.head, Some(first));
    assert!(updates.try_recv().is_none());

    // The next commit still builds on the last good head.
    store.fail_writes(false);
    let next = thread
        .add_photo("media-3", "", PhotoMetadata::default())
        .await?;
    assert_eq!(thread.get_block(&next).await?.parents(), &[first]);
    assert_eq!(thread.photos(&Default::default()).await?.len(), 2);
    assert_eq!(updates.try_recv().map(|u| u.block), Some(next));
    Ok(())
}

#[tokio::test]
async fn test_failed_apply_is_retried_cleanly() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let a = net.node().await;
    let store = Arc::new(FaultyStore::new());
    let b = net.node_with(Keypair::generate(), Arc::clone(&store)).await;
    let id = shared_thread(&[&a, &b], "roll").await;
    let replica = b.thread(&id).await;
    let before = replica.head().await;

    store.fail_writes(true);
    let photo = a
        .thread(&id)
        .await
        .add_photo("media", "", PhotoMetadata::default())
        .await?;
    settle().await;

    assert!(!b.has_block(&id, &photo).await);
    assert_eq!(replica.head().await, before);
    assert!(replica.photos(&Default::default()).await?.is_empty());

    store.fail_writes(false);
    a.thread(&id).await.post_head().await?;
    let replica_ref = &replica;
    assert!(eventually(move || async move { replica_ref.head().await == Some(photo) }).await);
    assert_eq!(replica.photos(&Default::default()).await?.len(), 1);
    Ok(())
}
