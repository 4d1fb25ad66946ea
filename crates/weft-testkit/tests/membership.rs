//! Invites, invite links, leaving and device mirroring.

use weft::core::{BlockKind, Keypair, PhotoMetadata, ThreadId};
use weft::perms::SymmetricKey;
use weft::{ErrorKind, Subscription, Update, UpdateKind};
use weft_testkit::fixtures::SETTLE_TIMEOUT;
use weft_testkit::{ancestors_complete, eventually, settle, shared_thread, TestNetwork, TestNode};

async fn next_update(updates: &mut Subscription<Update>, kind: UpdateKind) -> Update {
    let wait = async {
        loop {
            match updates.recv().await {
                Some(update) if update.kind == kind => return update,
                Some(_) => continue,
                None => panic!("update stream closed while waiting for {:?}", kind),
            }
        }
    };
    tokio::time::timeout(SETTLE_TIMEOUT, wait)
        .await
        .unwrap_or_else(|_| panic!("no {:?} update in time", kind))
}

async fn knows_peer(node: &TestNode, thread: &ThreadId, peer: &Keypair) -> bool {
    match node.wallet.thread(thread).await {
        Some(t) => t
            .peers()
            .await
            .map(|p| p.contains(&peer.public_key()))
            .unwrap_or(false),
        None => false,
    }
}

#[tokio::test]
async fn test_direct_invite_is_announced_then_accepted() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (a, b) = (net.node().await, net.node().await);
    let mut updates = b.wallet.subscribe();

    let thread = a.wallet.add_thread("weekend", Keypair::generate()).await?;
    thread.add_photo("media", "", PhotoMetadata::default()).await?;
    let invite = thread.add_invite(&b.peer_id()).await?;

    let received = next_update(&mut updates, UpdateKind::InviteReceived).await;
    assert_eq!(received.id, invite.to_hex());
    assert_eq!(received.name, "weekend");
    assert!(b.wallet.threads().await.is_empty());

    let joined = b.wallet.accept_invite(&invite, "our weekend").await?;
    assert_eq!(joined.name(), "our weekend");
    assert_eq!(joined.id(), thread.id());
    assert_eq!(joined.peers().await?, vec![a.peer_id()]);
    assert_eq!(joined.photos(&Default::default()).await?.len(), 1);
    assert!(ancestors_complete(&b, &thread.id()).await);

    let added = next_update(&mut updates, UpdateKind::ThreadAdded).await;
    assert_eq!(added.id, thread.id().to_hex());

    let (a_ref, id, who) = (&a, thread.id(), &b.identity);
    assert!(eventually(move || async move { knows_peer(a_ref, &id, who).await }).await);
    Ok(())
}

#[tokio::test]
async fn test_invite_for_someone_else_is_refused() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (a, b, c) = (net.node().await, net.node().await, net.node().await);

    let thread = a.wallet.add_thread("private", Keypair::generate()).await?;
    let invite = thread.add_invite(&b.peer_id()).await?;

    let err = c.wallet.accept_invite(&invite, "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(c.wallet.thread(&thread.id()).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_link_holder_joins_with_history() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (a, b) = (net.node().await, net.node().await);

    let thread = a.wallet.add_thread("Holiday 2024", Keypair::generate()).await?;
    for i in 0..2 {
        thread
            .add_photo(format!("media-{}", i), "", PhotoMetadata::default())
            .await?;
    }
    let link = thread.add_external_invite().await?;
    assert_eq!(link.name, "Holiday 2024");

    let joined = b.wallet.accept_link(&link.to_link()).await?;
    assert_eq!(joined.id(), thread.id());
    assert_eq!(joined.name(), "Holiday 2024");
    assert_eq!(joined.photos(&Default::default()).await?.len(), 2);
    assert!(ancestors_complete(&b, &thread.id()).await);

    let (a_ref, id, who) = (&a, thread.id(), &b.identity);
    assert!(eventually(move || async move { knows_peer(a_ref, &id, who).await }).await);
    let (thread_ref, joined_ref) = (&thread, &joined);
    assert!(
        eventually(move || async move { thread_ref.head().await == joined_ref.head().await })
            .await
    );
    Ok(())
}

#[tokio::test]
async fn test_bad_link_keys_are_refused() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (a, b) = (net.node().await, net.node().await);

    let thread = a.wallet.add_thread("album", Keypair::generate()).await?;
    let link = thread.add_external_invite().await?;

    let wrong = SymmetricKey::generate();
    let err = b
        .wallet
        .accept_external_invite(&link.id, wrong.as_bytes(), "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Crypto);

    let err = b
        .wallet
        .accept_external_invite(&link.id, &link.key[..8], "")
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = b.wallet.accept_link("weft://invite#garbage").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert!(b.wallet.threads().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unreachable_history_removes_partial_thread() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (a, b) = (net.node().await, net.node().await);
    let mut updates = b.wallet.subscribe();

    let thread = a.wallet.add_thread("album", Keypair::generate()).await?;
    let photo = thread.add_photo("media", "", PhotoMetadata::default()).await?;
    let invite = thread.add_invite(&b.peer_id()).await?;
    next_update(&mut updates, UpdateKind::InviteReceived).await;

    net.cut(&a, &b).await;
    let err = b.wallet.accept_invite(&invite, "").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Backfill);
    assert!(b.wallet.thread(&thread.id()).await.is_none());
    assert!(b.wallet.threads().await.is_empty());

    net.heal(&a, &b).await;
    let joined = b.wallet.accept_invite(&invite, "").await?;
    assert!(joined.get_block(&photo).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_leaving_drops_member_everywhere() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (a, b) = (net.node().await, net.node().await);
    let id = shared_thread(&[&a, &b], "club").await;
    let mut updates = b.wallet.subscribe();

    b.wallet.remove_thread(&id).await?;
    assert!(b.wallet.thread(&id).await.is_none());
    let removed = next_update(&mut updates, UpdateKind::ThreadRemoved).await;
    assert_eq!(removed.id, id.to_hex());
    assert_eq!(removed.name, "club");

    let (a_ref, who) = (&a, &b.identity);
    assert!(eventually(move || async move { !knows_peer(a_ref, &id, who).await }).await);
    assert!(a.thread(&id).await.peers().await?.is_empty());

    let err = b.wallet.remove_thread(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

#[tokio::test]
async fn test_linked_device_mirrors_every_thread() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (laptop, phone) = (net.node().await, net.node().await);

    let one = laptop.wallet.add_thread("one", Keypair::generate()).await?;
    let two = laptop.wallet.add_thread("two", Keypair::generate()).await?;
    let photo = two.add_photo("media", "", PhotoMetadata::default()).await?;

    // Each side must know the other before invites are taken on trust.
    phone.wallet.add_device("laptop", laptop.peer_id()).await?;
    let mut updates = laptop.wallet.subscribe();
    laptop.wallet.add_device("phone", phone.peer_id()).await?;

    let added = next_update(&mut updates, UpdateKind::DeviceAdded).await;
    assert_eq!(added.id, phone.peer_id().to_hex());
    let devices = laptop.wallet.devices().await?;
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "phone");

    let (phone_ref, ids) = (&phone, [one.id(), two.id()]);
    assert!(
        eventually(move || async move {
            for id in &ids {
                if phone_ref.wallet.thread(id).await.is_none() {
                    return false;
                }
            }
            true
        })
        .await
    );

    let names: Vec<String> = phone
        .wallet
        .threads()
        .await
        .iter()
        .map(|t| t.name().to_owned())
        .collect();
    assert_eq!(names, vec!["one", "two"]);
    assert!(phone.has_block(&two.id(), &photo).await);

    let (laptop_ref, who) = (&laptop, &phone.identity);
    assert!(
        eventually(move || async move {
            knows_peer(laptop_ref, &ids[0], who).await && knows_peer(laptop_ref, &ids[1], who).await
        })
        .await
    );
    Ok(())
}

#[tokio::test]
async fn test_threads_made_after_linking_reach_the_device() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (laptop, phone, friend) = (net.node().await, net.node().await, net.node().await);
    phone.wallet.add_device("laptop", laptop.peer_id()).await?;
    laptop.wallet.add_device("phone", phone.peer_id()).await?;

    // Created on the laptop after the devices were linked.
    let later = laptop.wallet.add_thread("later", Keypair::generate()).await?;
    let photo = later.add_photo("media", "", PhotoMetadata::default()).await?;

    // Joined by the laptop from someone else's invite.
    let shared = friend.wallet.add_thread("shared", Keypair::generate()).await?;
    let mut updates = laptop.wallet.subscribe();
    let invite = shared.add_invite(&laptop.peer_id()).await?;
    next_update(&mut updates, UpdateKind::InviteReceived).await;
    laptop.wallet.accept_invite(&invite, "").await?;

    let (phone_ref, ids) = (&phone, [later.id(), shared.id()]);
    assert!(
        eventually(move || async move {
            for id in &ids {
                if phone_ref.wallet.thread(id).await.is_none() {
                    return false;
                }
            }
            true
        })
        .await
    );
    let (phone_ref, later_id) = (&phone, later.id());
    assert!(
        eventually(move || async move { phone_ref.has_block(&later_id, &photo).await }).await
    );

    // The phone never invites the laptop back into threads it already holds.
    let inviters: Vec<_> = later
        .blocks(Some(BlockKind::Invite), &Default::default())
        .await?
        .into_iter()
        .map(|row| row.author)
        .collect();
    assert_eq!(inviters, vec![laptop.peer_id()]);
    Ok(())
}

#[tokio::test]
async fn test_invites_from_unlinked_wallets_wait_for_the_user() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (laptop, phone) = (net.node().await, net.node().await);
    let mut updates = phone.wallet.subscribe();

    laptop.wallet.add_thread("one", Keypair::generate()).await?;
    laptop.wallet.add_device("phone", phone.peer_id()).await?;

    next_update(&mut updates, UpdateKind::InviteReceived).await;
    settle().await;
    assert!(phone.wallet.threads().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_closed_wallet_stops_taking_blocks() -> anyhow::Result<()> {
    let net = TestNetwork::new();
    let (a, b) = (net.node().await, net.node().await);
    let id = shared_thread(&[&a, &b], "club").await;
    let mut updates = b.wallet.subscribe();
    let replica = b.thread(&id).await;
    let mut thread_updates = replica.subscribe();

    b.wallet.close().await;
    assert!(updates.recv().await.is_none());
    assert!(thread_updates.recv().await.is_none());

    let photo = a
        .thread(&id)
        .await
        .add_photo("media", "", PhotoMetadata::default())
        .await?;
    settle().await;
    assert!(!b.has_block(&id, &photo).await);

    let err = replica
        .add_photo("media", "", PhotoMetadata::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    Ok(())
}
