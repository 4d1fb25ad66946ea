//! Test fixtures and helpers.
//!
//! Multi-node setups over the in-memory network, plus a forge for crafting
//! blocks outside any wallet.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use weft::sealing::{open_block, seal_block};
use weft::{serve, Thread, Wallet, WalletConfig};
use weft_core::{
    BlockBuilder, BlockId, BlockPayload, Keypair, PeerId, SignedBlock, StoredBlock, ThreadId,
};
use weft_net::MemoryNetwork;
use weft_perms::{InviteLink, InviteSecret};
use weft_store::{Index, MemoryStore, ObjectStore};

/// How long [`eventually`] waits before giving up.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Wallet settings that fail fast in tests.
pub fn test_config() -> WalletConfig {
    WalletConfig {
        request_timeout_ms: 1_000,
        fetch_retries: 1,
        post_timeout_ms: 1_000,
        ..WalletConfig::default()
    }
}

/// Poll `check` until it holds or [`SETTLE_TIMEOUT`] passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Give spawned pushes a chance to run, for example before healing a cut.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// A shared in-memory network that nodes attach to.
pub struct TestNetwork {
    pub network: Arc<MemoryNetwork>,
    config: WalletConfig,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: WalletConfig) -> Self {
        init_tracing();
        Self {
            network: MemoryNetwork::new(),
            config,
        }
    }

    /// Attach a node with a random identity and a fresh memory store.
    pub async fn node(&self) -> TestNode {
        self.node_with(Keypair::generate(), Arc::new(MemoryStore::new()))
            .await
    }

    /// Attach a node with a given identity and store.
    pub async fn node_with<S>(&self, identity: Keypair, store: Arc<S>) -> TestNode
    where
        S: ObjectStore + Index + 'static,
    {
        let (transport, incoming) = self
            .network
            .create_transport(identity.public_key())
            .await;
        let wallet = Wallet::with_store(
            identity.clone(),
            Arc::clone(&store),
            Arc::new(transport),
            self.config.clone(),
        )
        .await
        .expect("open wallet");
        let server = serve(Arc::clone(&wallet), incoming);
        TestNode {
            identity,
            store,
            wallet,
            server,
        }
    }

    /// Sever the link between two nodes.
    pub async fn cut(&self, a: &TestNode, b: &TestNode) {
        self.network.cut(&a.peer_id(), &b.peer_id()).await;
    }

    pub async fn heal(&self, a: &TestNode, b: &TestNode) {
        self.network.heal(&a.peer_id(), &b.peer_id()).await;
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One wallet served on a [`TestNetwork`].
pub struct TestNode {
    pub identity: Keypair,
    pub store: Arc<dyn ObjectStore>,
    pub wallet: Arc<Wallet>,
    server: JoinHandle<()>,
}

impl TestNode {
    pub fn peer_id(&self) -> PeerId {
        self.identity.public_key()
    }

    /// This node's replica of `id`. Panics if it has none.
    pub async fn thread(&self, id: &ThreadId) -> Arc<Thread> {
        self.wallet
            .thread(id)
            .await
            .unwrap_or_else(|| panic!("node {} has no thread {}", self.peer_id(), id))
    }

    /// Whether this node has applied block `id` of `thread`.
    pub async fn has_block(&self, thread: &ThreadId, id: &BlockId) -> bool {
        match self.wallet.thread(thread).await {
            Some(t) => t.get_block(id).await.is_ok(),
            None => false,
        }
    }

    /// Stop serving. The wallet stays usable for local calls.
    pub fn stop(&self) {
        self.server.abort();
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Create a thread on `nodes[0]` and bring every other node in through a
/// direct invite, one at a time. Returns once all replicas agree on the
/// head and know each other as peers.
pub async fn shared_thread(nodes: &[&TestNode], name: &str) -> ThreadId {
    let creator = nodes[0];
    let thread = creator
        .wallet
        .add_thread(name, Keypair::generate())
        .await
        .expect("add thread");
    let id = thread.id();

    for node in &nodes[1..] {
        let invite = thread
            .add_invite(&node.peer_id())
            .await
            .expect("add invite");
        let joined = node
            .wallet
            .accept_invite(&invite, "")
            .await
            .expect("accept invite");

        let (creator_thread, joined, peer) = (&thread, &joined, node.peer_id());
        let settled = eventually(move || async move {
            let knows = creator_thread
                .peers()
                .await
                .map(|p| p.contains(&peer))
                .unwrap_or(false);
            knows && creator_thread.head().await == joined.head().await
        })
        .await;
        assert!(settled, "creator never saw {} join", peer);
    }

    let expected_peers = nodes.len() - 1;
    let settled =
        eventually(move || async move { converged(nodes, &id, expected_peers).await }).await;
    assert!(settled, "thread {} did not converge", id);
    id
}

/// Whether every node has the same head for `thread` and `peers` peers.
pub async fn converged(nodes: &[&TestNode], thread: &ThreadId, peers: usize) -> bool {
    let mut heads = Vec::with_capacity(nodes.len());
    for node in nodes {
        let Some(t) = node.wallet.thread(thread).await else {
            return false;
        };
        if t.peers().await.map(|p| p.len()).unwrap_or(0) != peers {
            return false;
        }
        heads.push(t.head().await);
    }
    heads.windows(2).all(|w| w[0] == w[1])
}

/// Walk back from `thread`'s head and check every ancestor is applied.
pub async fn ancestors_complete(node: &TestNode, thread: &ThreadId) -> bool {
    let t = node.thread(thread).await;
    let mut stack: Vec<BlockId> = t.head().await.into_iter().collect();
    stack.extend(t.tips().await);
    let mut seen = std::collections::HashSet::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        match t.get_block(&id).await {
            Ok(block) => stack.extend(block.parents().iter().copied()),
            Err(_) => return false,
        }
    }
    true
}

/// Recover a thread's secret the way any holder of an invite link can.
pub async fn secret_from_link(node: &TestNode, link: &InviteLink) -> InviteSecret {
    let bytes = node
        .store
        .get(&link.id)
        .await
        .expect("read store")
        .expect("invite block stored");
    let stored = StoredBlock::from_bytes(&bytes).expect("decode stored block");
    let (_, block) = open_block(&stored, None).expect("open invite");
    match block.payload {
        BlockPayload::ExternalInvite { locked } => {
            InviteSecret::unlock(&locked, &link.key).expect("unlock invite")
        }
        other => panic!("not an external invite: {:?}", other.kind()),
    }
}

/// Crafts stored blocks for a thread from its secret, outside any wallet.
pub struct BlockForge {
    pub secret: InviteSecret,
    pub author: Keypair,
}

impl BlockForge {
    pub fn new(secret: InviteSecret, author: Keypair) -> Self {
        Self { secret, author }
    }

    pub fn thread_id(&self) -> ThreadId {
        self.secret.thread_id()
    }

    /// A valid block, ready to deliver.
    pub fn block(&self, payload: BlockPayload, parents: &[BlockId]) -> (BlockId, Bytes) {
        self.seal(&self.sign(payload, parents))
    }

    /// A block whose author signature does not verify.
    pub fn forged(&self, payload: BlockPayload, parents: &[BlockId]) -> (BlockId, Bytes) {
        let mut signed = self.sign(payload, parents);
        signed.author_signature.0[0] ^= 0x01;
        self.seal(&signed)
    }

    fn sign(&self, payload: BlockPayload, parents: &[BlockId]) -> SignedBlock {
        BlockBuilder::new(self.thread_id(), payload)
            .date(now_millis())
            .parents(parents.iter().copied())
            .sign(&self.author, &self.secret.thread_keypair())
            .expect("sign block")
    }

    fn seal(&self, signed: &SignedBlock) -> (BlockId, Bytes) {
        let stored = seal_block(signed, &self.secret.key).expect("seal block");
        let bytes = Bytes::from(stored.to_bytes());
        (BlockId::of(&bytes), bytes)
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
