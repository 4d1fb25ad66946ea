//! The wallet: one identity, the threads it belongs to, its linked devices
//! and the membership flows between them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use weft_core::{
    Block, BlockId, BlockKind, BlockPayload, Keypair, PeerId, StoredBlock, ThreadId,
    ValidationError,
};
use weft_net::Transport;
use weft_perms::{parse_link, InviteSecret, SymmetricKey};
use weft_store::{DeviceRow, Index, ObjectStore, ThreadRow};

use crate::backfill::fetch_object;
use crate::config::WalletConfig;
use crate::error::{Result, WeftError};
use crate::sealing::open_block;
use crate::thread::Thread;
use crate::updates::{Subscription, Update, UpdateBus, UpdateKind};

/// State every thread of a wallet shares.
pub(crate) struct Shared {
    pub identity: Keypair,
    pub objects: Arc<dyn ObjectStore>,
    pub index: Arc<dyn Index>,
    pub transport: Arc<dyn Transport>,
    pub config: WalletConfig,
    pub updates: UpdateBus<Update>,
    closed: AtomicBool,
}

impl Shared {
    pub fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(WeftError::Closed);
        }
        Ok(())
    }
}

/// A local identity and its thread replicas.
pub struct Wallet {
    shared: Arc<Shared>,
    threads: RwLock<HashMap<ThreadId, Arc<Thread>>>,
}

impl Wallet {
    /// Open a wallet over existing stores, reloading every persisted thread.
    pub async fn open(
        identity: Keypair,
        objects: Arc<dyn ObjectStore>,
        index: Arc<dyn Index>,
        transport: Arc<dyn Transport>,
        config: WalletConfig,
    ) -> Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            updates: UpdateBus::new(config.update_capacity),
            identity,
            objects,
            index,
            transport,
            config,
            closed: AtomicBool::new(false),
        });

        let mut threads = HashMap::new();
        for row in shared.index.list_threads().await? {
            let thread = Thread::from_row(Arc::clone(&shared), row)?;
            threads.insert(thread.id(), Arc::new(thread));
        }
        info!(
            peer = %shared.identity.public_key(),
            threads = threads.len(),
            "wallet opened"
        );

        Ok(Arc::new(Self {
            shared,
            threads: RwLock::new(threads),
        }))
    }

    /// Open a wallet over one store that serves as object store and index.
    pub async fn with_store<S>(
        identity: Keypair,
        store: Arc<S>,
        transport: Arc<dyn Transport>,
        config: WalletConfig,
    ) -> Result<Arc<Self>>
    where
        S: ObjectStore + Index + 'static,
    {
        let objects: Arc<dyn ObjectStore> = store.clone();
        let index: Arc<dyn Index> = store;
        Self::open(identity, objects, index, transport, config).await
    }

    pub fn peer_id(&self) -> PeerId {
        self.shared.identity.public_key()
    }

    pub fn config(&self) -> &WalletConfig {
        &self.shared.config
    }

    pub(crate) fn objects(&self) -> &dyn ObjectStore {
        self.shared.objects.as_ref()
    }

    pub fn subscribe(&self) -> Subscription<Update> {
        self.shared.updates.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.ensure_open().is_err()
    }

    /// Close the wallet. Every update stream ends and later operations
    /// fail with `Closed`.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for thread in self.threads.read().await.values() {
            thread.close();
        }
        self.shared.updates.close();
        info!(peer = %self.peer_id(), "wallet closed");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Threads
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new, empty thread signed by `keypair`.
    pub async fn add_thread(&self, name: &str, keypair: Keypair) -> Result<Arc<Thread>> {
        self.shared.ensure_open()?;
        let row = ThreadRow {
            id: ThreadId::from_public_key(&keypair.public_key()),
            name: name.to_owned(),
            seed: keypair.seed(),
            key: SymmetricKey::generate().as_bytes().to_vec(),
            head: None,
            tips: Vec::new(),
        };
        if self.threads.read().await.contains_key(&row.id) {
            return Err(WeftError::ThreadExists(row.id));
        }
        if !self.shared.index.insert_thread(&row).await?.is_inserted() {
            return Err(WeftError::ThreadExists(row.id));
        }

        let thread = self.register(row).await?;
        info!(thread = %thread.id(), name, "thread added");
        self.publish(thread.id().to_hex(), thread.name(), UpdateKind::ThreadAdded);
        self.invite_devices(&thread).await;
        Ok(thread)
    }

    /// Leave and forget a thread.
    ///
    /// The Leave block is best effort: the thread is removed locally even if
    /// it cannot be committed.
    pub async fn remove_thread(&self, id: &ThreadId) -> Result<()> {
        self.shared.ensure_open()?;
        let thread = self
            .threads
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(WeftError::ThreadNotFound(*id))?;

        if let Err(e) = thread.leave().await {
            warn!(thread = %id, error = %e, "could not announce leave");
        }
        self.drop_thread(id).await?;
        info!(thread = %id, "thread removed");
        self.publish(id.to_hex(), thread.name(), UpdateKind::ThreadRemoved);
        Ok(())
    }

    pub async fn thread(&self, id: &ThreadId) -> Option<Arc<Thread>> {
        self.threads.read().await.get(id).cloned()
    }

    pub async fn thread_by_name(&self, name: &str) -> Option<Arc<Thread>> {
        self.threads
            .read()
            .await
            .values()
            .find(|t| t.name() == name)
            .cloned()
    }

    /// All threads, ordered by name.
    pub async fn threads(&self) -> Vec<Arc<Thread>> {
        let mut threads: Vec<Arc<Thread>> = self.threads.read().await.values().cloned().collect();
        threads.sort_by(|a, b| a.name().cmp(b.name()).then(a.id().cmp(&b.id())));
        threads
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Membership
    // ─────────────────────────────────────────────────────────────────────────

    /// Accept a direct invite sealed for this wallet's identity.
    ///
    /// An empty `name` keeps the inviter's name for the thread.
    pub async fn accept_invite(&self, id: &BlockId, name: &str) -> Result<Arc<Thread>> {
        self.shared.ensure_open()?;
        let (bytes, stored, block) = self.load_invite(id, BlockKind::Invite).await?;
        let BlockPayload::Invite { recipient, sealed } = &block.payload else {
            return Err(not_an_invite(id));
        };
        if *recipient != self.peer_id() {
            return Err(WeftError::InvalidInvite(format!(
                "invite {} is addressed to {}",
                id, recipient
            )));
        }
        let secret = InviteSecret::open_sealed(sealed, &self.shared.identity)?;
        secret.check_thread(&stored.thread)?;
        self.join(secret, name, id, bytes, block.author()).await
    }

    /// Accept an external invite with the bearer key from its link.
    pub async fn accept_external_invite(
        &self,
        id: &BlockId,
        key: &[u8],
        name: &str,
    ) -> Result<Arc<Thread>> {
        self.shared.ensure_open()?;
        let (bytes, stored, block) = self.load_invite(id, BlockKind::ExternalInvite).await?;
        let BlockPayload::ExternalInvite { locked } = &block.payload else {
            return Err(not_an_invite(id));
        };
        let secret = InviteSecret::unlock(locked, key)?;
        secret.check_thread(&stored.thread)?;
        self.join(secret, name, id, bytes, block.author()).await
    }

    /// Parse an external invite link and accept it.
    pub async fn accept_link(&self, link: &str) -> Result<Arc<Thread>> {
        let link = parse_link(link)?;
        self.accept_external_invite(&link.id, &link.key, &link.name)
            .await
    }

    /// Fetch an invite block from the local store or any connected peer.
    async fn load_invite(
        &self,
        id: &BlockId,
        kind: BlockKind,
    ) -> Result<(Bytes, StoredBlock, Block)> {
        let candidates = self.shared.transport.connected_peers().await?;
        let bytes = fetch_object(&self.shared, id, &candidates).await?;
        let stored = StoredBlock::from_bytes(&bytes).map_err(ValidationError::from)?;
        if stored.kind != kind {
            return Err(not_an_invite(id));
        }
        let (_, block) = open_block(&stored, None)?;
        Ok((bytes, stored, block))
    }

    /// Create the local replica for an opened invite, backfill its history
    /// and announce ourselves with a Join block.
    async fn join(
        &self,
        secret: InviteSecret,
        name: &str,
        invite: &BlockId,
        bytes: Bytes,
        inviter: &PeerId,
    ) -> Result<Arc<Thread>> {
        let id = secret.thread_id();
        if let Some(existing) = self.thread(&id).await {
            debug!(thread = %id, "invite for a thread already held");
            return Ok(existing);
        }

        let row = ThreadRow {
            id,
            name: if name.is_empty() {
                secret.name.clone()
            } else {
                name.to_owned()
            },
            seed: secret.thread_seed,
            key: secret.key.as_bytes().to_vec(),
            head: None,
            tips: Vec::new(),
        };
        if !self.shared.index.insert_thread(&row).await?.is_inserted() {
            return match self.thread(&id).await {
                Some(existing) => Ok(existing),
                None => Err(WeftError::ThreadExists(id)),
            };
        }
        let thread = self.register(row).await?;

        if let Err(e) = self.replicate(&thread, &secret, invite, &bytes, inviter).await {
            warn!(thread = %id, invite = %invite, error = %e, "accepting invite failed");
            if let Err(cleanup) = self.drop_thread(&id).await {
                warn!(thread = %id, error = %cleanup, "could not remove partial thread");
            }
            return Err(e);
        }

        info!(thread = %id, name = thread.name(), "joined thread");
        self.publish(id.to_hex(), thread.name(), UpdateKind::ThreadAdded);
        self.invite_devices(&thread).await;
        Ok(thread)
    }

    async fn replicate(
        &self,
        thread: &Thread,
        secret: &InviteSecret,
        invite: &BlockId,
        bytes: &[u8],
        inviter: &PeerId,
    ) -> Result<()> {
        let local = self.peer_id();
        for peer in secret.peers.iter().filter(|p| **p != local) {
            self.shared.index.insert_peer(&thread.id(), peer).await?;
        }
        thread.handle_block(Some(inviter), bytes, true).await?;
        thread.handle_head(invite, &[], true).await?;
        thread.join(*invite).await?;
        Ok(())
    }

    /// Take in a direct invite pushed for a thread this wallet does not hold.
    ///
    /// The invite is kept and announced. Invites authored by one of our own
    /// devices are accepted straight away.
    pub(crate) async fn receive_invite(&self, from: &PeerId, bytes: &[u8]) -> Result<BlockId> {
        self.shared.ensure_open()?;
        let stored = StoredBlock::from_bytes(bytes).map_err(ValidationError::from)?;
        let id = BlockId::of(bytes);
        if stored.kind != BlockKind::Invite {
            return Err(not_an_invite(&id));
        }
        let (_, block) = open_block(&stored, None)?;
        let BlockPayload::Invite { recipient, sealed } = &block.payload else {
            return Err(not_an_invite(&id));
        };
        if *recipient != self.peer_id() {
            return Err(WeftError::InvalidInvite(format!(
                "invite {} is addressed to {}",
                id, recipient
            )));
        }
        let secret = InviteSecret::open_sealed(sealed, &self.shared.identity)?;
        secret.check_thread(&stored.thread)?;

        self.shared.objects.put(Bytes::copy_from_slice(bytes)).await?;
        self.shared.objects.pin(&id).await?;
        info!(invite = %id, from = %from, thread = %stored.thread, "invite received");
        self.publish(id.to_hex(), &secret.name, UpdateKind::InviteReceived);

        if self.shared.index.get_device(block.author()).await?.is_some() {
            debug!(invite = %id, "invite from own device, accepting");
            self.accept_invite(&id, &secret.name).await?;
        }
        Ok(id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────────

    /// Link another device of this user and invite it into every thread.
    ///
    /// The invites are sent one thread at a time after the device is
    /// recorded. A failed invite is logged and does not undo the link.
    pub async fn add_device(&self, name: &str, id: PeerId) -> Result<()> {
        self.shared.ensure_open()?;
        if id == self.peer_id() {
            return Err(
                ValidationError::Malformed("a wallet cannot be its own device".into()).into(),
            );
        }
        let row = DeviceRow {
            id,
            name: name.to_owned(),
        };
        if !self.shared.index.insert_device(&row).await?.is_inserted() {
            debug!(device = %id, "device already linked");
            return Ok(());
        }
        info!(device = %id, name, "device added");

        for thread in self.threads().await {
            if let Err(e) = thread.add_invite(&id).await {
                warn!(thread = %thread.id(), device = %id, error = %e, "could not invite device");
            }
        }
        self.publish(id.to_hex(), name, UpdateKind::DeviceAdded);
        Ok(())
    }

    /// Invite every linked device that is not yet a member of `thread`.
    ///
    /// Failures are logged; the thread stays usable either way.
    async fn invite_devices(&self, thread: &Thread) {
        let devices = match self.shared.index.list_devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(thread = %thread.id(), error = %e, "could not list devices to invite");
                return;
            }
        };
        if devices.is_empty() {
            return;
        }
        let members = match thread.peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(thread = %thread.id(), error = %e, "could not list members");
                return;
            }
        };
        for device in devices.iter().filter(|d| !members.contains(&d.id)) {
            if let Err(e) = thread.add_invite(&device.id).await {
                warn!(
                    thread = %thread.id(),
                    device = %device.id,
                    error = %e,
                    "could not invite device"
                );
            }
        }
    }

    /// Unlink a device. Key material it already holds is not revoked.
    pub async fn remove_device(&self, id: &PeerId) -> Result<()> {
        self.shared.ensure_open()?;
        let row = self
            .shared
            .index
            .get_device(id)
            .await?
            .ok_or_else(|| WeftError::DeviceNotFound(id.to_hex()))?;
        self.shared.index.delete_device(id).await?;
        info!(device = %id, "device removed");
        self.publish(id.to_hex(), &row.name, UpdateKind::DeviceRemoved);
        Ok(())
    }

    pub async fn devices(&self) -> Result<Vec<DeviceRow>> {
        Ok(self.shared.index.list_devices().await?)
    }

    /// Put a thread in the registry. If another task registered the same
    /// id first, that thread wins.
    async fn register(&self, row: ThreadRow) -> Result<Arc<Thread>> {
        let thread = Arc::new(Thread::from_row(Arc::clone(&self.shared), row)?);
        let mut threads = self.threads.write().await;
        Ok(Arc::clone(threads.entry(thread.id()).or_insert(thread)))
    }

    async fn drop_thread(&self, id: &ThreadId) -> Result<()> {
        if let Some(thread) = self.threads.write().await.remove(id) {
            thread.close();
        }
        self.shared.index.delete_thread(id).await?;
        Ok(())
    }

    fn publish(&self, id: String, name: &str, kind: UpdateKind) {
        self.shared.updates.publish(Update {
            id,
            name: name.to_owned(),
            kind,
        });
    }
}

fn not_an_invite(id: &BlockId) -> WeftError {
    WeftError::InvalidInvite(format!("block {} is not an invite of the expected kind", id))
}
