//! A single thread: its head, its commit path and the application of
//! blocks received from peers.
//!
//! ## Head and tips
//!
//! The head is the block new local commits build on. When a block arrives
//! whose history does not contain the current head, both branches are kept:
//! the incoming block becomes the head and the old head is recorded as a
//! tip. [`Thread::merge`] commits a Merge block naming the head and every
//! tip, joining the branches again.
//!
//! ## Locking
//!
//! Each thread has one async mutex over its head state. Local commits hold
//! it from reading the head until the new head is persisted. Remote blocks
//! are fetched, verified and indexed without it and only take it to move the
//! head. Peer pushes always happen after the lock is released.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use weft_core::{
    Block, BlockBuilder, BlockId, BlockKind, BlockPayload, Keypair, PeerId, PhotoMetadata,
    PhotoPayload, ThreadId, MAX_PARENTS,
};
use weft_net::{Envelope, Message, NetError};
use weft_perms::{InviteLink, InviteSecret, SymmetricKey};
use weft_store::{BlockRow, HeadUpdate, Page, PhotoRow, ThreadRow};

use crate::backfill::{collect_ancestors, fetch_object};
use crate::error::{Result, WeftError};
use crate::handlers;
use crate::sealing::{decode_stored, open_block, seal_block};
use crate::updates::{Subscription, ThreadUpdate, UpdateBus};
use crate::wallet::Shared;

#[derive(Debug, Clone, Default)]
struct HeadState {
    head: Option<BlockId>,
    tips: Vec<BlockId>,
}

/// A thread replica owned by a wallet.
pub struct Thread {
    id: ThreadId,
    name: String,
    keypair: Keypair,
    key: SymmetricKey,
    shared: Arc<Shared>,
    state: Mutex<HeadState>,
    updates: UpdateBus<ThreadUpdate>,
}

impl Thread {
    pub(crate) fn from_row(shared: Arc<Shared>, row: ThreadRow) -> Result<Self> {
        let keypair = Keypair::from_seed(&row.seed);
        if ThreadId::from_public_key(&keypair.public_key()) != row.id {
            return Err(WeftError::InvalidInvite(format!(
                "seed does not belong to thread {}",
                row.id
            )));
        }
        let key = SymmetricKey::from_slice(&row.key)?;
        let updates = UpdateBus::new(shared.config.update_capacity);
        Ok(Self {
            id: row.id,
            name: row.name,
            keypair,
            key,
            shared,
            state: Mutex::new(HeadState {
                head: row.head,
                tips: row.tips,
            }),
            updates,
        })
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn head(&self) -> Option<BlockId> {
        self.state.lock().await.head
    }

    /// Branch heads that diverged from the head and are not merged yet.
    pub async fn tips(&self) -> Vec<BlockId> {
        self.state.lock().await.tips.clone()
    }

    pub async fn peers(&self) -> Result<Vec<PeerId>> {
        Ok(self.shared.index.list_peers(&self.id).await?)
    }

    /// Applied blocks, newest first. Ignored blocks are left out.
    pub async fn blocks(&self, kind: Option<BlockKind>, page: &Page) -> Result<Vec<BlockRow>> {
        Ok(self.shared.index.list_blocks(&self.id, kind, page).await?)
    }

    pub async fn photos(&self, page: &Page) -> Result<Vec<PhotoRow>> {
        Ok(self.shared.index.list_photos(&self.id, page).await?)
    }

    /// Load and open an applied block.
    pub async fn get_block(&self, id: &BlockId) -> Result<Block> {
        let row = self.shared.index.get_block(id).await?;
        if row.map(|r| r.thread) != Some(self.id) {
            return Err(WeftError::BlockNotFound(*id));
        }
        let bytes = self
            .shared
            .objects
            .get(id)
            .await?
            .ok_or(WeftError::BlockNotFound(*id))?;
        let stored = decode_stored(&bytes, &self.id)?;
        let (_, block) = open_block(&stored, Some(&self.key))?;
        Ok(block)
    }

    pub fn subscribe(&self) -> Subscription<ThreadUpdate> {
        self.updates.subscribe()
    }

    pub(crate) fn close(&self) {
        self.updates.close();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local commits
    // ─────────────────────────────────────────────────────────────────────────

    /// Commit a reference to externally stored media.
    pub async fn add_photo(
        &self,
        data_id: impl Into<String>,
        caption: impl Into<String>,
        metadata: PhotoMetadata,
    ) -> Result<BlockId> {
        self.commit(BlockPayload::Photo(PhotoPayload {
            data_id: data_id.into(),
            caption: caption.into(),
            metadata,
        }))
        .await
    }

    /// Hide an earlier block of this thread from listings.
    pub async fn ignore(&self, target: &BlockId) -> Result<BlockId> {
        match self.shared.index.get_block(target).await? {
            Some(row) if row.thread == self.id => {}
            _ => return Err(WeftError::BlockNotFound(*target)),
        }
        self.commit(BlockPayload::ignore(target)).await
    }

    /// Join the head and every tip with a Merge block.
    pub async fn merge(&self) -> Result<BlockId> {
        self.commit(BlockPayload::Merge).await
    }

    /// Announce that this member is leaving.
    pub async fn leave(&self) -> Result<BlockId> {
        self.commit(BlockPayload::Leave).await
    }

    /// Invite one identity by sealing the thread secret for its key.
    ///
    /// The invite is committed like any block and also pushed straight to
    /// the recipient, who is not a peer yet.
    pub async fn add_invite(&self, recipient: &PeerId) -> Result<BlockId> {
        let secret = self.invite_secret().await?;
        let sealed = secret.seal_for(recipient)?;
        let (id, bytes) = self
            .commit_inner(BlockPayload::Invite {
                recipient: *recipient,
                sealed,
            })
            .await?;
        info!(thread = %self.id, block = %id, recipient = %recipient, "invite added");

        let message = Message::Block {
            thread: self.id,
            kind: BlockKind::Invite,
            bytes,
        };
        spawn_post(Arc::clone(&self.shared), vec![*recipient], message);
        Ok(id)
    }

    /// Commit an invite anyone holding the returned link can accept.
    pub async fn add_external_invite(&self) -> Result<InviteLink> {
        let secret = self.invite_secret().await?;
        let unlock_key = SymmetricKey::generate();
        let locked = secret.lock(&unlock_key)?;
        let (id, _) = self
            .commit_inner(BlockPayload::ExternalInvite { locked })
            .await?;
        info!(thread = %self.id, block = %id, "external invite added");
        Ok(InviteLink {
            id,
            key: unlock_key.as_bytes().to_vec(),
            name: self.name.clone(),
        })
    }

    pub(crate) async fn join(&self, invite: BlockId) -> Result<BlockId> {
        self.commit(BlockPayload::Join {
            invite: Some(invite),
        })
        .await
    }

    async fn invite_secret(&self) -> Result<InviteSecret> {
        let mut peers = vec![self.shared.identity.public_key()];
        peers.extend(self.peers().await?);
        Ok(InviteSecret {
            thread_seed: self.keypair.seed(),
            key: self.key.clone(),
            name: self.name.clone(),
            peers,
        })
    }

    /// Append a block built on the current head and push it to all peers.
    pub async fn commit(&self, payload: BlockPayload) -> Result<BlockId> {
        let (id, _) = self.commit_inner(payload).await?;
        Ok(id)
    }

    async fn commit_inner(&self, payload: BlockPayload) -> Result<(BlockId, Bytes)> {
        self.shared.ensure_open()?;
        let kind = payload.kind();

        let (id, bytes, block) = {
            let mut state = self.state.lock().await;

            let mut parents: Vec<BlockId> = state.head.into_iter().collect();
            let mut tips = state.tips.clone();
            if kind == BlockKind::Merge {
                if tips.is_empty() {
                    return Err(WeftError::NothingToMerge(self.id));
                }
                let take = tips.len().min(MAX_PARENTS - parents.len());
                parents.extend(tips.drain(..take));
            }

            let signed = BlockBuilder::new(self.id, payload)
                .date(now_millis())
                .parents(parents)
                .sign(&self.shared.identity, &self.keypair)?;
            let block = signed.verify()?;
            let stored = seal_block(&signed, &self.key)?;
            let bytes = Bytes::from(stored.to_bytes());

            let id = self.shared.objects.put(bytes.clone()).await?;
            self.shared.objects.pin(&id).await?;
            let head = HeadUpdate {
                head: id,
                tips: tips.clone(),
            };
            self.index(&id, &block, None, Some(head)).await?;

            state.head = Some(id);
            state.tips = tips;
            (id, bytes, block)
        };

        debug!(thread = %self.id, block = %id, kind = kind.label(), "committed");
        self.notify(&id, &block);
        self.post(kind, bytes.clone()).await;
        Ok((id, bytes))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Blocks from peers
    // ─────────────────────────────────────────────────────────────────────────

    /// Apply a block pushed by a peer, then move the head.
    pub async fn add_block(&self, from: Option<&PeerId>, bytes: &[u8]) -> Result<BlockId> {
        self.handle_block(from, bytes, false).await
    }

    /// Verify and apply stored-block bytes.
    ///
    /// Missing ancestors are fetched and applied first. Applying a block that
    /// is already indexed is a no-op. With `following` set the head is left
    /// alone.
    pub async fn handle_block(
        &self,
        from: Option<&PeerId>,
        bytes: &[u8],
        following: bool,
    ) -> Result<BlockId> {
        self.shared.ensure_open()?;
        let id = BlockId::of(bytes);
        if self.shared.index.has_block(&id).await? {
            debug!(thread = %self.id, block = %id, "already applied");
            return Ok(id);
        }

        let stored = decode_stored(bytes, &self.id)?;
        let (_, block) = open_block(&stored, Some(&self.key)).map_err(|e| {
            warn!(thread = %self.id, block = %id, error = %e, "rejected block");
            e
        })?;

        let ancestors = collect_ancestors(
            &self.shared,
            &self.id,
            &self.key,
            from,
            block.parents(),
        )
        .await
        .map_err(|e| {
            warn!(thread = %self.id, block = %id, error = %e, "backfill failed");
            e
        })?;
        for ancestor in ancestors {
            self.apply(&ancestor.id, ancestor.bytes, &ancestor.block)
                .await?;
        }

        self.apply(&id, Bytes::copy_from_slice(bytes), &block).await?;
        if !following {
            self.handle_head(&id, block.parents(), false).await?;
        }
        Ok(id)
    }

    /// Store, index and announce one verified block whose parents are all
    /// indexed.
    async fn apply(&self, id: &BlockId, bytes: Bytes, block: &Block) -> Result<()> {
        let admit = self.admission(block).await?;
        self.shared.objects.put(bytes).await?;
        self.shared.objects.pin(id).await?;
        if self.index(id, block, admit, None).await? {
            if let Some(peer) = admit {
                info!(thread = %self.id, peer = %peer, "admitted new peer");
            }
            debug!(thread = %self.id, block = %id, kind = block.kind().label(), "applied");
            self.notify(id, block);
        } else {
            debug!(thread = %self.id, block = %id, "applied concurrently");
        }
        Ok(())
    }

    /// The author to admit on first contact, if any.
    ///
    /// Two blocks from a new author may race here; both admit it and the
    /// index keeps one row.
    async fn admission(&self, block: &Block) -> Result<Option<PeerId>> {
        let author = block.author();
        if *author == self.shared.identity.public_key() || block.kind() == BlockKind::Leave {
            return Ok(None);
        }
        let peers = self.shared.index.list_peers(&self.id).await?;
        Ok((!peers.contains(author)).then_some(*author))
    }

    /// Write the block's rows, an admitted author and an optional head move
    /// in one index call. Returns whether the block row is new.
    async fn index(
        &self,
        id: &BlockId,
        block: &Block,
        admit: Option<PeerId>,
        head: Option<HeadUpdate>,
    ) -> Result<bool> {
        let local = self.shared.identity.public_key();
        let mut write = handlers::write(&local, id, block);
        if write.joined.is_none() {
            write.joined = admit;
        }
        write.head = head;
        let inserted = self.shared.index.apply_block(&write).await?;
        Ok(inserted.is_inserted())
    }

    /// Move the head for an applied block.
    ///
    /// A block that descends from the head fast-forwards it. Any other block
    /// still becomes the head, and the old head is kept as a tip until a
    /// merge. `force` sets the head unconditionally.
    pub async fn handle_head(&self, id: &BlockId, parents: &[BlockId], force: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();

        match state.head {
            Some(head) if head == *id => return Ok(()),
            Some(head) if !force => {
                let mut known = state.tips.clone();
                known.push(head);
                // Arrived after one of its descendants.
                if !parents.contains(&head) && !self.reachable(&known, &[*id]).await?.is_empty() {
                    debug!(thread = %self.id, block = %id, "block is behind the head");
                    return Ok(());
                }
                let covered = self.reachable(parents, &known).await?;

                next.tips.retain(|t| !covered.contains(t) && t != id);
                if !covered.contains(&head) {
                    warn!(
                        thread = %self.id,
                        head = %head,
                        incoming = %id,
                        "divergent head, keeping both branches"
                    );
                    next.tips.push(head);
                }
            }
            _ => next.tips.retain(|t| t != id),
        }
        next.head = Some(*id);

        self.shared
            .index
            .update_head(&self.id, next.head.as_ref(), &next.tips)
            .await?;
        *state = next;
        Ok(())
    }

    /// Which of `targets` are ancestors of (or equal to) `from`.
    async fn reachable(&self, from: &[BlockId], targets: &[BlockId]) -> Result<HashSet<BlockId>> {
        let mut found = HashSet::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<BlockId> = from.to_vec();
        let limit = self.shared.config.max_backfill;

        while let Some(id) = stack.pop() {
            if found.len() == targets.len() || seen.len() >= limit {
                break;
            }
            if !seen.insert(id) {
                continue;
            }
            if targets.contains(&id) {
                found.insert(id);
            }
            if let Some(row) = self.shared.index.get_block(&id).await? {
                stack.extend(row.parents.iter().filter(|p| !seen.contains(*p)));
            }
        }
        Ok(found)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Peers
    // ─────────────────────────────────────────────────────────────────────────

    /// Push the current head to every peer again.
    pub async fn post_head(&self) -> Result<()> {
        let Some(head) = self.head().await else {
            return Ok(());
        };
        let bytes = self
            .shared
            .objects
            .get(&head)
            .await?
            .ok_or(WeftError::BlockNotFound(head))?;
        let kind = decode_stored(&bytes, &self.id)?.kind;
        self.post(kind, bytes).await;
        Ok(())
    }

    /// Ask `peer` for its head and apply it if it is new here.
    ///
    /// Returns the peer's head.
    pub async fn pull_head(&self, peer: &PeerId) -> Result<Option<BlockId>> {
        let request = Envelope::new(Message::GetHead { thread: self.id });
        let reply = timeout(
            self.shared.config.request_timeout(),
            self.shared.transport.send_request(peer, request),
        )
        .await
        .map_err(|_| NetError::Timeout(format!("get_head from {}", peer)))??;

        let head = match reply.into_result()? {
            Message::Head { thread, head } if thread == self.id => head,
            other => return Err(NetError::UnexpectedResponse(other.label()).into()),
        };
        if let Some(head) = head {
            if !self.shared.index.has_block(&head).await? {
                let bytes = fetch_object(&self.shared, &head, &[*peer]).await?;
                self.add_block(Some(peer), &bytes).await?;
            }
        }
        Ok(head)
    }

    /// Push a block to every peer without waiting for them.
    async fn post(&self, kind: BlockKind, bytes: Bytes) {
        let peers = match self.peers().await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(thread = %self.id, error = %e, "could not list peers to post to");
                return;
            }
        };
        let message = Message::Block {
            thread: self.id,
            kind,
            bytes,
        };
        spawn_post(Arc::clone(&self.shared), peers, message);
    }

    fn notify(&self, id: &BlockId, block: &Block) {
        self.updates.publish(ThreadUpdate {
            block: *id,
            thread: self.id,
            thread_name: self.name.clone(),
            kind: block.kind(),
            author: *block.author(),
        });
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Send `message` to each peer in its own task. Failures are logged and
/// dropped.
fn spawn_post(shared: Arc<Shared>, peers: Vec<PeerId>, message: Message) {
    let local = shared.identity.public_key();
    for peer in peers.into_iter().filter(|p| *p != local) {
        let shared = Arc::clone(&shared);
        let envelope = Envelope::new(message.clone());
        tokio::spawn(async move {
            let send = shared.transport.send_message(&peer, envelope);
            match timeout(shared.config.post_timeout(), send).await {
                Ok(Ok(())) => debug!(peer = %peer, "posted block"),
                Ok(Err(e)) => warn!(peer = %peer, error = %e, "post failed"),
                Err(_) => warn!(peer = %peer, "post timed out"),
            }
        });
    }
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
