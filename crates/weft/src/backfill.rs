//! Fetching missing ancestors of an incoming block.
//!
//! The walk is an explicit work list rather than recursion: missing parents
//! are queued, fetched, opened and their own parents queued in turn, until
//! every branch reaches a block that is already indexed. The result is
//! ordered parents-first so the caller can apply it front to back.

use std::collections::{HashMap, HashSet, VecDeque};

use bytes::Bytes;
use tokio::time::timeout;
use tracing::{debug, warn};

use weft_core::{Block, BlockId, PeerId, ThreadId};
use weft_net::{Envelope, Message, NetError};
use weft_perms::SymmetricKey;

use crate::error::{Result, WeftError};
use crate::sealing::{decode_stored, open_block};
use crate::wallet::Shared;

/// A verified ancestor waiting to be applied.
pub(crate) struct Fetched {
    pub id: BlockId,
    pub bytes: Bytes,
    pub block: Block,
}

/// Fetch the ancestors of a block that are missing from the index.
///
/// `from` is asked first, then the thread's peers. Fails if any ancestor
/// cannot be obtained or does not verify; nothing is applied in that case.
pub(crate) async fn collect_ancestors(
    shared: &Shared,
    thread: &ThreadId,
    key: &SymmetricKey,
    from: Option<&PeerId>,
    parents: &[BlockId],
) -> Result<Vec<Fetched>> {
    let mut queue: VecDeque<BlockId> = parents.iter().copied().collect();
    if queue.is_empty() {
        return Ok(Vec::new());
    }

    let mut candidates: Vec<PeerId> = from.into_iter().copied().collect();
    for peer in shared.index.list_peers(thread).await? {
        if !candidates.contains(&peer) {
            candidates.push(peer);
        }
    }

    let mut seen = HashSet::new();
    let mut present = HashSet::new();
    let mut fetched = Vec::new();

    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        if shared.index.has_block(&id).await? {
            present.insert(id);
            continue;
        }
        if fetched.len() >= shared.config.max_backfill {
            return Err(WeftError::Backfill {
                block: id,
                reason: format!("more than {} missing ancestors", shared.config.max_backfill),
            });
        }

        let bytes = fetch_object(shared, &id, &candidates).await?;
        let stored = decode_stored(&bytes, thread)?;
        let (_, block) = open_block(&stored, Some(key)).map_err(|e| {
            warn!(thread = %thread, block = %id, error = %e, "rejected fetched ancestor");
            e
        })?;
        queue.extend(block.parents().iter().filter(|p| !seen.contains(*p)));
        fetched.push(Fetched { id, bytes, block });
    }

    if !fetched.is_empty() {
        debug!(thread = %thread, count = fetched.len(), "fetched missing ancestors");
    }
    parents_first(fetched, &present)
}

/// Order blocks so every block comes after all of its parents.
fn parents_first(blocks: Vec<Fetched>, present: &HashSet<BlockId>) -> Result<Vec<Fetched>> {
    let position: HashMap<BlockId, usize> =
        blocks.iter().enumerate().map(|(i, f)| (f.id, i)).collect();

    let mut waiting = vec![0usize; blocks.len()];
    let mut children: HashMap<BlockId, Vec<usize>> = HashMap::new();
    for (i, fetched) in blocks.iter().enumerate() {
        for parent in fetched.block.parents() {
            if present.contains(parent) {
                continue;
            }
            if !position.contains_key(parent) {
                return Err(WeftError::Backfill {
                    block: *parent,
                    reason: "ancestor missing after fetch".into(),
                });
            }
            waiting[i] += 1;
            children.entry(*parent).or_default().push(i);
        }
    }

    let mut ready: VecDeque<usize> = (0..blocks.len()).filter(|i| waiting[*i] == 0).collect();
    let mut order = Vec::with_capacity(blocks.len());
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for child in children.get(&blocks[i].id).into_iter().flatten() {
            waiting[*child] -= 1;
            if waiting[*child] == 0 {
                ready.push_back(*child);
            }
        }
    }

    if order.len() != blocks.len() {
        let stuck = (0..blocks.len())
            .find(|i| waiting[*i] > 0)
            .map(|i| blocks[i].id)
            .unwrap_or_else(|| BlockId::from_bytes([0; 32]));
        return Err(WeftError::Backfill {
            block: stuck,
            reason: "ancestors do not form a DAG".into(),
        });
    }

    let mut slots: Vec<Option<Fetched>> = blocks.into_iter().map(Some).collect();
    Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
}

/// Fetch an object by address: the local store first, then each candidate
/// peer in turn, for `fetch_retries + 1` passes.
pub(crate) async fn fetch_object(
    shared: &Shared,
    id: &BlockId,
    candidates: &[PeerId],
) -> Result<Bytes> {
    if let Some(bytes) = shared.objects.get(id).await? {
        if BlockId::of(&bytes) == *id {
            return Ok(bytes);
        }
        warn!(block = %id, "local object does not match its address");
    }

    let local = shared.identity.public_key();
    let mut last_error = None;
    for attempt in 0..=shared.config.fetch_retries {
        for peer in candidates.iter().filter(|p| **p != local) {
            match request_block(shared, peer, id).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    debug!(block = %id, peer = %peer, attempt, error = %e, "fetch failed");
                    last_error = Some(e.to_string());
                }
            }
        }
    }

    Err(WeftError::Backfill {
        block: *id,
        reason: last_error.unwrap_or_else(|| "no peer to ask".into()),
    })
}

async fn request_block(shared: &Shared, peer: &PeerId, id: &BlockId) -> Result<Bytes> {
    let request = Envelope::new(Message::GetBlock { id: *id });
    let reply = timeout(
        shared.config.request_timeout(),
        shared.transport.send_request(peer, request),
    )
    .await
    .map_err(|_| NetError::Timeout(format!("get_block {}", id)))??;

    match reply.into_result()? {
        Message::BlockData { id: got, bytes } if got == *id => {
            if BlockId::of(&bytes) != *id {
                return Err(WeftError::AddressMismatch(*id));
            }
            Ok(bytes)
        }
        other => Err(NetError::UnexpectedResponse(other.label()).into()),
    }
}
