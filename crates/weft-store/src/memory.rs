//! In-memory implementation of the storage traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use bytes::Bytes;

use weft_core::{BlockId, BlockKind, PeerId, ThreadId};

use crate::error::{Result, StoreError};
use crate::traits::{
    ignore_key, page_after, BlockRow, BlockWrite, DeviceRow, Index, InsertResult, ObjectStore,
    Page, PhotoRow, ThreadRow,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    objects: HashMap<BlockId, Bytes>,
    pinned: HashSet<BlockId>,

    blocks: HashMap<BlockId, BlockRow>,

    /// Peers per thread, in insertion order.
    peers: HashMap<ThreadId, Vec<PeerId>>,

    /// Devices in insertion order.
    devices: Vec<DeviceRow>,

    threads: HashMap<ThreadId, ThreadRow>,

    photos: HashMap<BlockId, PhotoRow>,
}

impl MemoryStoreInner {
    fn is_ignored(&self, thread: &ThreadId, id: &BlockId) -> bool {
        let key = ignore_key(id);
        self.blocks
            .values()
            .any(|b| b.thread == *thread && b.data_id.as_deref() == Some(key.as_str()))
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, bytes: Bytes) -> Result<BlockId> {
        let id = BlockId::of(&bytes);
        self.write()?.objects.entry(id).or_insert(bytes);
        Ok(id)
    }

    async fn get(&self, id: &BlockId) -> Result<Option<Bytes>> {
        Ok(self.read()?.objects.get(id).cloned())
    }

    async fn has(&self, id: &BlockId) -> Result<bool> {
        Ok(self.read()?.objects.contains_key(id))
    }

    async fn pin(&self, id: &BlockId) -> Result<()> {
        let mut inner = self.write()?;
        if !inner.objects.contains_key(id) {
            return Err(StoreError::NotFound(format!("object {}", id)));
        }
        inner.pinned.insert(*id);
        Ok(())
    }

    async fn is_pinned(&self, id: &BlockId) -> Result<bool> {
        Ok(self.read()?.pinned.contains(id))
    }
}

#[async_trait]
impl Index for MemoryStore {
    async fn insert_block(&self, row: &BlockRow) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.blocks.contains_key(&row.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.blocks.insert(row.id, row.clone());
        Ok(InsertResult::Inserted)
    }

    async fn apply_block(&self, write: &BlockWrite) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let row = &write.block;
        if inner.blocks.contains_key(&row.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        // Every check happens before the first mutation.
        if write.head.is_some() && !inner.threads.contains_key(&row.thread) {
            return Err(StoreError::NotFound(format!("thread {}", row.thread)));
        }

        if let Some(photo) = &write.photo {
            inner
                .photos
                .entry(photo.block)
                .or_insert_with(|| photo.clone());
        }
        if let Some(peer) = &write.joined {
            let peers = inner.peers.entry(row.thread).or_default();
            if !peers.contains(peer) {
                peers.push(*peer);
            }
        }
        if let Some(peer) = &write.left {
            if let Some(peers) = inner.peers.get_mut(&row.thread) {
                peers.retain(|p| p != peer);
            }
        }
        if let Some(update) = &write.head {
            if let Some(thread) = inner.threads.get_mut(&row.thread) {
                thread.head = Some(update.head);
                thread.tips = update.tips.clone();
            }
        }
        inner.blocks.insert(row.id, row.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_block(&self, id: &BlockId) -> Result<Option<BlockRow>> {
        Ok(self.read()?.blocks.get(id).cloned())
    }

    async fn has_block(&self, id: &BlockId) -> Result<bool> {
        Ok(self.read()?.blocks.contains_key(id))
    }

    async fn list_blocks(
        &self,
        thread: &ThreadId,
        kind: Option<BlockKind>,
        page: &Page,
    ) -> Result<Vec<BlockRow>> {
        let inner = self.read()?;

        let cursor = match page.offset {
            None => None,
            Some(offset) => match inner.blocks.get(&offset) {
                Some(row) if row.thread == *thread => Some((row.date, row.id)),
                _ => return Ok(Vec::new()),
            },
        };

        let rows: Vec<BlockRow> = inner
            .blocks
            .values()
            .filter(|b| b.thread == *thread)
            .filter(|b| kind.map_or(true, |k| b.kind == k))
            .filter(|b| !inner.is_ignored(thread, &b.id))
            .cloned()
            .collect();

        Ok(page_after(rows, cursor, page.limit, |b| (b.date, b.id)))
    }

    async fn insert_peer(&self, thread: &ThreadId, peer: &PeerId) -> Result<InsertResult> {
        let mut inner = self.write()?;
        let peers = inner.peers.entry(*thread).or_default();
        if peers.contains(peer) {
            return Ok(InsertResult::AlreadyExists);
        }
        peers.push(*peer);
        Ok(InsertResult::Inserted)
    }

    async fn list_peers(&self, thread: &ThreadId) -> Result<Vec<PeerId>> {
        Ok(self.read()?.peers.get(thread).cloned().unwrap_or_default())
    }

    async fn delete_peer(&self, thread: &ThreadId, peer: &PeerId) -> Result<bool> {
        let mut inner = self.write()?;
        let Some(peers) = inner.peers.get_mut(thread) else {
            return Ok(false);
        };
        let before = peers.len();
        peers.retain(|p| p != peer);
        Ok(peers.len() != before)
    }

    async fn insert_device(&self, row: &DeviceRow) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.devices.iter().any(|d| d.id == row.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.devices.push(row.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_device(&self, id: &PeerId) -> Result<Option<DeviceRow>> {
        Ok(self.read()?.devices.iter().find(|d| d.id == *id).cloned())
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRow>> {
        Ok(self.read()?.devices.clone())
    }

    async fn delete_device(&self, id: &PeerId) -> Result<bool> {
        let mut inner = self.write()?;
        let before = inner.devices.len();
        inner.devices.retain(|d| d.id != *id);
        Ok(inner.devices.len() != before)
    }

    async fn insert_thread(&self, row: &ThreadRow) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.threads.contains_key(&row.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.threads.insert(row.id, row.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<ThreadRow>> {
        Ok(self.read()?.threads.get(id).cloned())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadRow>> {
        let mut threads: Vec<ThreadRow> = self.read()?.threads.values().cloned().collect();
        threads.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(threads)
    }

    async fn update_head(
        &self,
        id: &ThreadId,
        head: Option<&BlockId>,
        tips: &[BlockId],
    ) -> Result<()> {
        let mut inner = self.write()?;
        let thread = inner
            .threads
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("thread {}", id)))?;
        thread.head = head.copied();
        thread.tips = tips.to_vec();
        Ok(())
    }

    async fn delete_thread(&self, id: &ThreadId) -> Result<bool> {
        let mut inner = self.write()?;
        let existed = inner.threads.remove(id).is_some();
        inner.blocks.retain(|_, b| b.thread != *id);
        inner.photos.retain(|_, p| p.thread != *id);
        inner.peers.remove(id);
        Ok(existed)
    }

    async fn insert_photo(&self, row: &PhotoRow) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.photos.contains_key(&row.block) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner.photos.insert(row.block, row.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_photo(&self, block: &BlockId) -> Result<Option<PhotoRow>> {
        Ok(self.read()?.photos.get(block).cloned())
    }

    async fn list_photos(&self, thread: &ThreadId, page: &Page) -> Result<Vec<PhotoRow>> {
        let inner = self.read()?;

        let cursor = match page.offset {
            None => None,
            Some(offset) => match inner.photos.get(&offset) {
                Some(row) if row.thread == *thread => Some((row.date, row.block)),
                _ => return Ok(Vec::new()),
            },
        };

        let rows: Vec<PhotoRow> = inner
            .photos
            .values()
            .filter(|p| p.thread == *thread && !inner.is_ignored(thread, &p.block))
            .cloned()
            .collect();

        Ok(page_after(rows, cursor, page.limit, |p| (p.date, p.block)))
    }
}
