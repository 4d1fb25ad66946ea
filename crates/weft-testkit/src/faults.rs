//! A store whose index writes can be made to fail on demand.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;

use weft::core::{BlockId, BlockKind, PeerId, ThreadId};
use weft::store::{
    BlockRow, BlockWrite, DeviceRow, Index, InsertResult, MemoryStore, ObjectStore, Page,
    PhotoRow, Result, StoreError, ThreadRow,
};

/// A [`MemoryStore`] that refuses block and head writes while
/// [`FaultyStore::fail_writes`] is on. Reads and every other write pass
/// through.
#[derive(Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_writes(&self, on: bool) {
        self.failing.store(on, Ordering::SeqCst);
    }

    fn check(&self, what: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} refused", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FaultyStore {
    async fn put(&self, bytes: Bytes) -> Result<BlockId> {
        self.inner.put(bytes).await
    }

    async fn get(&self, id: &BlockId) -> Result<Option<Bytes>> {
        self.inner.get(id).await
    }

    async fn has(&self, id: &BlockId) -> Result<bool> {
        self.inner.has(id).await
    }

    async fn pin(&self, id: &BlockId) -> Result<()> {
        self.inner.pin(id).await
    }

    async fn is_pinned(&self, id: &BlockId) -> Result<bool> {
        self.inner.is_pinned(id).await
    }
}

#[async_trait]
impl Index for FaultyStore {
    async fn insert_block(&self, row: &BlockRow) -> Result<InsertResult> {
        self.check("block insert")?;
        self.inner.insert_block(row).await
    }

    async fn apply_block(&self, write: &BlockWrite) -> Result<InsertResult> {
        self.check("block write")?;
        self.inner.apply_block(write).await
    }

    async fn get_block(&self, id: &BlockId) -> Result<Option<BlockRow>> {
        self.inner.get_block(id).await
    }

    async fn has_block(&self, id: &BlockId) -> Result<bool> {
        self.inner.has_block(id).await
    }

    async fn list_blocks(
        &self,
        thread: &ThreadId,
        kind: Option<BlockKind>,
        page: &Page,
    ) -> Result<Vec<BlockRow>> {
        self.inner.list_blocks(thread, kind, page).await
    }

    async fn insert_peer(&self, thread: &ThreadId, peer: &PeerId) -> Result<InsertResult> {
        self.inner.insert_peer(thread, peer).await
    }

    async fn list_peers(&self, thread: &ThreadId) -> Result<Vec<PeerId>> {
        self.inner.list_peers(thread).await
    }

    async fn delete_peer(&self, thread: &ThreadId, peer: &PeerId) -> Result<bool> {
        self.inner.delete_peer(thread, peer).await
    }

    async fn insert_device(&self, row: &DeviceRow) -> Result<InsertResult> {
        self.inner.insert_device(row).await
    }

    async fn get_device(&self, id: &PeerId) -> Result<Option<DeviceRow>> {
        self.inner.get_device(id).await
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRow>> {
        self.inner.list_devices().await
    }

    async fn delete_device(&self, id: &PeerId) -> Result<bool> {
        self.inner.delete_device(id).await
    }

    async fn insert_thread(&self, row: &ThreadRow) -> Result<InsertResult> {
        self.inner.insert_thread(row).await
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<ThreadRow>> {
        self.inner.get_thread(id).await
    }

    async fn list_threads(&self) -> Result<Vec<ThreadRow>> {
        self.inner.list_threads().await
    }

    async fn update_head(
        &self,
        id: &ThreadId,
        head: Option<&BlockId>,
        tips: &[BlockId],
    ) -> Result<()> {
        self.check("head update")?;
        self.inner.update_head(id, head, tips).await
    }

    async fn delete_thread(&self, id: &ThreadId) -> Result<bool> {
        self.inner.delete_thread(id).await
    }

    async fn insert_photo(&self, row: &PhotoRow) -> Result<InsertResult> {
        self.check("photo insert")?;
        self.inner.insert_photo(row).await
    }

    async fn get_photo(&self, block: &BlockId) -> Result<Option<PhotoRow>> {
        self.inner.get_photo(block).await
    }

    async fn list_photos(&self, thread: &ThreadId, page: &Page) -> Result<Vec<PhotoRow>> {
        self.inner.list_photos(thread, page).await
    }
}
