//! Storage traits: the content-addressed object store and the local index.
//!
//! The engine is storage-agnostic. Implementations include SQLite (primary)
//! and in-memory (for tests). Both are safe for concurrent use.

use async_trait::async_trait;
use bytes::Bytes;
use weft_core::{BlockId, BlockKind, PeerId, PhotoMetadata, ThreadId};

use crate::error::Result;

/// Result of inserting a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    /// The row already exists (idempotent, not an error).
    AlreadyExists,
}

impl InsertResult {
    pub fn is_inserted(self) -> bool {
        matches!(self, InsertResult::Inserted)
    }
}

/// A page of a listing, newest first (by date, then id).
///
/// `offset` is the id of the last row of the previous page. Listing resumes
/// strictly after that row's position. An offset that names no indexed row
/// yields an empty page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: Option<BlockId>,
    pub limit: usize,
}

impl Page {
    pub const fn first(limit: usize) -> Self {
        Self {
            offset: None,
            limit,
        }
    }

    pub const fn after(offset: BlockId, limit: usize) -> Self {
        Self {
            offset: Some(offset),
            limit,
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(100)
    }
}

/// An indexed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRow {
    pub id: BlockId,
    pub thread: ThreadId,
    pub author: PeerId,
    pub kind: BlockKind,
    /// Author-claimed timestamp (Unix ms).
    pub date: i64,
    pub parents: Vec<BlockId>,
    /// Payload-specific secondary key, e.g. the media address of a photo.
    pub data_id: Option<String>,
}

/// A linked device of the local wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRow {
    pub id: PeerId,
    pub name: String,
}

/// A thread the local wallet belongs to.
#[derive(Clone, PartialEq, Eq)]
pub struct ThreadRow {
    pub id: ThreadId,
    pub name: String,
    /// Seed of the thread signing keypair.
    pub seed: [u8; 32],
    /// Raw content key.
    pub key: Vec<u8>,
    pub head: Option<BlockId>,
    /// Divergent heads not yet merged.
    pub tips: Vec<BlockId>,
}

impl std::fmt::Debug for ThreadRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRow")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("head", &self.head)
            .field("tips", &self.tips)
            .finish_non_exhaustive()
    }
}

/// Photo metadata, keyed by the photo block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoRow {
    pub block: BlockId,
    pub thread: ThreadId,
    pub data_id: String,
    pub caption: String,
    pub metadata: PhotoMetadata,
    pub date: i64,
}

/// A thread's new head and the tips left beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadUpdate {
    pub head: BlockId,
    pub tips: Vec<BlockId>,
}

/// Every index change one block makes, applied as a unit by
/// [`Index::apply_block`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockWrite {
    pub block: BlockRow,
    pub photo: Option<PhotoRow>,
    /// Peer added to the block's thread.
    pub joined: Option<PeerId>,
    /// Peer removed from the block's thread.
    pub left: Option<PeerId>,
    /// Set when the block moves its thread's head.
    pub head: Option<HeadUpdate>,
}

impl BlockWrite {
    pub fn new(block: BlockRow) -> Self {
        Self {
            block,
            photo: None,
            joined: None,
            left: None,
            head: None,
        }
    }
}

/// Content-addressed storage of immutable blobs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` and return their address. Storing the same bytes twice
    /// is a no-op returning the same address.
    async fn put(&self, bytes: Bytes) -> Result<BlockId>;

    async fn get(&self, id: &BlockId) -> Result<Option<Bytes>>;

    async fn has(&self, id: &BlockId) -> Result<bool>;

    /// Pin an object so it is kept. Fails with `NotFound` if absent.
    async fn pin(&self, id: &BlockId) -> Result<()>;

    async fn is_pinned(&self, id: &BlockId) -> Result<bool>;
}

/// The relational index of blocks, peers, devices, threads and photos.
#[async_trait]
pub trait Index: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Blocks
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_block(&self, row: &BlockRow) -> Result<InsertResult>;

    /// Apply all of `write` or none of it.
    ///
    /// If the block row already exists nothing is written and
    /// `AlreadyExists` is returned. A head update for an unknown thread
    /// fails with `NotFound`.
    async fn apply_block(&self, write: &BlockWrite) -> Result<InsertResult>;

    async fn get_block(&self, id: &BlockId) -> Result<Option<BlockRow>>;

    async fn has_block(&self, id: &BlockId) -> Result<bool>;

    /// List a thread's blocks newest first, optionally of one kind.
    ///
    /// Blocks targeted by an ignore block in the same thread are hidden.
    async fn list_blocks(
        &self,
        thread: &ThreadId,
        kind: Option<BlockKind>,
        page: &Page,
    ) -> Result<Vec<BlockRow>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Peers
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_peer(&self, thread: &ThreadId, peer: &PeerId) -> Result<InsertResult>;

    /// A thread's peers in the order they were added.
    async fn list_peers(&self, thread: &ThreadId) -> Result<Vec<PeerId>>;

    /// Returns whether a row was removed.
    async fn delete_peer(&self, thread: &ThreadId, peer: &PeerId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Devices
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_device(&self, row: &DeviceRow) -> Result<InsertResult>;

    async fn get_device(&self, id: &PeerId) -> Result<Option<DeviceRow>>;

    async fn list_devices(&self) -> Result<Vec<DeviceRow>>;

    async fn delete_device(&self, id: &PeerId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Threads
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_thread(&self, row: &ThreadRow) -> Result<InsertResult>;

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<ThreadRow>>;

    async fn list_threads(&self) -> Result<Vec<ThreadRow>>;

    /// Persist a thread's head and tips. Fails with `NotFound` for an
    /// unknown thread.
    async fn update_head(
        &self,
        id: &ThreadId,
        head: Option<&BlockId>,
        tips: &[BlockId],
    ) -> Result<()>;

    /// Delete a thread with all of its blocks, peers and photos.
    async fn delete_thread(&self, id: &ThreadId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Photos
    // ─────────────────────────────────────────────────────────────────────────

    async fn insert_photo(&self, row: &PhotoRow) -> Result<InsertResult>;

    async fn get_photo(&self, block: &BlockId) -> Result<Option<PhotoRow>>;

    /// List a thread's photos newest first, hiding ignored ones.
    async fn list_photos(&self, thread: &ThreadId, page: &Page) -> Result<Vec<PhotoRow>>;
}

/// The ignore data id that hides block `id`.
pub fn ignore_key(id: &BlockId) -> String {
    format!("{}{}", weft_core::IGNORE_PREFIX, id.to_hex())
}

/// Sort rows newest first and keep `limit` of those strictly after `cursor`.
pub(crate) fn page_after<T>(
    mut rows: Vec<T>,
    cursor: Option<(i64, BlockId)>,
    limit: usize,
    key: impl Fn(&T) -> (i64, BlockId),
) -> Vec<T> {
    rows.sort_by(|a, b| key(b).cmp(&key(a)));
    rows.into_iter()
        .filter(|r| cursor.map_or(true, |c| key(r) < c))
        .take(limit)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: u8) -> Vec<BlockId> {
        (0..n).map(|i| BlockId::from_bytes([i; 32])).collect()
    }

    #[test]
    fn test_page_after() {
        let rows: Vec<(i64, BlockId)> = ids(5).into_iter().map(|id| (10, id)).collect();
        let newest = page_after(rows.clone(), None, 2, |r| *r);
        assert_eq!(newest, vec![rows[4], rows[3]]);

        let next = page_after(rows.clone(), Some(rows[3]), 2, |r| *r);
        assert_eq!(next, vec![rows[2], rows[1]]);

        assert!(page_after(rows.clone(), Some(rows[0]), 2, |r| *r).is_empty());
    }

    #[test]
    fn test_page_after_orders_by_date_first() {
        let id = ids(2);
        let rows = vec![(5, id[1]), (7, id[0])];
        let sorted = page_after(rows, None, 10, |r| *r);
        assert_eq!(sorted, vec![(7, id[0]), (5, id[1])]);
    }

    #[test]
    fn test_ignore_key() {
        let id = BlockId::from_bytes([0xab; 32]);
        assert_eq!(ignore_key(&id), format!("ignore-{}", "ab".repeat(32)));
    }
}
