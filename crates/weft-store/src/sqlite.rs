//! SQLite implementation of the storage traits.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};

use weft_core::{BlockId, BlockKind, PeerId, PhotoMetadata, ThreadId, IGNORE_PREFIX};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{
    BlockRow, BlockWrite, DeviceRow, Index, InsertResult, ObjectStore, Page, PhotoRow, ThreadRow,
};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path, creating and migrating it
    /// as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Unavailable(format!("mutex poisoned: {}", e)))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("spawn_blocking failed: {}", e)))?
    }
}

fn inserted(changes: usize) -> InsertResult {
    if changes == 0 {
        InsertResult::AlreadyExists
    } else {
        InsertResult::Inserted
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Column codecs
// ─────────────────────────────────────────────────────────────────────────────

fn bytes32(bytes: Vec<u8>, column: &str) -> Result<[u8; 32]> {
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| StoreError::InvalidData(format!("{}: {} bytes", column, b.len())))
}

fn encode_ids(ids: &[BlockId]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(ids, &mut buf).map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_ids(bytes: &[u8]) -> Result<Vec<BlockId>> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::InvalidData(format!("id list: {}", e)))
}

fn encode_metadata(metadata: &PhotoMetadata) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(metadata, &mut buf)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_metadata(bytes: &[u8]) -> Result<PhotoMetadata> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::InvalidData(format!("metadata: {}", e)))
}

/// Block columns as read, before validation.
struct RawBlock {
    id: Vec<u8>,
    thread: Vec<u8>,
    author: Vec<u8>,
    kind: i64,
    date: i64,
    parents: Vec<u8>,
    data_id: Option<String>,
}

const BLOCK_COLUMNS: &str = "b.id, b.thread, b.author, b.kind, b.date, b.parents, b.data_id";

impl RawBlock {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            thread: row.get(1)?,
            author: row.get(2)?,
            kind: row.get(3)?,
            date: row.get(4)?,
            parents: row.get(5)?,
            data_id: row.get(6)?,
        })
    }

    fn into_row(self) -> Result<BlockRow> {
        let kind = u16::try_from(self.kind)
            .ok()
            .and_then(BlockKind::from_u16)
            .ok_or_else(|| StoreError::InvalidData(format!("block kind {}", self.kind)))?;
        Ok(BlockRow {
            id: BlockId::from_bytes(bytes32(self.id, "id")?),
            thread: ThreadId::from_bytes(bytes32(self.thread, "thread")?),
            author: PeerId::from_bytes(bytes32(self.author, "author")?),
            kind,
            date: self.date,
            parents: decode_ids(&self.parents)?,
            data_id: self.data_id,
        })
    }
}

struct RawThread {
    id: Vec<u8>,
    name: String,
    seed: Vec<u8>,
    key: Vec<u8>,
    head: Option<Vec<u8>>,
    tips: Vec<u8>,
}

const THREAD_COLUMNS: &str = "id, name, seed, key, head, tips";

impl RawThread {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            seed: row.get(2)?,
            key: row.get(3)?,
            head: row.get(4)?,
            tips: row.get(5)?,
        })
    }

    fn into_row(self) -> Result<ThreadRow> {
        Ok(ThreadRow {
            id: ThreadId::from_bytes(bytes32(self.id, "id")?),
            name: self.name,
            seed: bytes32(self.seed, "seed")?,
            key: self.key,
            head: self
                .head
                .map(|h| bytes32(h, "head").map(BlockId::from_bytes))
                .transpose()?,
            tips: decode_ids(&self.tips)?,
        })
    }
}

struct RawPhoto {
    block: Vec<u8>,
    thread: Vec<u8>,
    data_id: String,
    caption: String,
    metadata: Vec<u8>,
    date: i64,
}

const PHOTO_COLUMNS: &str = "p.block, p.thread, p.data_id, p.caption, p.metadata, p.date";

impl RawPhoto {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            block: row.get(0)?,
            thread: row.get(1)?,
            data_id: row.get(2)?,
            caption: row.get(3)?,
            metadata: row.get(4)?,
            date: row.get(5)?,
        })
    }

    fn into_row(self) -> Result<PhotoRow> {
        Ok(PhotoRow {
            block: BlockId::from_bytes(bytes32(self.block, "block")?),
            thread: ThreadId::from_bytes(bytes32(self.thread, "thread")?),
            data_id: self.data_id,
            caption: self.caption,
            metadata: decode_metadata(&self.metadata)?,
            date: self.date,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Object store
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn put(&self, bytes: Bytes) -> Result<BlockId> {
        let id = BlockId::of(&bytes);
        self.run(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO objects (id, data) VALUES (?1, ?2)",
                params![id.as_bytes().as_slice(), bytes.as_ref()],
            )?;
            Ok(id)
        })
        .await
    }

    async fn get(&self, id: &BlockId) -> Result<Option<Bytes>> {
        let id = *id;
        self.run(move |conn| {
            let data: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT data FROM objects WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(data.map(Bytes::from))
        })
        .await
    }

    async fn has(&self, id: &BlockId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM objects WHERE id = ?1)",
                params![id.as_bytes().as_slice()],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn pin(&self, id: &BlockId) -> Result<()> {
        let id = *id;
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE objects SET pinned = 1 WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("object {}", id)));
            }
            Ok(())
        })
        .await
    }

    async fn is_pinned(&self, id: &BlockId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let pinned: Option<bool> = conn
                .query_row(
                    "SELECT pinned FROM objects WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(pinned.unwrap_or(false))
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row writers, shared by the single-row methods and `apply_block`
// ─────────────────────────────────────────────────────────────────────────────

fn write_block(conn: &Connection, row: &BlockRow) -> Result<InsertResult> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO blocks (id, thread, author, kind, date, parents, data_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            row.id.as_bytes().as_slice(),
            row.thread.as_bytes().as_slice(),
            row.author.as_bytes().as_slice(),
            row.kind.to_u16() as i64,
            row.date,
            encode_ids(&row.parents)?,
            row.data_id,
        ],
    )?;
    Ok(inserted(changed))
}

fn write_photo(conn: &Connection, row: &PhotoRow) -> Result<InsertResult> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO photos (block, thread, data_id, caption, metadata, date)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            row.block.as_bytes().as_slice(),
            row.thread.as_bytes().as_slice(),
            row.data_id,
            row.caption,
            encode_metadata(&row.metadata)?,
            row.date,
        ],
    )?;
    Ok(inserted(changed))
}

fn write_head(
    conn: &Connection,
    id: &ThreadId,
    head: Option<&BlockId>,
    tips: &[BlockId],
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE threads SET head = ?2, tips = ?3 WHERE id = ?1",
        params![
            id.as_bytes().as_slice(),
            head.map(|h| h.as_bytes().to_vec()),
            encode_ids(tips)?,
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(format!("thread {}", id)));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Index
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl Index for SqliteStore {
    async fn insert_block(&self, row: &BlockRow) -> Result<InsertResult> {
        let row = row.clone();
        self.run(move |conn| write_block(conn, &row)).await
    }

    async fn apply_block(&self, write: &BlockWrite) -> Result<InsertResult> {
        let write = write.clone();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            if !write_block(&tx, &write.block)?.is_inserted() {
                return Ok(InsertResult::AlreadyExists);
            }
            let thread = write.block.thread;
            if let Some(photo) = &write.photo {
                write_photo(&tx, photo)?;
            }
            if let Some(peer) = &write.joined {
                tx.execute(
                    "INSERT OR IGNORE INTO peers (thread, id) VALUES (?1, ?2)",
                    params![thread.as_bytes().as_slice(), peer.as_bytes().as_slice()],
                )?;
            }
            if let Some(peer) = &write.left {
                tx.execute(
                    "DELETE FROM peers WHERE thread = ?1 AND id = ?2",
                    params![thread.as_bytes().as_slice(), peer.as_bytes().as_slice()],
                )?;
            }
            if let Some(update) = &write.head {
                write_head(&tx, &thread, Some(&update.head), &update.tips)?;
            }
            tx.commit()?;
            Ok(InsertResult::Inserted)
        })
        .await
    }

    async fn get_block(&self, id: &BlockId) -> Result<Option<BlockRow>> {
        let id = *id;
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM blocks b WHERE b.id = ?1", BLOCK_COLUMNS),
                params![id.as_bytes().as_slice()],
                RawBlock::read,
            )
            .optional()?
            .map(RawBlock::into_row)
            .transpose()
        })
        .await
    }

    async fn has_block(&self, id: &BlockId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            Ok(conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM blocks WHERE id = ?1)",
                params![id.as_bytes().as_slice()],
                |row| row.get(0),
            )?)
        })
        .await
    }

    async fn list_blocks(
        &self,
        thread: &ThreadId,
        kind: Option<BlockKind>,
        page: &Page,
    ) -> Result<Vec<BlockRow>> {
        let thread = *thread;
        let page = *page;
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM blocks b
                 WHERE b.thread = ?1
                   AND (?2 IS NULL OR b.kind = ?2)
                   AND NOT EXISTS (
                       SELECT 1 FROM blocks i
                       WHERE i.thread = b.thread AND i.data_id = ?3 || lower(hex(b.id))
                   )
                   AND (?4 IS NULL OR (b.date, b.id) < (
                       SELECT c.date, c.id FROM blocks c WHERE c.id = ?4 AND c.thread = ?1
                   ))
                 ORDER BY b.date DESC, b.id DESC
                 LIMIT ?5",
                BLOCK_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let raw = stmt
                .query_map(
                    params![
                        thread.as_bytes().as_slice(),
                        kind.map(|k| k.to_u16() as i64),
                        IGNORE_PREFIX,
                        page.offset.as_ref().map(|o| o.as_bytes().to_vec()),
                        page.limit as i64,
                    ],
                    RawBlock::read,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(RawBlock::into_row).collect()
        })
        .await
    }

    async fn insert_peer(&self, thread: &ThreadId, peer: &PeerId) -> Result<InsertResult> {
        let (thread, peer) = (*thread, *peer);
        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO peers (thread, id) VALUES (?1, ?2)",
                params![thread.as_bytes().as_slice(), peer.as_bytes().as_slice()],
            )?;
            Ok(inserted(changed))
        })
        .await
    }

    async fn list_peers(&self, thread: &ThreadId) -> Result<Vec<PeerId>> {
        let thread = *thread;
        self.run(move |conn| {
            let mut stmt = conn.prepare("SELECT id FROM peers WHERE thread = ?1 ORDER BY seq")?;
            let raw = stmt
                .query_map(params![thread.as_bytes().as_slice()], |row| {
                    row.get::<_, Vec<u8>>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|b| bytes32(b, "peer").map(PeerId::from_bytes))
                .collect()
        })
        .await
    }

    async fn delete_peer(&self, thread: &ThreadId, peer: &PeerId) -> Result<bool> {
        let (thread, peer) = (*thread, *peer);
        self.run(move |conn| {
            let changed = conn.execute(
                "DELETE FROM peers WHERE thread = ?1 AND id = ?2",
                params![thread.as_bytes().as_slice(), peer.as_bytes().as_slice()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_device(&self, row: &DeviceRow) -> Result<InsertResult> {
        let row = row.clone();
        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO devices (id, name) VALUES (?1, ?2)",
                params![row.id.as_bytes().as_slice(), row.name],
            )?;
            Ok(inserted(changed))
        })
        .await
    }

    async fn get_device(&self, id: &PeerId) -> Result<Option<DeviceRow>> {
        let id = *id;
        self.run(move |conn| {
            let name: Option<String> = conn
                .query_row(
                    "SELECT name FROM devices WHERE id = ?1",
                    params![id.as_bytes().as_slice()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(name.map(|name| DeviceRow { id, name }))
        })
        .await
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRow>> {
        self.run(|conn| {
            let mut stmt = conn.prepare("SELECT id, name FROM devices ORDER BY seq")?;
            let raw = stmt
                .query_map([], |row| Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?)))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter()
                .map(|(id, name)| {
                    Ok(DeviceRow {
                        id: PeerId::from_bytes(bytes32(id, "device")?),
                        name,
                    })
                })
                .collect()
        })
        .await
    }

    async fn delete_device(&self, id: &PeerId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let changed = conn.execute(
                "DELETE FROM devices WHERE id = ?1",
                params![id.as_bytes().as_slice()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_thread(&self, row: &ThreadRow) -> Result<InsertResult> {
        let row = row.clone();
        let tips = encode_ids(&row.tips)?;
        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO threads (id, name, seed, key, head, tips)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    row.id.as_bytes().as_slice(),
                    row.name,
                    row.seed.as_slice(),
                    row.key,
                    row.head.as_ref().map(|h| h.as_bytes().to_vec()),
                    tips,
                ],
            )?;
            Ok(inserted(changed))
        })
        .await
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<ThreadRow>> {
        let id = *id;
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM threads WHERE id = ?1", THREAD_COLUMNS),
                params![id.as_bytes().as_slice()],
                RawThread::read,
            )
            .optional()?
            .map(RawThread::into_row)
            .transpose()
        })
        .await
    }

    async fn list_threads(&self) -> Result<Vec<ThreadRow>> {
        self.run(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM threads ORDER BY name, id",
                THREAD_COLUMNS
            ))?;
            let raw = stmt
                .query_map([], RawThread::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(RawThread::into_row).collect()
        })
        .await
    }

    async fn update_head(
        &self,
        id: &ThreadId,
        head: Option<&BlockId>,
        tips: &[BlockId],
    ) -> Result<()> {
        let (id, head, tips) = (*id, head.copied(), tips.to_vec());
        self.run(move |conn| write_head(conn, &id, head.as_ref(), &tips))
            .await
    }

    async fn delete_thread(&self, id: &ThreadId) -> Result<bool> {
        let id = *id;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let key = id.as_bytes().as_slice();
            tx.execute("DELETE FROM blocks WHERE thread = ?1", params![key])?;
            tx.execute("DELETE FROM photos WHERE thread = ?1", params![key])?;
            tx.execute("DELETE FROM peers WHERE thread = ?1", params![key])?;
            let changed = tx.execute("DELETE FROM threads WHERE id = ?1", params![key])?;
            tx.commit()?;
            Ok(changed > 0)
        })
        .await
    }

    async fn insert_photo(&self, row: &PhotoRow) -> Result<InsertResult> {
        let row = row.clone();
        self.run(move |conn| write_photo(conn, &row)).await
    }

    async fn get_photo(&self, block: &BlockId) -> Result<Option<PhotoRow>> {
        let block = *block;
        self.run(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM photos p WHERE p.block = ?1", PHOTO_COLUMNS),
                params![block.as_bytes().as_slice()],
                RawPhoto::read,
            )
            .optional()?
            .map(RawPhoto::into_row)
            .transpose()
        })
        .await
    }

    async fn list_photos(&self, thread: &ThreadId, page: &Page) -> Result<Vec<PhotoRow>> {
        let thread = *thread;
        let page = *page;
        self.run(move |conn| {
            let sql = format!(
                "SELECT {} FROM photos p
                 WHERE p.thread = ?1
                   AND NOT EXISTS (
                       SELECT 1 FROM blocks i
                       WHERE i.thread = p.thread AND i.data_id = ?2 || lower(hex(p.block))
                   )
                   AND (?3 IS NULL OR (p.date, p.block) < (
                       SELECT c.date, c.block FROM photos c WHERE c.block = ?3 AND c.thread = ?1
                   ))
                 ORDER BY p.date DESC, p.block DESC
                 LIMIT ?4",
                PHOTO_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let raw = stmt
                .query_map(
                    params![
                        thread.as_bytes().as_slice(),
                        IGNORE_PREFIX,
                        page.offset.as_ref().map(|o| o.as_bytes().to_vec()),
                        page.limit as i64,
                    ],
                    RawPhoto::read,
                )?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            raw.into_iter().map(RawPhoto::into_row).collect()
        })
        .await
    }
}
