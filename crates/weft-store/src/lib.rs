//! # Weft Store
//!
//! Local persistence for Weft: a content-addressed object store for block
//! bytes, and a relational index over blocks, peers, devices, threads and
//! photo metadata.
//!
//! ## Key Types
//!
//! - [`ObjectStore`] - Put/get/pin immutable blobs by address
//! - [`Index`] - Row-oriented CRUD with paginated listings
//! - [`SqliteStore`] - SQLite-based persistent storage (implements both)
//! - [`MemoryStore`] - In-memory storage for tests (implements both)
//!
//! ## Usage
//!
//! ```rust,no_run
//! use weft_store::{ObjectStore, SqliteStore};
//!
//! async fn example() -> weft_store::Result<()> {
//!     let store = SqliteStore::open("weft.db")?;
//!     let id = store.put(bytes::Bytes::from_static(b"block")).await?;
//!     store.pin(&id).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Semantics
//!
//! - **Idempotent inserts**: inserting an existing row returns `AlreadyExists`
//! - **Atomic block writes**: [`Index::apply_block`] lands every row of a
//!   block and its head move together, or nothing
//! - **Ignored blocks**: listings hide blocks targeted by an ignore block
//! - **Pagination**: newest first, resuming after an offset id

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    ignore_key, BlockRow, BlockWrite, DeviceRow, HeadUpdate, Index, InsertResult, ObjectStore,
    Page, PhotoRow, ThreadRow,
};
