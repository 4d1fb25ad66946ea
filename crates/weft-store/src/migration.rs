//! Database schema migrations for SQLite.
//!
//! Versioned migrations. Each one transforms the schema from version N to
//! N+1 inside the same transaction that records it.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema. Idempotent.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database is at version {}, newer than supported {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            tracing::debug!(version, "applied store migration");
        }

        tx.commit()?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Content-addressed objects
        CREATE TABLE objects (
            id BLOB PRIMARY KEY,              -- 32 bytes, Blake3 hash of data
            data BLOB NOT NULL,
            pinned INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE threads (
            id BLOB PRIMARY KEY,              -- 32 bytes, thread public key
            name TEXT NOT NULL,
            seed BLOB NOT NULL,               -- 32 bytes, thread signing seed
            key BLOB NOT NULL,                -- 44 bytes, content key
            head BLOB,                        -- nullable until the first block
            tips BLOB NOT NULL                -- CBOR array of block ids
        );

        CREATE TABLE blocks (
            id BLOB PRIMARY KEY,
            thread BLOB NOT NULL,
            author BLOB NOT NULL,
            kind INTEGER NOT NULL,            -- BlockKind as u16
            date INTEGER NOT NULL,            -- author-claimed timestamp (Unix ms)
            parents BLOB NOT NULL,            -- CBOR array of block ids
            data_id TEXT
        );

        -- Peers keep the order they were admitted in
        CREATE TABLE peers (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            thread BLOB NOT NULL,
            id BLOB NOT NULL,
            UNIQUE(thread, id)
        );

        CREATE TABLE devices (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id BLOB NOT NULL UNIQUE,
            name TEXT NOT NULL
        );

        CREATE TABLE photos (
            block BLOB PRIMARY KEY,
            thread BLOB NOT NULL,
            data_id TEXT NOT NULL,
            caption TEXT NOT NULL,
            metadata BLOB NOT NULL,           -- CBOR PhotoMetadata
            date INTEGER NOT NULL
        );

        CREATE INDEX idx_blocks_thread_date ON blocks(thread, date);
        CREATE INDEX idx_blocks_data_id ON blocks(thread, data_id);
        CREATE INDEX idx_photos_thread_date ON photos(thread, date);
        "#,
    )?;

    Ok(())
}

fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}
