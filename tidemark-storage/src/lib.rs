//! SQLite storage layer for Tidemark.
//!
//! Provides the durable local mirror of server-owned data. The application
//! reads and writes it directly; the sync layer (`tidemark-cloud`) keeps it
//! consistent with the server.
//!
//! # Architecture
//!
//! - One SQLite table per [`Collection`], keyed by the record's `id`
//! - Records are opaque JSON; only the key path and declared index fields
//!   are ever read by the store
//! - Schema migrations are additive and keyed on `PRAGMA user_version`
//! - If the medium cannot be opened or upgraded, the store degrades to a
//!   no-op mode instead of failing callers
//! - The offline mutation queue and the token vault are two more
//!   collections with their own components on top

mod clock;
mod entities;
mod error;
mod queue;
mod records;
mod schema;
mod store;
mod token_vault;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entities::{AI_SETTINGS_KEY, APP_SETTINGS_KEY};
pub use error::{StorageError, StorageResult};
pub use queue::{Method, OfflineQueue, QueueItem, QueueStatus};
pub use records::{Record, record_key};
pub use schema::{Collection, CollectionSpec, SCHEMA_VERSION, STORE_FILE_NAME, Schema};
pub use store::{CollectionHandle, LocalStore, StoreLocation, StoreStatus};
pub use token_vault::{
    AUTH_RECORD_KEY, LegacyTokenFile, LegacyTokenSource, LegacyTokens, MigrationOutcome,
    TokenRecord, TokenVault,
};

use std::path::Path;

/// Open a SQLite connection and apply connection pragmas.
///
/// The `-wal` file is never touched: it holds committed transactions that
/// have not been checkpointed yet. A failed open is returned to the caller,
/// which degrades the store to no-op mode.
pub fn open_sqlite(path: &Path) -> StorageResult<rusqlite::Connection> {
    let conn = rusqlite::Connection::open(path)?;
    apply_pragmas(&conn)?;
    Ok(conn)
}

/// Apply lock-wait and journal settings to a connection.
///
/// `busy_timeout` goes first so a database locked by another handle is
/// waited on instead of failing the journal switch outright.
pub(crate) fn apply_pragmas(conn: &rusqlite::Connection) -> StorageResult<()> {
    conn.execute_batch(
        "PRAGMA busy_timeout=5000; PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;",
    )?;
    Ok(())
}
