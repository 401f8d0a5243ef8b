//! The local store handle: named collections over one SQLite file.
//!
//! A [`LocalStore`] is cheap to clone and is meant to be constructed once at
//! process start and handed to every component that needs it. Opening is
//! lazy and memoized: the first caller of [`LocalStore::init`] (or of any
//! operation) opens the file and runs the schema pass, and every concurrent
//! caller awaits that same attempt.
//!
//! When the medium is missing, or the open/upgrade fails, the store stays
//! usable in a no-op mode: reads return `None` or an empty list and writes
//! succeed without persisting anything.

use crate::error::{StorageError, StorageResult};
use crate::records::{Record, record_key};
use crate::schema::{self, Collection, STORE_FILE_NAME, Schema, SchemaPass};
use rusqlite::{Connection, OptionalExtension, params};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

type SharedConn = Arc<Mutex<Connection>>;

/// Where the physical store lives.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreLocation {
    /// A SQLite file; parent directories are created on open.
    File(PathBuf),
    /// A private in-memory database (tests, ephemeral sessions).
    InMemory,
    /// The host has no usable storage medium.
    Unavailable,
}

impl StoreLocation {
    /// The default store file inside an application data directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::File(dir.as_ref().join(STORE_FILE_NAME))
    }
}

/// Observable state of a store handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreStatus {
    /// `init` has not completed yet.
    Uninitialized,
    /// Open, at the given schema version.
    Ready { schema_version: u32 },
    /// Running in no-op mode.
    Unavailable,
}

/// Handle to the durable local mirror.
#[derive(Clone)]
pub struct LocalStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    location: StoreLocation,
    schema: Schema,
    conn: OnceCell<Option<SharedConn>>,
    schema_passes: AtomicUsize,
}

impl LocalStore {
    /// Creates a handle for the current schema. Nothing is opened yet.
    pub fn new(location: StoreLocation) -> Self {
        Self::with_schema(location, Schema::current())
    }

    /// Creates a handle with an explicit schema (older/newer layouts in tests).
    pub fn with_schema(location: StoreLocation, schema: Schema) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                location,
                schema,
                conn: OnceCell::new(),
                schema_passes: AtomicUsize::new(0),
            }),
        }
    }

    pub fn open_in_memory() -> Self {
        Self::new(StoreLocation::InMemory)
    }

    /// A store with no medium at all; every operation is a no-op.
    pub fn unavailable() -> Self {
        Self::new(StoreLocation::Unavailable)
    }

    pub fn location(&self) -> &StoreLocation {
        &self.inner.location
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Opens the store once. Safe to call repeatedly and concurrently.
    pub async fn init(&self) -> StoreStatus {
        self.connection().await;
        self.status()
    }

    pub fn status(&self) -> StoreStatus {
        match self.inner.conn.get() {
            None => StoreStatus::Uninitialized,
            Some(Some(_)) => StoreStatus::Ready {
                schema_version: self.inner.schema.version,
            },
            Some(None) => StoreStatus::Unavailable,
        }
    }

    /// Opens the store if needed and reports whether it persists anything.
    pub async fn is_available(&self) -> bool {
        self.connection().await.is_some()
    }

    /// Number of schema passes (table/index creation) this handle has run.
    pub fn schema_passes(&self) -> usize {
        self.inner.schema_passes.load(Ordering::SeqCst)
    }

    async fn connection(&self) -> Option<SharedConn> {
        self.inner.conn.get_or_init(|| self.open()).await.clone()
    }

    async fn open(&self) -> Option<SharedConn> {
        let location = self.inner.location.clone();
        if location == StoreLocation::Unavailable {
            info!("no storage medium, local store running in no-op mode");
            return None;
        }

        let schema = self.inner.schema.clone();
        let opened =
            tokio::task::spawn_blocking(move || open_and_migrate(&location, &schema)).await;

        match opened {
            Ok(Ok((conn, pass))) => {
                if let SchemaPass::Upgraded { from } = pass {
                    self.inner.schema_passes.fetch_add(1, Ordering::SeqCst);
                    info!(
                        "local store schema upgraded v{from} -> v{}",
                        self.inner.schema.version
                    );
                }
                Some(Arc::new(Mutex::new(conn)))
            }
            Ok(Err(e)) => {
                warn!("failed to open local store, running in no-op mode: {e}");
                None
            }
            Err(e) => {
                warn!("local store open task failed, running in no-op mode: {e}");
                None
            }
        }
    }

    // ── Primitives ──────────────────────────────────────────────

    /// Reads one record by primary key.
    pub async fn get<T: DeserializeOwned>(
        &self,
        collection: Collection,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let Some(conn) = self.connection().await else {
            return Ok(None);
        };
        let key = key.to_owned();
        let raw = run(conn, move |c| {
            let sql = format!("SELECT data FROM \"{collection}\" WHERE id = ?1");
            Ok(c.query_row(&sql, params![key], |row| row.get::<_, String>(0))
                .optional()?)
        })
        .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Reads every record of a collection, ordered by primary key.
    ///
    /// Rows that fail to decode as `T` are skipped with a warning.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        collection: Collection,
    ) -> StorageResult<Vec<T>> {
        let Some(conn) = self.connection().await else {
            return Ok(Vec::new());
        };
        let rows = run(conn, move |c| {
            let sql = format!("SELECT id, data FROM \"{collection}\" ORDER BY id");
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

        Ok(decode_rows(collection, rows))
    }

    /// Scans a collection by one of its declared secondary indexes.
    pub async fn get_all_by_index<T: DeserializeOwned>(
        &self,
        collection: Collection,
        field: &str,
        value: &Value,
    ) -> StorageResult<Vec<T>> {
        if !self.inner.schema.has_index(collection, field) {
            return Err(StorageError::UnknownIndex {
                collection: collection.as_str(),
                field: field.to_owned(),
            });
        }
        let Some(conn) = self.connection().await else {
            return Ok(Vec::new());
        };
        let field = field.to_owned();
        let needle = sql_value(value);
        let rows = run(conn, move |c| {
            let sql = format!(
                "SELECT id, data FROM \"{collection}\" \
                 WHERE json_extract(data, '$.{field}') IS ?1 ORDER BY id"
            );
            let mut stmt = c.prepare(&sql)?;
            let rows = stmt
                .query_map(params![needle], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await?;

        Ok(decode_rows(collection, rows))
    }

    /// Inserts or overwrites one record under `key`.
    pub async fn put<T: Serialize + ?Sized>(
        &self,
        collection: Collection,
        key: &str,
        record: &T,
    ) -> StorageResult<()> {
        let data = serde_json::to_string(record)?;
        let Some(conn) = self.connection().await else {
            return Ok(());
        };
        let key = key.to_owned();
        run(conn, move |c| {
            let sql = format!("INSERT OR REPLACE INTO \"{collection}\" (id, data) VALUES (?1, ?2)");
            c.execute(&sql, params![key, data])?;
            Ok(())
        })
        .await
    }

    /// Overwrites the record under `key` only if one is already there.
    /// Returns whether a row was written.
    pub async fn replace_existing<T: Serialize + ?Sized>(
        &self,
        collection: Collection,
        key: &str,
        record: &T,
    ) -> StorageResult<bool> {
        let data = serde_json::to_string(record)?;
        let Some(conn) = self.connection().await else {
            return Ok(false);
        };
        let key = key.to_owned();
        run(conn, move |c| {
            let sql = format!("UPDATE \"{collection}\" SET data = ?2 WHERE id = ?1");
            Ok(c.execute(&sql, params![key, data])? > 0)
        })
        .await
    }

    /// Deletes one record. Deleting a missing key is not an error.
    pub async fn delete(&self, collection: Collection, key: &str) -> StorageResult<()> {
        let Some(conn) = self.connection().await else {
            return Ok(());
        };
        let key = key.to_owned();
        run(conn, move |c| {
            c.execute(&format!("DELETE FROM \"{collection}\" WHERE id = ?1"), params![key])?;
            Ok(())
        })
        .await
    }

    /// Removes every record of a collection.
    pub async fn clear(&self, collection: Collection) -> StorageResult<()> {
        let Some(conn) = self.connection().await else {
            return Ok(());
        };
        run(conn, move |c| {
            c.execute(&format!("DELETE FROM \"{collection}\""), [])?;
            Ok(())
        })
        .await
    }

    /// Replaces a collection's entire membership with `records`.
    ///
    /// Anything cached locally but absent from `records` is dropped. Records
    /// without a primary key are skipped with a warning. Returns the number
    /// of records written.
    pub async fn clear_and_replace<T: Serialize>(
        &self,
        collection: Collection,
        records: &[T],
    ) -> StorageResult<usize> {
        let mut rows = Vec::with_capacity(records.len());
        for record in records {
            let value = serde_json::to_value(record)?;
            match record_key(&value) {
                Some(key) => rows.push((key, serde_json::to_string(&value)?)),
                None => warn!("skipping {collection} record without a primary key"),
            }
        }

        let Some(conn) = self.connection().await else {
            return Ok(0);
        };
        run(conn, move |c| {
            let tx = c.transaction()?;
            tx.execute(&format!("DELETE FROM \"{collection}\""), [])?;
            {
                let sql =
                    format!("INSERT OR REPLACE INTO \"{collection}\" (id, data) VALUES (?1, ?2)");
                let mut stmt = tx.prepare(&sql)?;
                for (key, data) in &rows {
                    stmt.execute(params![key, data])?;
                }
            }
            tx.commit()?;
            debug!("replaced {collection} with {} records", rows.len());
            Ok(rows.len())
        })
        .await
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: Collection) -> StorageResult<usize> {
        let Some(conn) = self.connection().await else {
            return Ok(0);
        };
        run(conn, move |c| {
            let n: i64 =
                c.query_row(&format!("SELECT COUNT(*) FROM \"{collection}\""), [], |row| {
                    row.get(0)
                })?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
        .await
    }

    /// Clears every collection except `settings`, in one transaction.
    ///
    /// Used on logout; tokens live in `settings` and are cleared through
    /// the token vault.
    pub async fn wipe(&self) -> StorageResult<()> {
        let Some(conn) = self.connection().await else {
            return Ok(());
        };
        let collections: Vec<Collection> = self
            .inner
            .schema
            .collections
            .iter()
            .map(|s| s.collection)
            .filter(|c| *c != Collection::Settings)
            .collect();
        run(conn, move |c| {
            let tx = c.transaction()?;
            for collection in &collections {
                tx.execute(&format!("DELETE FROM \"{collection}\""), [])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// A typed view over one collection.
    pub fn collection<T: Record>(&self, collection: Collection) -> CollectionHandle<T> {
        CollectionHandle {
            store: self.clone(),
            collection,
            _record: PhantomData,
        }
    }
}

/// Typed access to a single collection.
pub struct CollectionHandle<T> {
    store: LocalStore,
    collection: Collection,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for CollectionHandle<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            collection: self.collection,
            _record: PhantomData,
        }
    }
}

impl<T: Record> CollectionHandle<T> {
    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<T>> {
        self.store.get(self.collection, key).await
    }

    pub async fn all(&self) -> StorageResult<Vec<T>> {
        self.store.get_all(self.collection).await
    }

    pub async fn by_index(&self, field: &str, value: &Value) -> StorageResult<Vec<T>> {
        self.store.get_all_by_index(self.collection, field, value).await
    }

    /// Upserts a record under its own primary key.
    pub async fn put(&self, record: &T) -> StorageResult<()> {
        let key = record.key().ok_or(StorageError::MissingKey {
            collection: self.collection.as_str(),
        })?;
        self.store.put(self.collection, &key, record).await
    }

    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        self.store.delete(self.collection, key).await
    }

    pub async fn clear(&self) -> StorageResult<()> {
        self.store.clear(self.collection).await
    }

    pub async fn replace_all(&self, records: &[T]) -> StorageResult<usize> {
        self.store.clear_and_replace(self.collection, records).await
    }
}

fn open_and_migrate(
    location: &StoreLocation,
    schema: &Schema,
) -> StorageResult<(Connection, SchemaPass)> {
    let mut conn = match location {
        StoreLocation::File(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            crate::open_sqlite(path)?
        }
        StoreLocation::InMemory => Connection::open_in_memory()?,
        StoreLocation::Unavailable => {
            return Err(StorageError::Schema("no storage medium".to_string()));
        }
    };
    let pass = schema::migrate(&mut conn, schema)?;
    Ok((conn, pass))
}

/// Runs a closure against the connection on the blocking pool.
async fn run<T, F>(conn: SharedConn, f: F) -> StorageResult<T>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = conn.lock().map_err(|_| StorageError::Poisoned)?;
        f(&mut guard)
    })
    .await?
}

fn decode_rows<T: DeserializeOwned>(collection: Collection, rows: Vec<(String, String)>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|(id, data)| match serde_json::from_str(&data) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("skipping undecodable {collection} record {id}: {e}");
                None
            }
        })
        .collect()
}

/// Maps a JSON scalar onto the value `json_extract` would yield for it.
fn sql_value(value: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match value {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Sql::Integer(i),
            None => n.as_f64().map_or(Sql::Null, Sql::Real),
        },
        Value::String(s) => Sql::Text(s.clone()),
        other => Sql::Text(other.to_string()),
    }
}
