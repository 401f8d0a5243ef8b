//! Collection catalogue and additive schema migration.
//!
//! Every collection is a table `(id TEXT PRIMARY KEY, data TEXT NOT NULL)`.
//! Secondary indexes are expression indexes over `json_extract(data, '$.field')`
//! and exist only to speed up scans; uniqueness is enforced by the key alone.
//!
//! The schema version lives in `PRAGMA user_version`. Opening a store whose
//! version is older than [`Schema::version`] creates whatever tables and
//! indexes are missing, then bumps the version. Nothing is ever dropped.

use crate::error::{StorageError, StorageResult};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 3;

/// File name used when the store is placed in an application data directory.
pub const STORE_FILE_NAME: &str = "tidemark.sqlite3";

/// A named logical table in the local mirror.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Notes,
    Folders,
    Tags,
    Workspaces,
    Templates,
    AiConversations,
    AiFavorites,
    AiPrompts,
    AiAssistants,
    AiModels,
    AiDrafts,
    Attachments,
    Settings,
    OfflineQueue,
}

impl Collection {
    pub const ALL: [Collection; 14] = [
        Collection::Notes,
        Collection::Folders,
        Collection::Tags,
        Collection::Workspaces,
        Collection::Templates,
        Collection::AiConversations,
        Collection::AiFavorites,
        Collection::AiPrompts,
        Collection::AiAssistants,
        Collection::AiModels,
        Collection::AiDrafts,
        Collection::Attachments,
        Collection::Settings,
        Collection::OfflineQueue,
    ];

    /// Table name, also used in logs and errors.
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Notes => "notes",
            Collection::Folders => "folders",
            Collection::Tags => "tags",
            Collection::Workspaces => "workspaces",
            Collection::Templates => "templates",
            Collection::AiConversations => "ai_conversations",
            Collection::AiFavorites => "ai_favorites",
            Collection::AiPrompts => "ai_prompts",
            Collection::AiAssistants => "ai_assistants",
            Collection::AiModels => "ai_models",
            Collection::AiDrafts => "ai_drafts",
            Collection::Attachments => "attachments",
            Collection::Settings => "settings",
            Collection::OfflineQueue => "offline_queue",
        }
    }

    /// Field of the payload that holds the primary key.
    pub fn key_path(self) -> &'static str {
        "id"
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collection together with the payload fields it is indexed on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionSpec {
    pub collection: Collection,
    pub indexes: Vec<&'static str>,
}

impl CollectionSpec {
    pub fn new(collection: Collection, indexes: &[&'static str]) -> Self {
        Self {
            collection,
            indexes: indexes.to_vec(),
        }
    }
}

/// The set of collections a store is opened with, at a given version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Schema {
    pub version: u32,
    pub collections: Vec<CollectionSpec>,
}

impl Schema {
    /// The schema this build of Tidemark ships with.
    pub fn current() -> Self {
        use Collection::*;
        Self {
            version: SCHEMA_VERSION,
            collections: vec![
                CollectionSpec::new(Notes, &["folderId", "workspaceId", "updatedAt"]),
                CollectionSpec::new(Folders, &["parentId", "workspaceId"]),
                CollectionSpec::new(Tags, &[]),
                CollectionSpec::new(Workspaces, &[]),
                CollectionSpec::new(Templates, &["workspaceId"]),
                CollectionSpec::new(AiConversations, &["updatedAt"]),
                CollectionSpec::new(AiFavorites, &["conversationId"]),
                CollectionSpec::new(AiPrompts, &[]),
                CollectionSpec::new(AiAssistants, &[]),
                CollectionSpec::new(AiModels, &[]),
                CollectionSpec::new(AiDrafts, &["conversationId"]),
                CollectionSpec::new(Attachments, &["noteId"]),
                CollectionSpec::new(Settings, &[]),
                CollectionSpec::new(OfflineQueue, &["timestamp"]),
            ],
        }
    }

    pub fn spec(&self, collection: Collection) -> Option<&CollectionSpec> {
        self.collections.iter().find(|s| s.collection == collection)
    }

    pub fn has_index(&self, collection: Collection, field: &str) -> bool {
        self.spec(collection)
            .is_some_and(|s| s.indexes.iter().any(|f| *f == field))
    }
}

/// What opening the store did to its schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SchemaPass {
    /// Stored version already matched; nothing was touched.
    UpToDate,
    /// Missing tables/indexes were created and the version bumped.
    Upgraded { from: u32 },
}

pub(crate) fn index_name(collection: Collection, field: &str) -> String {
    format!("idx_{}_{}", collection.as_str(), field)
}

pub(crate) fn stored_version(conn: &Connection) -> StorageResult<u32> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    u32::try_from(version)
        .map_err(|_| StorageError::Schema(format!("invalid stored schema version {version}")))
}

/// Bring the physical store up to `schema.version`, additively.
///
/// Runs in a single transaction: either every missing table and index is
/// created and the version bumped, or nothing changes.
pub(crate) fn migrate(conn: &mut Connection, schema: &Schema) -> StorageResult<SchemaPass> {
    let from = stored_version(conn)?;

    if from > schema.version {
        return Err(StorageError::Schema(format!(
            "store is at schema version {from}, newer than supported version {}",
            schema.version
        )));
    }
    if from == schema.version {
        return Ok(SchemaPass::UpToDate);
    }

    let tx = conn.transaction()?;
    for spec in &schema.collections {
        let table = spec.collection.as_str();
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                id TEXT PRIMARY KEY NOT NULL,
                data TEXT NOT NULL
            );"
        ))?;
        for field in &spec.indexes {
            let index = index_name(spec.collection, field);
            tx.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS \"{index}\" ON \"{table}\"(json_extract(data, '$.{field}'));"
            ))?;
        }
    }
    tx.pragma_update(None, "user_version", i64::from(schema.version))?;
    tx.commit()?;

    Ok(SchemaPass::Upgraded { from })
}
