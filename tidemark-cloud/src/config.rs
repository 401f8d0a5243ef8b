//! Sync engine configuration.

use crate::error::{CloudError, CloudResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tidemark_storage::{
    AI_SETTINGS_KEY, APP_SETTINGS_KEY, Collection, LegacyTokenFile, LocalStore, StoreLocation,
    TokenVault,
};

/// How a collection is brought in line with the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeStrategy {
    /// The server list replaces the local collection wholesale.
    FullReplace,
    /// Per-record timestamp comparison; server membership still wins.
    LastWriterWins,
    /// A single record whose server fields overlay the local ones.
    ShallowMerge { key: String },
}

/// One server endpoint feeding one local collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBinding {
    pub collection: Collection,
    pub endpoint: String,
    pub strategy: MergeStrategy,
}

impl SyncBinding {
    pub fn new(collection: Collection, endpoint: impl Into<String>, strategy: MergeStrategy) -> Self {
        Self {
            collection,
            endpoint: endpoint.into(),
            strategy,
        }
    }

    /// The bindings for every server-owned collection.
    pub fn defaults() -> Vec<SyncBinding> {
        use MergeStrategy::*;
        vec![
            SyncBinding::new(Collection::Folders, "/api/folders", FullReplace),
            SyncBinding::new(Collection::Tags, "/api/tags", FullReplace),
            SyncBinding::new(Collection::Workspaces, "/api/workspaces", FullReplace),
            SyncBinding::new(Collection::Templates, "/api/templates", FullReplace),
            SyncBinding::new(Collection::AiAssistants, "/api/ai/assistants", FullReplace),
            SyncBinding::new(Collection::AiModels, "/api/ai/models", FullReplace),
            SyncBinding::new(Collection::Notes, "/api/notes", LastWriterWins),
            SyncBinding::new(Collection::AiConversations, "/api/ai/conversations", LastWriterWins),
            SyncBinding::new(
                Collection::Settings,
                "/api/settings",
                ShallowMerge {
                    key: APP_SETTINGS_KEY.to_string(),
                },
            ),
            SyncBinding::new(
                Collection::Settings,
                "/api/ai/settings",
                ShallowMerge {
                    key: AI_SETTINGS_KEY.to_string(),
                },
            ),
        ]
    }
}

/// Configuration for the sync service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL for the Tidemark API (e.g., "https://api.tidemark.app").
    pub api_base_url: String,

    /// Period of the background drain while auto-sync runs (seconds).
    pub drain_interval_secs: u64,

    /// Failed replays an item survives before it is dropped.
    pub max_retries: u32,

    /// Per-request timeout (seconds).
    pub request_timeout_secs: u64,

    /// Collections reconciled by `sync_now`, in order.
    pub bindings: Vec<SyncBinding>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.tidemark.app".to_string(),
            drain_interval_secs: 30,
            max_retries: 3,
            request_timeout_secs: 30,
            bindings: SyncBinding::defaults(),
        }
    }
}

impl SyncConfig {
    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> CloudResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: SyncConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CloudResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(CloudError::Config("api_base_url is empty".to_string()));
        }
        if self.drain_interval_secs == 0 {
            return Err(CloudError::Config(
                "drain_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Creates a config pointing at a local dev server.
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            api_base_url: "http://localhost:3002".to_string(),
            drain_interval_secs: 5,
            request_timeout_secs: 5,
            ..Self::default()
        }
    }
}

/// Where the local mirror and any legacy tokens live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub location: StoreLocation,
    #[serde(default)]
    pub legacy_token_file: Option<PathBuf>,
}

impl StoreConfig {
    /// Default layout inside an application data directory.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            location: StoreLocation::in_dir(dir.as_ref()),
            legacy_token_file: Some(dir.as_ref().join("auth.json")),
        }
    }

    /// Builds the store handle and the token vault on top of it.
    pub fn open(&self) -> (LocalStore, TokenVault) {
        let store = LocalStore::new(self.location.clone());
        let mut vault = TokenVault::new(store.clone());
        if let Some(path) = &self.legacy_token_file {
            vault = vault.with_legacy_source(Arc::new(LegacyTokenFile::new(path)));
        }
        (store, vault)
    }
}
