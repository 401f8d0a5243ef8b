//! Access/refresh token persistence with one-time legacy migration.
//!
//! Tokens live in the `"auth"` record of the `settings` collection. Older
//! installs kept them in a separate legacy location; the first load copies
//! them over and erases the legacy copy. A session copy is kept in memory so
//! a store in no-op mode still has tokens for the lifetime of the process.

use crate::error::StorageResult;
use crate::schema::Collection;
use crate::store::LocalStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Well-known key of the token record.
pub const AUTH_RECORD_KEY: &str = "auth";

/// The persisted credential pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub id: String,
    pub access_token: String,
    pub refresh_token: String,
}

impl TokenRecord {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            id: AUTH_RECORD_KEY.to_string(),
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Tokens as found in the legacy location.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// A pre-store location tokens may still be sitting in.
pub trait LegacyTokenSource: Send + Sync {
    fn load(&self) -> StorageResult<Option<LegacyTokens>>;
    fn erase(&self) -> StorageResult<()>;
}

/// Legacy tokens kept as a small JSON file `{ accessToken, refreshToken }`.
#[derive(Clone, Debug)]
pub struct LegacyTokenFile {
    path: PathBuf,
}

impl LegacyTokenFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LegacyTokenSource for LegacyTokenFile {
    fn load(&self) -> StorageResult<Option<LegacyTokens>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str::<LegacyTokens>(&raw) {
            Ok(tokens) if !tokens.access_token.is_empty() => Ok(Some(tokens)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!("ignoring unreadable legacy token file {}: {e}", self.path.display());
                Ok(None)
            }
        }
    }

    fn erase(&self) -> StorageResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Result of [`TokenVault::migrate_legacy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// Legacy tokens were copied into the store and the legacy copy erased.
    Migrated,
    /// The store already held tokens; any legacy copy was erased.
    AlreadyMigrated,
    /// Nothing to migrate.
    NoLegacyTokens,
    /// The store is in no-op mode; legacy tokens were loaded for this
    /// session only and left in place.
    StoreUnavailable,
}

/// Token persistence on top of the local store.
#[derive(Clone)]
pub struct TokenVault {
    store: LocalStore,
    legacy: Option<Arc<dyn LegacyTokenSource>>,
    session: Arc<RwLock<Option<TokenRecord>>>,
}

impl TokenVault {
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            legacy: None,
            session: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_legacy_source(mut self, source: Arc<dyn LegacyTokenSource>) -> Self {
        self.legacy = Some(source);
        self
    }

    pub async fn save_tokens(
        &self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> StorageResult<()> {
        let record = TokenRecord::new(access_token, refresh_token);
        *self.session.write().await = Some(record.clone());
        self.store
            .put(Collection::Settings, AUTH_RECORD_KEY, &record)
            .await
    }

    /// Current tokens, from the store if it persists anything, else from
    /// this session.
    pub async fn tokens(&self) -> StorageResult<Option<TokenRecord>> {
        if self.store.is_available().await {
            return self.store.get(Collection::Settings, AUTH_RECORD_KEY).await;
        }
        Ok(self.session.read().await.clone())
    }

    /// Access token for request headers. Storage errors read as "none".
    pub async fn access_token(&self) -> Option<String> {
        match self.tokens().await {
            Ok(tokens) => tokens.map(|t| t.access_token),
            Err(e) => {
                warn!("failed to read tokens: {e}");
                None
            }
        }
    }

    pub async fn clear_tokens(&self) -> StorageResult<()> {
        *self.session.write().await = None;
        self.store
            .delete(Collection::Settings, AUTH_RECORD_KEY)
            .await
    }

    /// Moves tokens out of the legacy location, at most once.
    ///
    /// Repeated calls are no-ops: after a successful migration the legacy
    /// location is empty and the store already holds the record.
    pub async fn migrate_legacy(&self) -> StorageResult<MigrationOutcome> {
        let Some(legacy) = self.legacy.as_ref() else {
            return Ok(MigrationOutcome::NoLegacyTokens);
        };

        if !self.store.is_available().await {
            if let Some(found) = legacy.load()? {
                debug!("store unavailable, using legacy tokens for this session");
                *self.session.write().await =
                    Some(TokenRecord::new(found.access_token, found.refresh_token));
            }
            return Ok(MigrationOutcome::StoreUnavailable);
        }

        if self
            .store
            .get::<TokenRecord>(Collection::Settings, AUTH_RECORD_KEY)
            .await?
            .is_some()
        {
            if legacy.load()?.is_some() {
                debug!("tokens already in store, erasing stale legacy copy");
                legacy.erase()?;
            }
            return Ok(MigrationOutcome::AlreadyMigrated);
        }

        let Some(found) = legacy.load()? else {
            return Ok(MigrationOutcome::NoLegacyTokens);
        };

        self.save_tokens(found.access_token, found.refresh_token)
            .await?;
        legacy.erase()?;
        info!("migrated auth tokens from legacy location");
        Ok(MigrationOutcome::Migrated)
    }
}
