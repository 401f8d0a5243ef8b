//! Shared types for sync operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tidemark_storage::{Collection, Method, MigrationOutcome, StoreStatus};

/// Response envelope used by every API endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorBody>,
}

/// Error detail of a failed envelope.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// A write the application wants the server to see.
///
/// `cache_in` names the local collection that mirrors the resource, so the
/// service can apply the server's answer (or the optimistic body) locally.
#[derive(Clone, Debug, PartialEq)]
pub struct Mutation {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub cache_in: Option<Collection>,
    /// Key of the cached record when the body does not carry one (deletes).
    pub record_id: Option<String>,
}

impl Mutation {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            cache_in: None,
            record_id: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn cache_in(mut self, collection: Collection) -> Self {
        self.cache_in = Some(collection);
        self
    }

    pub fn record_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }
}

/// How a submitted mutation reached (or will reach) the server.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// Sent live; carries the server's `data`, if any.
    Sent(Option<Value>),
    /// Applied optimistically and queued for replay under this id.
    Queued { id: String },
}

/// Why a drain did or did not run to the end of its snapshot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainRun {
    #[default]
    Completed,
    /// Connectivity dropped mid-drain; the rest waits for the next one.
    Interrupted,
    SkippedOffline,
    SkippedBusy,
}

/// Summary of one drain pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrainReport {
    pub run: DrainRun,
    pub replayed: usize,
    pub requeued: usize,
    pub dropped: usize,
    /// Items removed from the queue by someone else while the pass ran.
    #[serde(default)]
    pub withdrawn: usize,
    /// Queue writes that failed. The affected items stay queued and may be
    /// sent again on the next pass.
    #[serde(default)]
    pub storage_errors: usize,
    /// Items still queued when the pass ended.
    pub remaining: usize,
}

impl DrainReport {
    pub fn skipped(run: DrainRun) -> Self {
        Self {
            run,
            ..Self::default()
        }
    }

    pub fn ran(&self) -> bool {
        matches!(self.run, DrainRun::Completed | DrainRun::Interrupted)
    }
}

/// A collection that failed to reconcile.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionFailure {
    pub collection: Collection,
    pub endpoint: String,
    pub error: String,
}

/// Summary of one reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub synced: Vec<Collection>,
    pub failed: Vec<CollectionFailure>,
    /// True when the pass was not attempted because the device is offline.
    pub offline: bool,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        !self.offline && self.failed.is_empty()
    }
}

/// What `SyncService::init` found and did.
#[derive(Clone, Debug, PartialEq)]
pub struct InitReport {
    pub store: StoreStatus,
    pub migration: Option<MigrationOutcome>,
    pub sync: Option<SyncReport>,
}

/// Observable sync activity, broadcast to any subscriber.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncEvent {
    ConnectivityChanged { online: bool },
    ItemReplayed { id: String },
    ItemRequeued { id: String, retries: u32 },
    ItemDropped { id: String, method: Method, url: String },
    DrainCompleted(DrainReport),
    CollectionSynced { collection: Collection, records: usize },
    CollectionFailed(CollectionFailure),
    SyncCompleted(SyncReport),
}
