//! Pulls server state into the local mirror.
//!
//! Each binding is reconciled on its own: a failure is logged, reported
//! and skipped, and the remaining collections still sync.

use crate::api_client::RemoteApi;
use crate::config::{MergeStrategy, SyncBinding};
use crate::error::{CloudError, CloudResult};
use crate::merge::{plan_lww, shallow_merge};
use crate::types::{CollectionFailure, SyncEvent, SyncReport};
use serde_json::Value;
use std::sync::Arc;
use tidemark_storage::LocalStore;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct SyncReconciler {
    store: LocalStore,
    api: Arc<dyn RemoteApi>,
    bindings: Vec<SyncBinding>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncReconciler {
    pub fn new(
        store: LocalStore,
        api: Arc<dyn RemoteApi>,
        bindings: Vec<SyncBinding>,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            store,
            api,
            bindings,
            events,
        }
    }

    pub fn bindings(&self) -> &[SyncBinding] {
        &self.bindings
    }

    /// Reconciles every binding in order.
    pub async fn sync_all(&self) -> SyncReport {
        let mut report = SyncReport::default();
        for binding in &self.bindings {
            match self.sync_binding(binding).await {
                Ok(records) => {
                    debug!("synced {} ({records} records)", binding.collection);
                    report.synced.push(binding.collection);
                    let _ = self.events.send(SyncEvent::CollectionSynced {
                        collection: binding.collection,
                        records,
                    });
                }
                Err(e) => {
                    warn!("sync of {} from {} failed: {e}", binding.collection, binding.endpoint);
                    let failure = CollectionFailure {
                        collection: binding.collection,
                        endpoint: binding.endpoint.clone(),
                        error: e.to_string(),
                    };
                    let _ = self.events.send(SyncEvent::CollectionFailed(failure.clone()));
                    report.failed.push(failure);
                }
            }
        }
        info!(
            "sync finished: {} synced, {} failed",
            report.synced.len(),
            report.failed.len()
        );
        let _ = self.events.send(SyncEvent::SyncCompleted(report.clone()));
        report
    }

    /// Reconciles one binding. Returns the number of records written.
    pub async fn sync_binding(&self, binding: &SyncBinding) -> CloudResult<usize> {
        let data = self.api.fetch(&binding.endpoint).await?;
        let collection = binding.collection;

        match &binding.strategy {
            MergeStrategy::FullReplace => {
                let records = into_list(data, &binding.endpoint)?;
                Ok(self.store.clear_and_replace(collection, &records).await?)
            }
            MergeStrategy::LastWriterWins => {
                let server = into_list(data, &binding.endpoint)?;
                let local: Vec<Value> = self.store.get_all(collection).await?;
                let plan = plan_lww(&local, &server);
                for (key, record) in &plan.upserts {
                    self.store.put(collection, key, record).await?;
                }
                for key in &plan.deletions {
                    self.store.delete(collection, key).await?;
                }
                debug!(
                    "{collection}: {} written, {} kept, {} removed",
                    plan.upserts.len(),
                    plan.kept,
                    plan.deletions.len()
                );
                Ok(plan.upserts.len())
            }
            MergeStrategy::ShallowMerge { key } => {
                if data.is_null() {
                    return Err(CloudError::Api(format!(
                        "{} returned no data",
                        binding.endpoint
                    )));
                }
                let local: Option<Value> = self.store.get(collection, key).await?;
                let mut merged = shallow_merge(local.as_ref(), &data);
                if let Some(obj) = merged.as_object_mut() {
                    obj.insert("id".to_string(), Value::String(key.clone()));
                }
                self.store.put(collection, key, &merged).await?;
                Ok(1)
            }
        }
    }
}

fn into_list(data: Value, endpoint: &str) -> CloudResult<Vec<Value>> {
    match data {
        Value::Array(records) => Ok(records),
        other => Err(CloudError::Api(format!(
            "expected a list from {endpoint}, got {}",
            kind(&other)
        ))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
