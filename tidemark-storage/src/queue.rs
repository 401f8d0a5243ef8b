//! Durable FIFO of mutations waiting to be replayed against the server.
//!
//! Items live in the `offline_queue` collection. Order is by enqueue
//! timestamp, ties broken by the time-ordered (UUIDv7) id. The queue never
//! inspects or rewrites a body: whatever was intended at enqueue time is
//! what gets replayed.
//!
//! If the local store is running in no-op mode, items are kept in memory
//! for the lifetime of the process so replay still works against the
//! network alone.

use crate::clock::{Clock, SystemClock};
use crate::error::{StorageError, StorageResult};
use crate::schema::Collection;
use crate::store::LocalStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;
use uuid::Uuid;

/// HTTP verb of a queued mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(StorageError::InvalidMethod(s.to_string())),
        }
    }
}

/// A pending mutation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: String,
    pub method: Method,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Enqueue time, milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub retries: u32,
}

/// Aggregate counts for status indicators.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub total: usize,
    /// Items never attempted or never failed (`retries == 0`).
    pub pending: usize,
    /// Items that have failed at least once (`retries > 0`).
    pub retries: usize,
}

impl QueueStatus {
    pub fn from_items(items: &[QueueItem]) -> Self {
        let retrying = items.iter().filter(|i| i.retries > 0).count();
        Self {
            total: items.len(),
            pending: items.len() - retrying,
            retries: retrying,
        }
    }
}

/// The offline mutation queue.
#[derive(Clone)]
pub struct OfflineQueue {
    store: LocalStore,
    clock: Arc<dyn Clock>,
    durable: Arc<OnceCell<bool>>,
    volatile: Arc<Mutex<Vec<QueueItem>>>,
}

impl OfflineQueue {
    pub fn new(store: LocalStore) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: LocalStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            durable: Arc::new(OnceCell::new()),
            volatile: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Appends a mutation and returns its id. Only performs a local write.
    pub async fn enqueue(
        &self,
        method: Method,
        url: impl Into<String>,
        body: Option<Value>,
    ) -> StorageResult<String> {
        let item = QueueItem {
            id: Uuid::now_v7().to_string(),
            method,
            url: url.into(),
            body,
            timestamp: self.clock.now_millis(),
            retries: 0,
        };
        debug!("enqueued {} {} as {}", item.method, item.url, item.id);
        let id = item.id.clone();
        self.update(&item).await?;
        Ok(id)
    }

    /// All items, oldest first.
    pub async fn get_all(&self) -> StorageResult<Vec<QueueItem>> {
        let mut items = if self.is_durable().await {
            self.store.get_all::<QueueItem>(Collection::OfflineQueue).await?
        } else {
            self.lock_volatile()?.clone()
        };
        items.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(items)
    }

    /// Whether `id` is still queued.
    pub async fn contains(&self, id: &str) -> StorageResult<bool> {
        if self.is_durable().await {
            let found: Option<Value> = self.store.get(Collection::OfflineQueue, id).await?;
            return Ok(found.is_some());
        }
        Ok(self.lock_volatile()?.iter().any(|i| i.id == id))
    }

    /// Writes an item under its id, inserting it if absent.
    pub async fn update(&self, item: &QueueItem) -> StorageResult<()> {
        if self.is_durable().await {
            return self.store.put(Collection::OfflineQueue, &item.id, item).await;
        }
        let mut volatile = self.lock_volatile()?;
        match volatile.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => *existing = item.clone(),
            None => volatile.push(item.clone()),
        }
        Ok(())
    }

    /// Persists a new retry count for an item that is still queued.
    ///
    /// Returns `false` without writing if the item was removed or the queue
    /// cleared in the meantime.
    pub async fn requeue(&self, item: &QueueItem) -> StorageResult<bool> {
        if self.is_durable().await {
            return self
                .store
                .replace_existing(Collection::OfflineQueue, &item.id, item)
                .await;
        }
        let mut volatile = self.lock_volatile()?;
        match volatile.iter_mut().find(|i| i.id == item.id) {
            Some(existing) => {
                *existing = item.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn remove(&self, id: &str) -> StorageResult<()> {
        if self.is_durable().await {
            return self.store.delete(Collection::OfflineQueue, id).await;
        }
        self.lock_volatile()?.retain(|i| i.id != id);
        Ok(())
    }

    pub async fn clear(&self) -> StorageResult<()> {
        if self.is_durable().await {
            return self.store.clear(Collection::OfflineQueue).await;
        }
        self.lock_volatile()?.clear();
        Ok(())
    }

    pub async fn len(&self) -> StorageResult<usize> {
        Ok(self.get_all().await?.len())
    }

    pub async fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len().await? == 0)
    }

    pub async fn status(&self) -> StorageResult<QueueStatus> {
        Ok(QueueStatus::from_items(&self.get_all().await?))
    }

    /// Store availability is fixed once its init settles, so it is
    /// resolved a single time per queue.
    async fn is_durable(&self) -> bool {
        *self
            .durable
            .get_or_init(|| self.store.is_available())
            .await
    }

    fn lock_volatile(&self) -> StorageResult<std::sync::MutexGuard<'_, Vec<QueueItem>>> {
        self.volatile.lock().map_err(|_| StorageError::Poisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parses_case_insensitively() {
        assert_eq!("patch".parse::<Method>().unwrap(), Method::Patch);
        assert_eq!("DELETE".parse::<Method>().unwrap(), Method::Delete);
        assert!(matches!(
            "TRACE".parse::<Method>(),
            Err(StorageError::InvalidMethod(_))
        ));
    }

    #[test]
    fn method_serializes_uppercase() {
        assert_eq!(serde_json::to_string(&Method::Put).unwrap(), "\"PUT\"");
    }

    #[test]
    fn queue_item_uses_camel_case_and_omits_empty_body() {
        let item = QueueItem {
            id: "q1".into(),
            method: Method::Delete,
            url: "/api/notes/1".into(),
            body: None,
            timestamp: 7,
            retries: 0,
        };
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["method"], "DELETE");
        assert!(json.get("body").is_none());
    }

    #[test]
    fn status_splits_pending_and_retrying() {
        let mk = |id: &str, retries| QueueItem {
            id: id.into(),
            method: Method::Post,
            url: "/x".into(),
            body: None,
            timestamp: 0,
            retries,
        };
        let status = QueueStatus::from_items(&[mk("a", 0), mk("b", 2), mk("c", 0)]);
        assert_eq!(
            status,
            QueueStatus {
                total: 3,
                pending: 2,
                retries: 1
            }
        );
    }
}
