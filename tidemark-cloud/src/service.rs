//! The sync façade the application talks to.
//!
//! Wires the local store, offline queue, token vault, connectivity monitor,
//! drainer and reconciler together. Everything is constructed once and
//! shared through a cheap-to-clone [`SyncService`] handle.

use crate::api_client::{ApiClient, RemoteApi};
use crate::config::{StoreConfig, SyncConfig};
use crate::connectivity::ConnectivityMonitor;
use crate::drainer::{QueueDrainer, RetryPolicy};
use crate::error::CloudResult;
use crate::reconciler::SyncReconciler;
use crate::types::*;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tidemark_storage::{
    Clock, LocalStore, Method, OfflineQueue, QueueStatus, StoreStatus, SystemClock, TokenVault,
    record_key,
};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Handle to the sync engine. Clones share all state.
#[derive(Clone)]
pub struct SyncService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: SyncConfig,
    store: LocalStore,
    queue: OfflineQueue,
    vault: TokenVault,
    api: Arc<dyn RemoteApi>,
    connectivity: ConnectivityMonitor,
    drainer: QueueDrainer,
    reconciler: SyncReconciler,
    events: broadcast::Sender<SyncEvent>,
    auto_sync: Mutex<Option<AutoSync>>,
}

struct AutoSync {
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Assembles a [`SyncService`] from its parts.
pub struct SyncServiceBuilder {
    config: SyncConfig,
    store: LocalStore,
    vault: TokenVault,
    api: Arc<dyn RemoteApi>,
    connectivity: Option<ConnectivityMonitor>,
    clock: Option<Arc<dyn Clock>>,
}

impl SyncServiceBuilder {
    pub fn connectivity(mut self, monitor: ConnectivityMonitor) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> SyncService {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connectivity = self.connectivity.unwrap_or_default();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let queue = OfflineQueue::with_clock(self.store.clone(), clock);
        let drainer = QueueDrainer::new(
            queue.clone(),
            self.api.clone(),
            connectivity.clone(),
            RetryPolicy::new(self.config.max_retries),
            events.clone(),
        );
        let reconciler = SyncReconciler::new(
            self.store.clone(),
            self.api.clone(),
            self.config.bindings.clone(),
            events.clone(),
        );

        SyncService {
            inner: Arc::new(ServiceInner {
                config: self.config,
                store: self.store,
                queue,
                vault: self.vault,
                api: self.api,
                connectivity,
                drainer,
                reconciler,
                events,
                auto_sync: Mutex::new(None),
            }),
        }
    }
}

impl SyncService {
    pub fn builder(
        config: SyncConfig,
        store: LocalStore,
        vault: TokenVault,
        api: Arc<dyn RemoteApi>,
    ) -> SyncServiceBuilder {
        SyncServiceBuilder {
            config,
            store,
            vault,
            api,
            connectivity: None,
            clock: None,
        }
    }

    /// Production wiring: store and vault from `store_config`, HTTP API
    /// authenticated from the vault.
    pub fn open(config: SyncConfig, store_config: &StoreConfig) -> CloudResult<Self> {
        config.validate()?;
        let (store, vault) = store_config.open();
        let api = Arc::new(ApiClient::new(&config, vault.clone())?);
        Ok(Self::builder(config, store, vault, api).build())
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.inner.queue
    }

    pub fn vault(&self) -> &TokenVault {
        &self.inner.vault
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Opens the store, migrates legacy tokens, and runs a first sync when
    /// signed in and online. Safe to call more than once.
    pub async fn init(&self) -> InitReport {
        let store = self.inner.store.init().await;
        if store == StoreStatus::Unavailable {
            warn!("local store unavailable, continuing against the network only");
        }

        let migration = match self.inner.vault.migrate_legacy().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!("legacy token migration failed: {e}");
                None
            }
        };

        let signed_in = self.inner.vault.access_token().await.is_some();
        let sync = if signed_in && self.is_online() {
            Some(self.sync_now().await)
        } else {
            None
        };

        InitReport {
            store,
            migration,
            sync,
        }
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Feeds the host's connectivity signal. Going online drains the queue
    /// (not a full sync). Returns `true` on a transition.
    pub async fn set_online(&self, online: bool) -> bool {
        if !self.inner.connectivity.set_online(online) {
            return false;
        }
        let _ = self.inner.events.send(SyncEvent::ConnectivityChanged { online });
        if online {
            if let Err(e) = self.drain_now().await {
                warn!("drain after reconnect failed: {e}");
            }
        }
        true
    }

    /// Queue counts for status indicators. Storage errors read as empty.
    pub async fn queue_status(&self) -> QueueStatus {
        match self.inner.queue.status().await {
            Ok(status) => status,
            Err(e) => {
                warn!("failed to read queue status: {e}");
                QueueStatus::default()
            }
        }
    }

    /// Queues a mutation and, if online, attempts a drain right away.
    pub async fn enqueue(
        &self,
        method: Method,
        url: impl Into<String>,
        body: Option<Value>,
    ) -> CloudResult<String> {
        let id = self.inner.queue.enqueue(method, url, body).await?;
        if self.is_online() {
            if let Err(e) = self.drain_now().await {
                warn!("drain after enqueue failed: {e}");
            }
        }
        Ok(id)
    }

    /// Live-or-queue write path.
    ///
    /// Online, the request is sent straight away and the server's answer is
    /// cached. If the device is offline or the server cannot be reached,
    /// the intended state is cached optimistically and the request queued.
    /// A server that answers with an error is surfaced as-is.
    pub async fn submit(&self, mutation: Mutation) -> CloudResult<SubmitOutcome> {
        if self.is_online() {
            match self
                .inner
                .api
                .send(mutation.method, &mutation.url, mutation.body.as_ref())
                .await
            {
                Ok(data) => {
                    self.apply_locally(&mutation, data.as_ref()).await;
                    return Ok(SubmitOutcome::Sent(data));
                }
                Err(e) if e.is_network() => {
                    warn!("{} {} unreachable, queueing: {e}", mutation.method, mutation.url);
                }
                Err(e) => return Err(e),
            }
        }

        self.apply_locally(&mutation, None).await;
        let id = self
            .inner
            .queue
            .enqueue(mutation.method, mutation.url, mutation.body)
            .await?;
        Ok(SubmitOutcome::Queued { id })
    }

    /// Runs one drain pass now.
    pub async fn drain_now(&self) -> CloudResult<DrainReport> {
        self.inner.drainer.drain().await
    }

    /// Flushes queued writes, then reconciles every bound collection.
    pub async fn sync_now(&self) -> SyncReport {
        if !self.is_online() {
            debug!("offline, skipping sync");
            return SyncReport {
                offline: true,
                ..SyncReport::default()
            };
        }
        if let Err(e) = self.drain_now().await {
            warn!("drain before sync failed: {e}");
        }
        self.inner.reconciler.sync_all().await
    }

    /// Starts the periodic drain timer. Returns `false` if already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_auto_sync(&self) -> bool {
        let mut slot = self.auto_sync_slot();
        if slot.as_ref().is_some_and(|a| !a.task.is_finished()) {
            return false;
        }
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run_auto_sync(
            self.inner.drainer.clone(),
            self.inner.config.drain_interval(),
            stop_rx,
        ));
        *slot = Some(AutoSync { stop_tx, task });
        true
    }

    /// Stops the periodic drain timer and waits for it to wind down.
    pub async fn stop_auto_sync(&self) {
        let taken = self.auto_sync_slot().take();
        let Some(auto) = taken else {
            return;
        };
        let _ = auto.stop_tx.send(());
        if let Err(e) = auto.task.await {
            warn!("auto-sync task ended abnormally: {e}");
        }
    }

    pub fn is_auto_syncing(&self) -> bool {
        self.auto_sync_slot()
            .as_ref()
            .is_some_and(|a| !a.task.is_finished())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    fn auto_sync_slot(&self) -> MutexGuard<'_, Option<AutoSync>> {
        self.inner
            .auto_sync
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mirrors a mutation into its cached collection. Cache failures are
    /// logged and swallowed; the server copy stays authoritative.
    async fn apply_locally(&self, mutation: &Mutation, authoritative: Option<&Value>) {
        let Some(collection) = mutation.cache_in else {
            return;
        };
        let store = &self.inner.store;

        let result = if mutation.method == Method::Delete {
            let key = mutation
                .record_id
                .clone()
                .or_else(|| mutation.body.as_ref().and_then(record_key));
            match key {
                Some(key) => store.delete(collection, &key).await,
                None => Ok(()),
            }
        } else {
            let record = authoritative
                .filter(|v| v.is_object())
                .or(mutation.body.as_ref());
            let keyed = record.and_then(|r| {
                record_key(r)
                    .or_else(|| mutation.record_id.clone())
                    .map(|k| (k, r))
            });
            match keyed {
                Some((key, record)) => store.put(collection, &key, record).await,
                None => {
                    debug!("nothing to cache for {} {}", mutation.method, mutation.url);
                    Ok(())
                }
            }
        };

        if let Err(e) = result {
            warn!(
                "failed to mirror {} {} into {collection}: {e}",
                mutation.method, mutation.url
            );
        }
    }
}

async fn run_auto_sync(drainer: QueueDrainer, period: Duration, mut stop_rx: oneshot::Receiver<()>) {
    info!("auto-sync started, draining every {}s", period.as_secs());
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip first immediate tick
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = drainer.drain().await {
                    warn!("periodic drain failed: {e}");
                }
            }
            _ = &mut stop_rx => break,
        }
    }

    info!("auto-sync stopped");
}
