//! Replays the offline queue against the server.
//!
//! One drain takes a snapshot of the queue and replays it oldest first,
//! one request at a time. A flag guards against overlapping drains: a timer
//! tick that fires while a connectivity-triggered drain is running is a
//! no-op. Items that fail are retried on later drains up to
//! [`RetryPolicy::max_retries`] times and then dropped. Items removed from
//! the queue while a pass is running are skipped, and a failed item is only
//! written back if it is still queued.

use crate::api_client::RemoteApi;
use crate::connectivity::ConnectivityMonitor;
use crate::error::CloudResult;
use crate::types::{DrainReport, DrainRun, SyncEvent};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tidemark_storage::{OfflineQueue, QueueItem};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Where an item stands after a replay attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemState {
    /// Accepted by the server; remove from the queue.
    Done,
    /// Failed; keep with this retry count.
    Retry(u32),
    /// Failed too often; remove and drop.
    Abandoned,
}

/// Flat retry budget per item. No per-item backoff: a failed item simply
/// waits for the next drain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn after_attempt(&self, retries: u32, succeeded: bool) -> ItemState {
        if succeeded {
            ItemState::Done
        } else if retries < self.max_retries {
            ItemState::Retry(retries + 1)
        } else {
            ItemState::Abandoned
        }
    }
}

/// Replays queued mutations. Cheap to clone; clones share the drain flag.
#[derive(Clone)]
pub struct QueueDrainer {
    queue: OfflineQueue,
    api: Arc<dyn RemoteApi>,
    connectivity: ConnectivityMonitor,
    policy: RetryPolicy,
    draining: Arc<AtomicBool>,
    events: broadcast::Sender<SyncEvent>,
}

impl QueueDrainer {
    pub fn new(
        queue: OfflineQueue,
        api: Arc<dyn RemoteApi>,
        connectivity: ConnectivityMonitor,
        policy: RetryPolicy,
        events: broadcast::Sender<SyncEvent>,
    ) -> Self {
        Self {
            queue,
            api,
            connectivity,
            policy,
            draining: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Runs one drain pass. Returns at once if offline or already draining.
    pub async fn drain(&self) -> CloudResult<DrainReport> {
        if !self.connectivity.is_online() {
            debug!("offline, skipping drain");
            return Ok(DrainReport::skipped(DrainRun::SkippedOffline));
        }
        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            debug!("drain already in progress");
            return Ok(DrainReport::skipped(DrainRun::SkippedBusy));
        };

        let snapshot = self.queue.get_all().await?;
        let mut report = DrainReport::default();
        if !snapshot.is_empty() {
            info!("draining {} queued mutations", snapshot.len());
        }

        let mut untouched = snapshot.len();
        for item in snapshot {
            if !self.connectivity.is_online() {
                info!("went offline mid-drain, stopping");
                report.run = DrainRun::Interrupted;
                break;
            }
            untouched -= 1;
            match self.queue.contains(&item.id).await {
                Ok(true) => self.replay(item, &mut report).await,
                Ok(false) => {
                    debug!("{} {} left the queue before replay", item.method, item.url);
                    report.withdrawn += 1;
                }
                Err(e) => {
                    warn!("failed to look up queued {} {}: {e}", item.method, item.url);
                    report.storage_errors += 1;
                }
            }
        }

        report.remaining = match self.queue.len().await {
            Ok(len) => len,
            Err(e) => {
                warn!("failed to count the queue after draining: {e}");
                report.requeued + report.storage_errors + untouched
            }
        };
        let _ = self.events.send(SyncEvent::DrainCompleted(report.clone()));
        Ok(report)
    }

    /// Sends one item and records the outcome. Queue write failures are
    /// logged and counted; the pass moves on to the next item.
    async fn replay(&self, mut item: QueueItem, report: &mut DrainReport) {
        let result = self
            .api
            .send(item.method, &item.url, item.body.as_ref())
            .await;
        if let Err(e) = &result {
            warn!("replay of {} {} failed: {e}", item.method, item.url);
        }

        match self.policy.after_attempt(item.retries, result.is_ok()) {
            ItemState::Done => {
                report.replayed += 1;
                debug!("replayed {} {}", item.method, item.url);
                if let Err(e) = self.queue.remove(&item.id).await {
                    warn!(
                        "{} {} was accepted but is still queued and may be sent again: {e}",
                        item.method, item.url
                    );
                    report.storage_errors += 1;
                }
                let _ = self.events.send(SyncEvent::ItemReplayed { id: item.id });
            }
            ItemState::Retry(retries) => {
                item.retries = retries;
                match self.queue.requeue(&item).await {
                    Ok(true) => {
                        report.requeued += 1;
                        let _ = self.events.send(SyncEvent::ItemRequeued {
                            id: item.id,
                            retries,
                        });
                    }
                    Ok(false) => {
                        debug!("{} {} left the queue while in flight", item.method, item.url);
                        report.withdrawn += 1;
                    }
                    Err(e) => {
                        warn!(
                            "failed to record retry {retries} for {} {}: {e}",
                            item.method, item.url
                        );
                        report.storage_errors += 1;
                    }
                }
            }
            ItemState::Abandoned => {
                if let Err(e) = self.queue.remove(&item.id).await {
                    warn!(
                        "failed to drop {} {} after {} retries: {e}",
                        item.method, item.url, item.retries
                    );
                    report.storage_errors += 1;
                    return;
                }
                report.dropped += 1;
                warn!(
                    "dropping {} {} after {} retries",
                    item.method, item.url, item.retries
                );
                let _ = self.events.send(SyncEvent::ItemDropped {
                    id: item.id,
                    method: item.method,
                    url: item.url,
                });
            }
        }
    }
}

/// Holds the drain flag for the lifetime of one pass.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
