//! Shared test helpers: an in-process `RemoteApi` and wiring shortcuts.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tidemark_cloud::{
    CloudError, CloudResult, ConnectivityMonitor, QueueDrainer, RemoteApi, RetryPolicy, SyncEvent,
};
use tidemark_storage::{LocalStore, ManualClock, Method, OfflineQueue};
use tokio::sync::{Notify, Semaphore, broadcast};

/// A request the mock received.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
}

/// Lets a test hold a request in flight.
pub struct Gate {
    pub entered: Notify,
    pub release: Semaphore,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        })
    }
}

/// Scriptable server. Writes echo their body; GETs answer from `responses`.
#[derive(Default)]
pub struct MockApi {
    calls: Mutex<Vec<Call>>,
    failing: Mutex<HashSet<String>>,
    fail_all: Mutex<bool>,
    responses: Mutex<HashMap<String, Value>>,
    gate: Option<Arc<Gate>>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn gated(gate: Arc<Gate>) -> Arc<Self> {
        Arc::new(Self {
            gate: Some(gate),
            ..Self::default()
        })
    }

    pub fn respond(&self, url: &str, data: Value) {
        self.responses.lock().unwrap().insert(url.to_string(), data);
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    pub fn heal(&self, url: &str) {
        self.failing.lock().unwrap().remove(url);
    }

    pub fn fail_everything(&self, fail: bool) {
        *self.fail_all.lock().unwrap() = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.url).collect()
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> CloudResult<Option<Value>> {
        self.calls.lock().unwrap().push(Call {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });

        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.acquire().await.unwrap().forget();
        }

        let failing = *self.fail_all.lock().unwrap() || self.failing.lock().unwrap().contains(url);
        if failing {
            return Err(CloudError::Status {
                status: 503,
                message: "Service Unavailable".into(),
            });
        }

        if method == Method::Get {
            return self
                .responses
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .map(Some)
                .ok_or_else(|| CloudError::Status {
                    status: 404,
                    message: "Not Found".into(),
                });
        }
        Ok(body.cloned())
    }
}

/// A drainer over an in-memory store with a manual clock.
pub struct DrainHarness {
    pub store: LocalStore,
    pub queue: OfflineQueue,
    pub clock: Arc<ManualClock>,
    pub connectivity: ConnectivityMonitor,
    pub drainer: QueueDrainer,
    pub events: broadcast::Receiver<SyncEvent>,
}

pub fn drain_harness(api: Arc<MockApi>, store: LocalStore) -> DrainHarness {
    let clock = Arc::new(ManualClock::new(1_000));
    let queue = OfflineQueue::with_clock(store.clone(), clock.clone());
    let connectivity = ConnectivityMonitor::new(true);
    let (tx, events) = broadcast::channel(64);
    let drainer = QueueDrainer::new(
        queue.clone(),
        api,
        connectivity.clone(),
        RetryPolicy::default(),
        tx,
    );
    DrainHarness {
        store,
        queue,
        clock,
        connectivity,
        drainer,
        events,
    }
}

/// Drains whatever events are already buffered.
pub fn buffered(rx: &mut broadcast::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}
