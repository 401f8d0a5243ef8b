//! Sync engine for Tidemark.
//!
//! Keeps the local mirror (`tidemark-storage`) consistent with the server:
//! - API client for the REST control plane (`{ success, data, error }`)
//! - Connectivity monitor fed by the host's online/offline signal
//! - Queue drainer replaying offline mutations with bounded retries
//! - Reconciler pulling server state with per-collection merge strategies
//! - A façade (`SyncService`) tying it together with a periodic drain timer

pub mod api_client;
pub mod config;
pub mod connectivity;
pub mod drainer;
pub mod error;
pub mod merge;
pub mod reconciler;
pub mod service;
pub mod types;

pub use api_client::{ApiClient, RemoteApi};
pub use config::{MergeStrategy, StoreConfig, SyncBinding, SyncConfig};
pub use connectivity::ConnectivityMonitor;
pub use drainer::{ItemState, QueueDrainer, RetryPolicy};
pub use error::{CloudError, CloudResult};
pub use reconciler::SyncReconciler;
pub use service::{SyncService, SyncServiceBuilder};
pub use types::*;

/// Installs a stderr `tracing` subscriber filtered by `RUST_LOG` (default
/// `info`). Does nothing if a subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
