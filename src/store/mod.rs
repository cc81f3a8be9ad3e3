// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirrored store coordinator.
//!
//! The [`MirrorStore`] ties together:
//! - two remote providers behind a [`ConnectionManager`]
//! - mirrored writes (every active provider, concurrently)
//! - load-balanced reads (one random active provider, failing over)
//! - max(`sl_no`) reconciliation with auto-increment counter resync
//! - the local cache projection for network-free lookups
//! - operator alerts on degradation and total failure
//!
//! # Health
//!
//! ```text
//! AllActive → Degraded(X) → TotalFailure
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use mirror_store::{MirrorStore, StoreConfig, MediaRecord};
//!
//! # #[tokio::main]
//! # async fn main() -> mirror_store::Result<()> {
//! let config = StoreConfig::from_env()?;
//! let store = MirrorStore::open(config).await?;
//!
//! if !store.exists_by_hash("9f86d081").await? {
//!     store.insert(&MediaRecord::new("9f86d081", "IMG_0001.JPG")).await?;
//! }
//! store.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod api;
mod failure;
mod lifecycle;
mod read;
mod reconcile;
pub mod types;
mod write;

pub use types::{HealthState, ProviderStatus, ReconcileReport, SyncReport, TableOutcome, TableSync};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::info;

use crate::cache::LocalCache;
use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::notify::Notifier;

/// Dual-provider mirrored store.
///
/// # Thread Safety
///
/// The store is `Send + Sync`; share it behind an `Arc`. Active-flag
/// transitions are serialized inside the [`ConnectionManager`], and the
/// write gate keeps mirrored writes out of a running reconciliation.
pub struct MirrorStore {
    pub(super) config: StoreConfig,

    /// Provider handles and active flags
    pub(super) connections: ConnectionManager,

    /// Local projection (absent when caching is disabled or failed to open)
    pub(super) cache: Option<LocalCache>,

    pub(super) notifier: Arc<dyn Notifier>,

    /// Writes hold it shared; reconciliation holds it exclusively
    pub(super) write_gate: RwLock<()>,

    /// Set once total failure has been handled
    pub(super) total_failed: AtomicBool,
}

impl MirrorStore {
    /// Current degraded-mode state.
    #[must_use]
    pub fn health(&self) -> HealthState {
        self.connections.health()
    }

    /// Watch health transitions.
    pub fn health_receiver(&self) -> watch::Receiver<HealthState> {
        self.connections.subscribe()
    }

    pub fn provider_status(&self) -> Vec<ProviderStatus> {
        self.connections.status()
    }

    /// Whether at least one provider is active. Logs which ones are.
    pub fn check_connection(&self) -> bool {
        let active: Vec<String> = self
            .provider_status()
            .into_iter()
            .filter(|s| s.active)
            .map(|s| s.label)
            .collect();
        if active.is_empty() {
            return false;
        }
        info!(active = %active.join(" | "), "Database connections active");
        true
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Whether the local cache is open.
    #[must_use]
    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    pub fn connections(&self) -> &ConnectionManager {
        &self.connections
    }

    pub(super) fn is_terminal(&self) -> bool {
        self.total_failed.load(Ordering::SeqCst)
    }

    pub(super) fn label(&self, id: crate::provider::ProviderId) -> String {
        self.connections
            .provider(id)
            .map_or_else(|| format!("Provider {}", id), |p| p.label())
    }
}
