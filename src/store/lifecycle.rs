// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Store lifecycle: startup, periodic reconciliation, shutdown.
//!
//! Startup order:
//! 1. Open the local cache (so a total failure can still report a watermark)
//! 2. Connect both providers in parallel, alerting for each one that fails
//! 3. Create the replicated tables if configured
//! 4. Reconcile, when caching is enabled

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::MirrorStore;
use crate::cache::LocalCache;
use crate::config::StoreConfig;
use crate::connection::ConnectionManager;
use crate::error::{Result, StoreError};
use crate::metrics;
use crate::notify::{LogNotifier, Notifier, SmtpNotifier};
use crate::provider::sql::PoolSettings;
use crate::provider::{Fetch, Provider, ProviderId, SqlProvider};
use crate::resilience::retry::RetryConfig;
use crate::schema::REPLICATED_TABLES;

impl MirrorStore {
    /// Build providers and the notifier from `config`, then start up.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let settings = PoolSettings {
            connect_timeout: config.connect_timeout(),
            ..Default::default()
        };
        let provider_a = sql_provider(ProviderId::A, &config.provider_a_label, config.provider_a_url.as_deref(), &settings)?;
        let provider_b = sql_provider(ProviderId::B, &config.provider_b_label, config.provider_b_url.as_deref(), &settings)?;

        let notifier: Arc<dyn Notifier> = match config.smtp.clone() {
            Some(smtp) => match SmtpNotifier::new(smtp) {
                Ok(mailer) => Arc::new(mailer),
                Err(e) => {
                    warn!(error = %e, "SMTP notifier unavailable, alerts will only be logged");
                    Arc::new(LogNotifier)
                }
            },
            None => Arc::new(LogNotifier),
        };

        Self::open_with(config, provider_a, provider_b, notifier).await
    }

    /// Start up with caller-supplied providers and notifier.
    ///
    /// Fails with `TotalFailure` when no provider connects (or exits the
    /// process, if `exit_on_total_failure` is set).
    #[tracing::instrument(skip_all, fields(cache = config.cache_path.is_some()))]
    pub async fn open_with(
        config: StoreConfig,
        provider_a: Option<Arc<dyn Provider>>,
        provider_b: Option<Arc<dyn Provider>>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        if provider_a.is_none() && provider_b.is_none() {
            return Err(StoreError::Config("no provider configured".into()));
        }
        let startup = Instant::now();
        info!("Starting mirrored store...");

        let phase = Instant::now();
        let cache = match config.cache_path.as_deref() {
            Some(path) => match LocalCache::open(path).await {
                Ok(cache) => Some(cache),
                Err(e) => {
                    warn!(path, error = %e, "Local cache unavailable, lookups will go to providers");
                    None
                }
            },
            None => None,
        };
        metrics::record_startup_phase("cache", phase.elapsed());

        let store = Self {
            connections: ConnectionManager::new(provider_a, provider_b, config.retry_config()),
            config,
            cache,
            notifier,
            write_gate: RwLock::new(()),
            total_failed: AtomicBool::new(false),
        };

        let phase = Instant::now();
        let connected = store.connections.connect_all(&RetryConfig::startup()).await;
        for id in ProviderId::ALL {
            if store.connections.is_configured(id) && !connected.contains(&id) {
                let reason = store
                    .connections
                    .last_error(id)
                    .unwrap_or_else(|| "unknown error".to_string());
                store
                    .alert_provider_down(id, &format!("Initial connection failed: {}", reason))
                    .await;
            }
        }
        metrics::record_startup_phase("connect", phase.elapsed());

        if connected.is_empty() {
            return Err(store.total_failure().await);
        }

        if store.config.create_schema {
            let phase = Instant::now();
            store.ensure_schema().await?;
            metrics::record_startup_phase("schema", phase.elapsed());
        }

        if store.cache.is_some() {
            let phase = Instant::now();
            store.reconcile().await?;
            metrics::record_startup_phase("reconcile", phase.elapsed());
        }

        metrics::record_startup_total(startup.elapsed());
        store.check_connection();
        info!(health = %store.health(), "Mirrored store ready");
        Ok(store)
    }

    /// Create the replicated tables on every active provider.
    #[tracing::instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        for id in self.connections.active_providers() {
            let Some(dialect) = self.connections.provider(id).map(|p| p.dialect()) else {
                continue;
            };
            for spec in REPLICATED_TABLES {
                let ddl = dialect.create_table(spec);
                if let Err(err) = self.connections.execute_on(id, &ddl, Fetch::None, "schema").await {
                    warn!(provider = %id, table = spec.name, error = %err, "Schema creation failed");
                    return Err(err.into());
                }
            }
            debug!(provider = %id, dialect = %dialect, "Replicated tables present");
        }
        Ok(())
    }

    /// Reconcile every `reconcile_interval_secs` until `shutdown` flips to
    /// true (or its sender is dropped). Returns at once when no interval is
    /// configured.
    #[tracing::instrument(skip_all)]
    pub async fn run_reconciler(&self, mut shutdown: watch::Receiver<bool>) {
        let Some(period) = self.config.reconcile_interval() else {
            debug!("Periodic reconciliation disabled");
            return;
        };
        info!(interval_secs = period.as_secs(), "Periodic reconciliation running");

        let mut ticker = tokio::time::interval(period);
        if self.cache.is_some() {
            // startup already reconciled
            ticker.tick().await;
        }

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconcile().await {
                        Ok(report) => debug!(rows = report.rows_transferred(), "Periodic reconciliation done"),
                        Err(e @ StoreError::TotalFailure { .. }) => {
                            warn!(error = %e, "Stopping periodic reconciliation");
                            break;
                        }
                        Err(e) => warn!(error = %e, "Periodic reconciliation failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Periodic reconciliation stopped");
    }

    /// Close provider pools and the cache.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let start = Instant::now();
        info!("Shutting down mirrored store...");
        // let in-flight writes finish
        let _gate = self.write_gate.write().await;
        self.connections.close_all().await;
        if let Some(cache) = &self.cache {
            cache.close().await;
        }
        metrics::record_startup_phase("shutdown", start.elapsed());
        info!("Mirrored store shut down");
    }
}

fn sql_provider(
    id: ProviderId,
    label: &str,
    url: Option<&str>,
    settings: &PoolSettings,
) -> Result<Option<Arc<dyn Provider>>> {
    let Some(url) = url else {
        return Ok(None);
    };
    let provider = SqlProvider::new(id, label, url, settings.clone())?;
    info!(provider = %id, uri = %provider.uri().redacted(), "Provider configured");
    Ok(Some(Arc::new(provider)))
}
