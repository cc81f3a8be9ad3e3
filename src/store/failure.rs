// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Degradation and total-failure handling.

use std::sync::atomic::Ordering;

use tracing::{error, warn};

use super::MirrorStore;
use crate::error::StoreError;
use crate::metrics;
use crate::provider::{ProviderError, ProviderId};
use crate::schema::MEDIA_LIBRARY;

impl MirrorStore {
    /// Deliver an alert, bounded by the alert timeout. Never fails.
    pub(super) async fn alert(&self, kind: &str, subject: &str, body: &str) {
        let delivery = tokio::time::timeout(self.config.alert_timeout(), self.notifier.alert(subject, body)).await;
        let delivered = match delivery {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(kind, subject, error = %e, "Alert delivery failed");
                false
            }
            Err(_) => {
                warn!(kind, subject, timeout_ms = self.config.alert_timeout_ms, "Alert delivery timed out");
                false
            }
        };
        metrics::record_alert(kind, delivered);
    }

    /// Mark `id` down after a hard failure. Alerts only on the transition.
    pub(super) async fn provider_down(&self, id: ProviderId, err: &ProviderError) {
        if !self.connections.mark_inactive(id, &err.message) {
            return;
        }
        error!(provider = %id, error = %err, health = %self.health(), "Provider failed, continuing in degraded mode");
        self.alert_provider_down(id, &err.message).await;
    }

    pub(super) async fn alert_provider_down(&self, id: ProviderId, message: &str) {
        let label = self.label(id);
        let subject = format!("Urgent: {} Down", label);
        let body = format!(
            "{} failed to connect or operate.\n\nError:\n{}\n\nSwitching to Degraded Mode.",
            label, message
        );
        self.alert("provider_down", &subject, &body).await;
    }

    /// Last known `sl_no` of the media table, from the cache.
    pub(super) async fn watermark(&self) -> Option<i64> {
        let cache = self.cache.as_ref()?;
        match cache.max_sl_no(&MEDIA_LIBRARY).await {
            Ok(max) => max,
            Err(e) => {
                warn!(error = %e, "Could not read watermark from cache");
                None
            }
        }
    }

    /// Handle total failure: critical alert with the watermark (once), then
    /// terminate the process or hand back `TotalFailure`, per configuration.
    pub(super) async fn total_failure(&self) -> StoreError {
        let watermark = self.watermark().await;
        if self.total_failed.swap(true, Ordering::SeqCst) {
            return StoreError::TotalFailure { watermark };
        }

        let shown = watermark.map_or_else(|| "Unknown".to_string(), |w| w.to_string());
        let subject = "Critical: System Shutdown";
        let body = format!(
            "Both database providers are unreachable. Initiating graceful shutdown.\nLast successful sl_no: {}",
            shown
        );
        error!(watermark = ?watermark, "{}", body);
        self.alert("total_failure", subject, &body).await;

        if self.config.exit_on_total_failure {
            error!("Terminating after total provider failure");
            std::process::exit(1);
        }
        StoreError::TotalFailure { watermark }
    }
}
