// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the mirrored store.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `mirror_store_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `provider`: A, B
//! - `operation`: read, write, reconcile, connect
//! - `status`: success, transient, unavailable, rejected
//! - `table`: replicated table name

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

use crate::provider::{ProviderErrorKind, ProviderId};

pub(crate) fn error_status(kind: ProviderErrorKind) -> &'static str {
    match kind {
        ProviderErrorKind::Transient => "transient",
        ProviderErrorKind::Unavailable => "unavailable",
        ProviderErrorKind::Rejected => "rejected",
    }
}

/// Record the outcome of one statement on one provider
pub fn record_operation(provider: ProviderId, operation: &str, status: &str) {
    counter!(
        "mirror_store_operations_total",
        "provider" => provider.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record statement latency
pub fn record_latency(provider: ProviderId, operation: &str, duration: Duration) {
    histogram!(
        "mirror_store_operation_seconds",
        "provider" => provider.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// PROVIDER HEALTH
// ═══════════════════════════════════════════════════════════════════════════

/// Set provider active status (1 = active, 0 = marked down)
pub fn set_provider_active(provider: ProviderId, active: bool) {
    gauge!(
        "mirror_store_provider_active",
        "provider" => provider.to_string()
    )
    .set(if active { 1.0 } else { 0.0 });
}

/// Record an inline reconnect attempt
pub fn record_reconnect(provider: ProviderId, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(
        "mirror_store_reconnects_total",
        "provider" => provider.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a read moving on to the other provider
pub fn record_failover(from: ProviderId) {
    counter!(
        "mirror_store_failovers_total",
        "provider" => from.to_string()
    )
    .increment(1);
}

/// Record a health state transition
pub fn set_health_state(state: &str) {
    counter!(
        "mirror_store_state_transitions_total",
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a write refused by the quorum rule
pub fn record_mirrored_write_failure() {
    counter!("mirror_store_mirrored_write_failures_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// RECONCILIATION
// ═══════════════════════════════════════════════════════════════════════════

/// Record rows copied to a lagging provider
pub fn record_reconciled_rows(table: &str, target: ProviderId, rows: usize) {
    counter!(
        "mirror_store_reconciled_rows_total",
        "table" => table.to_string(),
        "provider" => target.to_string()
    )
    .increment(rows as u64);
}

/// Record a per-table reconciliation outcome
pub fn record_reconcile_outcome(table: &str, outcome: &str) {
    counter!(
        "mirror_store_reconcile_tables_total",
        "table" => table.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record reconciliation pass duration
pub fn record_reconcile_duration(duration: Duration) {
    histogram!("mirror_store_reconcile_seconds").record(duration.as_secs_f64());
}

// ═══════════════════════════════════════════════════════════════════════════
// LOCAL CACHE
// ═══════════════════════════════════════════════════════════════════════════

/// Record a cache lookup (hit, miss, error)
pub fn record_cache_lookup(operation: &str, result: &str) {
    counter!(
        "mirror_store_cache_lookups_total",
        "operation" => operation.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}

/// Record rows written to the cache
pub fn record_cache_rows(table: &str, rows: usize) {
    counter!(
        "mirror_store_cache_rows_written_total",
        "table" => table.to_string()
    )
    .increment(rows as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// ALERTS
// ═══════════════════════════════════════════════════════════════════════════

/// Record an operator alert delivery attempt
pub fn record_alert(kind: &str, delivered: bool) {
    let status = if delivered { "sent" } else { "failed" };
    counter!(
        "mirror_store_alerts_total",
        "kind" => kind.to_string(),
        "status" => status
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// STARTUP - Timing for cold start monitoring
// ═══════════════════════════════════════════════════════════════════════════

/// Record startup phase duration
pub fn record_startup_phase(phase: &str, duration: Duration) {
    histogram!(
        "mirror_store_startup_seconds",
        "phase" => phase.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record total startup time
pub fn record_startup_total(duration: Duration) {
    histogram!("mirror_store_startup_total_seconds").record(duration.as_secs_f64());
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    provider: ProviderId,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(provider: ProviderId, operation: &'static str) -> Self {
        Self {
            provider,
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.provider, self.operation, self.start.elapsed());
    }
}
