// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Max(`sl_no`) reconciliation.
//!
//! For each replicated table the provider with the higher `max(sl_no)` is the
//! leader; rows above the lagger's max are copied to the lagger (and the
//! cache) in ascending order. Afterwards every active provider's
//! auto-increment counter is moved to its own max so new inserts never
//! collide with transferred sequence numbers.
//!
//! ```text
//!   A: 1..10   ──rows 8..10──►   B: 1..7
//!   resync(A, 10)                resync(B, 10)
//! ```

use std::time::Instant;

use tracing::{debug, info, warn};

use super::types::{ReconcileReport, TableOutcome};
use super::MirrorStore;
use crate::error::{Result, StoreError};
use crate::metrics;
use crate::provider::{Fetch, ProviderErrorKind, ProviderId, Statement};
use crate::schema::{Column, Row, TableSpec, REPLICATED_TABLES, SEQUENCE_COLUMN};

impl MirrorStore {
    /// Compare and repair every replicated table.
    ///
    /// Holds the write gate exclusively. A table whose comparison or transfer
    /// fails is reported as skipped; the remaining tables still run.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let _gate = self.write_gate.write().await;
        if self.is_terminal() {
            return Err(self.total_failure().await);
        }

        let start = Instant::now();
        let mut report = ReconcileReport::default();

        for spec in REPLICATED_TABLES {
            let active = self.connections.active_providers();
            let outcome = match active.as_slice() {
                [] => return Err(self.total_failure().await),
                [only] => TableOutcome::SingleProvider { provider: *only },
                _ => self.reconcile_table(spec).await,
            };

            match &outcome {
                TableOutcome::InSync { max_sl_no } => {
                    info!(table = spec.name, max_sl_no, "Table in sync");
                }
                TableOutcome::Transferred { from, to, rows, max_sl_no } => {
                    info!(table = spec.name, from = %from, to = %to, rows, max_sl_no, "Table reconciled");
                }
                TableOutcome::SingleProvider { provider } => {
                    info!(table = spec.name, provider = %provider, "Single provider active, comparison skipped");
                }
                TableOutcome::Skipped { reason } => {
                    warn!(table = spec.name, reason = %reason, "Table reconciliation skipped");
                }
            }
            metrics::record_reconcile_outcome(spec.name, outcome.label());

            self.resync_counters(spec).await;
            report.tables.push((spec.name.to_string(), outcome));
        }

        metrics::record_reconcile_duration(start.elapsed());
        info!(
            rows = report.rows_transferred(),
            complete = report.is_complete(),
            "Reconciliation pass finished"
        );
        Ok(report)
    }

    async fn reconcile_table(&self, spec: &TableSpec) -> TableOutcome {
        let (max_a, max_b) = match (
            self.provider_max(ProviderId::A, spec).await,
            self.provider_max(ProviderId::B, spec).await,
        ) {
            (Ok(a), Ok(b)) => (a, b),
            (Err(e), _) | (_, Err(e)) => return TableOutcome::Skipped { reason: e.to_string() },
        };

        if max_a == max_b {
            return TableOutcome::InSync { max_sl_no: max_a };
        }

        let (leader, lagger, lagger_max, leader_max) = if max_a > max_b {
            (ProviderId::A, ProviderId::B, max_b, max_a)
        } else {
            (ProviderId::B, ProviderId::A, max_a, max_b)
        };
        info!(
            table = spec.name,
            leader = %leader,
            leader_max,
            lagger = %lagger,
            lagger_max,
            "Providers diverged"
        );

        match self.transfer(spec, leader, lagger, lagger_max).await {
            Ok(rows) => {
                let subject = format!("Recovery Successful - {}", spec.name);
                let body = format!(
                    "Synced {} rows from {} to {} for table '{}'.",
                    rows,
                    self.label(leader),
                    self.label(lagger),
                    spec.name
                );
                self.alert("reconcile", &subject, &body).await;
                TableOutcome::Transferred {
                    from: leader,
                    to: lagger,
                    rows,
                    max_sl_no: leader_max,
                }
            }
            Err(e) => TableOutcome::Skipped { reason: e.to_string() },
        }
    }

    /// Copy rows above `after` from `leader` to `lagger` and into the cache.
    async fn transfer(&self, spec: &TableSpec, leader: ProviderId, lagger: ProviderId, after: i64) -> Result<usize> {
        let fetch = Statement::new(format!(
            "SELECT {} FROM \"{}\" WHERE \"{}\" > ? ORDER BY \"{}\" ASC",
            spec.column_list(),
            spec.name,
            SEQUENCE_COLUMN,
            SEQUENCE_COLUMN
        ))
        .bind(after)
        .returning(spec.columns);

        let rows = match self.connections.execute_on(leader, &fetch, Fetch::All, "reconcile").await {
            Ok(output) => output.rows,
            Err(err) => {
                if err.kind != ProviderErrorKind::Rejected {
                    self.provider_down(leader, &err).await;
                }
                return Err(partial(spec, format!("fetch from {}: {}", leader, err)));
            }
        };

        let insert_sql = insert_with_sequence_sql(spec);
        let mut copied: Vec<Row> = Vec::with_capacity(rows.len());
        for row in rows {
            let insert = Statement::new(insert_sql.clone()).bind_all(row.values().iter().cloned());
            if let Err(err) = self.connections.execute_on(lagger, &insert, Fetch::None, "reconcile").await {
                if err.kind != ProviderErrorKind::Rejected {
                    self.provider_down(lagger, &err).await;
                }
                metrics::record_reconciled_rows(spec.name, lagger, copied.len());
                self.cache_transferred(spec, &copied).await;
                return Err(partial(
                    spec,
                    format!("insert into {} after {} rows: {}", lagger, copied.len(), err),
                ));
            }
            copied.push(row);
        }

        metrics::record_reconciled_rows(spec.name, lagger, copied.len());
        self.cache_transferred(spec, &copied).await;
        Ok(copied.len())
    }

    async fn cache_transferred(&self, spec: &TableSpec, rows: &[Row]) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.upsert_many(spec, rows).await {
            warn!(table = spec.name, error = %e, "Failed to mirror transferred rows into cache");
        }
    }

    /// `max(sl_no)` on one provider, bypassing the balancer. Empty is 0.
    async fn provider_max(&self, id: ProviderId, spec: &TableSpec) -> Result<i64> {
        let stmt = Statement::new(format!("SELECT MAX(\"{}\") FROM \"{}\"", SEQUENCE_COLUMN, spec.name))
            .returning(&[Column::int("max_sl_no")]);
        let output = self
            .connections
            .execute_on(id, &stmt, Fetch::One, "reconcile")
            .await
            .map_err(|e| partial(spec, format!("max(sl_no) on {}: {}", id, e)))?;
        Ok(match output.first() {
            Some(row) => row.int(0)?.unwrap_or(0),
            None => 0,
        })
    }

    /// Move each active provider's counter to its own `max(sl_no)`.
    async fn resync_counters(&self, spec: &TableSpec) {
        for id in self.connections.active_providers() {
            let Some(dialect) = self.connections.provider(id).map(|p| p.dialect()) else {
                continue;
            };
            let max = match self.provider_max(id, spec).await {
                Ok(max) => max,
                Err(e) => {
                    warn!(table = spec.name, provider = %id, error = %e, "Counter resync skipped");
                    continue;
                }
            };
            for stmt in dialect.counter_resync(spec.name, max) {
                if let Err(e) = self.connections.execute_on(id, &stmt, Fetch::None, "resync").await {
                    warn!(table = spec.name, provider = %id, error = %e, "Counter resync failed");
                    break;
                }
            }
            debug!(table = spec.name, provider = %id, next = max + 1, "Counter resynced");
        }
    }
}

fn insert_with_sequence_sql(spec: &TableSpec) -> String {
    let placeholders = vec!["?"; spec.columns.len()].join(", ");
    format!(
        "INSERT INTO \"{}\" ({}) VALUES ({})",
        spec.name,
        spec.column_list(),
        placeholders
    )
}

fn partial(spec: &TableSpec, message: String) -> StoreError {
    StoreError::ReconciliationPartial {
        table: spec.name.to_string(),
        message,
    }
}
