// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Mirrored write executor.
//!
//! A write goes to every provider active when it starts, concurrently, and
//! both completions are awaited before anything is reported. Success means
//! every provider that is still active applied it.

use futures::future::join_all;
use tracing::{debug, warn};

use super::MirrorStore;
use crate::error::{Result, StoreError};
use crate::metrics;
use crate::provider::{Fetch, ProviderErrorKind, ProviderId, QueryOutput, Statement};

impl MirrorStore {
    /// Apply `statement` on every active provider.
    ///
    /// Returns provider A's output when A applied it, else B's. Generated
    /// values such as `sl_no` may differ between providers.
    pub async fn write(&self, statement: &Statement, fetch: Fetch) -> Result<QueryOutput> {
        let _gate = self.write_gate.read().await;
        self.write_ungated(statement, fetch).await
    }

    /// Mirrored write for callers already holding the write gate.
    pub(super) async fn write_ungated(&self, statement: &Statement, fetch: Fetch) -> Result<QueryOutput> {
        if self.is_terminal() {
            return Err(self.total_failure().await);
        }
        let targets = self.connections.active_providers();
        if targets.is_empty() {
            return Err(self.total_failure().await);
        }

        let attempts = targets.iter().map(|&id| async move {
            (id, self.connections.execute_on(id, statement, fetch, "write").await)
        });
        let results = join_all(attempts).await;

        let mut applied: Vec<(ProviderId, QueryOutput)> = Vec::with_capacity(results.len());
        let mut refused: Vec<ProviderId> = Vec::new();
        let mut messages: Vec<String> = Vec::new();

        for (id, result) in results {
            match result {
                Ok(output) => applied.push((id, output)),
                // reachable but refused: the provider stays active
                Err(err) if err.kind == ProviderErrorKind::Rejected => {
                    warn!(provider = %id, error = %err, "Write rejected");
                    refused.push(id);
                    messages.push(err.to_string());
                }
                Err(err) => {
                    warn!(provider = %id, error = %err, "Write failed");
                    messages.push(err.to_string());
                    self.provider_down(id, &err).await;
                }
            }
        }

        if targets.iter().all(|id| !self.connections.is_active(*id)) {
            return Err(self.total_failure().await);
        }

        let unapplied: Vec<ProviderId> = targets
            .iter()
            .copied()
            .filter(|id| self.connections.is_active(*id) && !applied.iter().any(|(done, _)| done == id))
            .collect();
        if !unapplied.is_empty() {
            metrics::record_mirrored_write_failure();
            debug_assert!(unapplied.iter().all(|id| refused.contains(id)));
            return Err(StoreError::MirroredWriteFailure {
                failed: unapplied,
                message: messages.join("; "),
            });
        }

        debug!(applied = ?applied.iter().map(|(id, _)| *id).collect::<Vec<_>>(), "Mirrored write complete");
        // targets are in A, B order and join_all keeps that order
        applied
            .into_iter()
            .next()
            .map(|(_, output)| output)
            .ok_or_else(|| StoreError::TotalFailure { watermark: None })
    }
}
