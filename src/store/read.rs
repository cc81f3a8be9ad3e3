// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Load-balanced reads with failover.

use rand::seq::SliceRandom;
use tracing::{debug, warn};

use super::MirrorStore;
use crate::error::{Result, StoreError};
use crate::metrics;
use crate::provider::{Fetch, ProviderErrorKind, ProviderId, QueryOutput, Statement};

impl MirrorStore {
    /// Run a read on one uniformly chosen active provider.
    ///
    /// A hard failure marks that provider down and the read is retried on
    /// the survivor; at most one provider is tried per state, so the loop
    /// is bounded by the provider count.
    pub async fn read(&self, statement: &Statement, fetch: Fetch) -> Result<QueryOutput> {
        for _ in 0..=ProviderId::ALL.len() {
            if self.is_terminal() {
                break;
            }
            let Some(id) = self.pick_reader() else {
                break;
            };

            match self.connections.execute_on(id, statement, fetch, "read").await {
                Ok(output) => {
                    debug!(provider = %id, rows = output.rows.len(), "Read served");
                    return Ok(output);
                }
                Err(err) if err.kind == ProviderErrorKind::Rejected => {
                    return Err(StoreError::from(err));
                }
                Err(err) => {
                    warn!(provider = %id, error = %err, "Read failed, failing over");
                    self.provider_down(id, &err).await;
                    metrics::record_failover(id);
                }
            }
        }
        Err(self.total_failure().await)
    }

    fn pick_reader(&self) -> Option<ProviderId> {
        let active = self.connections.active_providers();
        active.choose(&mut rand::thread_rng()).copied()
    }
}
