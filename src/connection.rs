// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection manager for the two mirrored providers.
//!
//! Owns both provider handles and their [`ProviderState`]. All active-flag
//! transitions go through one lock so at most one health transition is in
//! flight at a time; the resulting [`HealthState`] is broadcast on a watch
//! channel.
//!
//! A provider that is marked inactive stays inactive for the rest of the
//! process. Inline reconnects refresh the handle but never re-activate it.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::provider::{Fetch, Provider, ProviderError, ProviderErrorKind, ProviderId, QueryOutput, Statement};
use crate::resilience::retry::{retry, RetryConfig};
use crate::store::types::{HealthState, ProviderStatus};

/// Mutable per-provider state.
#[derive(Debug, Clone, Default)]
pub struct ProviderState {
    pub active: bool,
    pub last_error: Option<String>,
}

pub struct ConnectionManager {
    providers: [Option<Arc<dyn Provider>>; 2],
    states: Mutex<[ProviderState; 2]>,
    health: watch::Sender<HealthState>,
    retry: RetryConfig,
}

impl ConnectionManager {
    /// Both providers start inactive until [`connect`](Self::connect) succeeds.
    pub fn new(
        provider_a: Option<Arc<dyn Provider>>,
        provider_b: Option<Arc<dyn Provider>>,
        retry: RetryConfig,
    ) -> Self {
        let (health, _) = watch::channel(HealthState::TotalFailure);
        Self {
            providers: [provider_a, provider_b],
            states: Mutex::new([ProviderState::default(), ProviderState::default()]),
            health,
            retry,
        }
    }

    pub fn provider(&self, id: ProviderId) -> Option<&Arc<dyn Provider>> {
        self.providers[id.index()].as_ref()
    }

    pub fn is_configured(&self, id: ProviderId) -> bool {
        self.providers[id.index()].is_some()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Open the connection to `id`. Returns whether the provider is now active;
    /// failures are recorded, never raised.
    pub async fn connect(&self, id: ProviderId) -> bool {
        let Some(provider) = self.provider(id) else {
            debug!(provider = %id, "Provider not configured, skipping connect");
            return false;
        };

        match provider.connect().await {
            Ok(()) => {
                self.set_active(id, None);
                true
            }
            Err(e) => {
                warn!(provider = %id, error = %e, "Provider connection failed");
                self.states.lock()[id.index()].last_error = Some(e.message);
                metrics::set_provider_active(id, false);
                false
            }
        }
    }

    /// Connect every configured provider concurrently, retrying each per `policy`.
    #[tracing::instrument(skip(self, policy))]
    pub async fn connect_all(&self, policy: &RetryConfig) -> Vec<ProviderId> {
        let attempts = ProviderId::ALL
            .into_iter()
            .filter(|id| self.is_configured(*id))
            .map(|id| async move {
                let ok = retry(&format!("connect_provider_{}", id), policy, || async move {
                    if self.connect(id).await {
                        Ok(())
                    } else {
                        Err(self.last_error(id).unwrap_or_else(|| "connect failed".to_string()))
                    }
                })
                .await
                .is_ok();
                (id, ok)
            });

        let connected: Vec<ProviderId> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter_map(|(id, ok)| ok.then_some(id))
            .collect();

        info!(connected = ?connected, health = %self.health(), "Provider connections established");
        connected
    }

    /// Replace the handle of `id` with a fresh connection. Does not change
    /// the active flag.
    pub async fn reconnect(&self, id: ProviderId) -> bool {
        let Some(provider) = self.provider(id) else {
            return false;
        };
        let ok = match provider.connect().await {
            Ok(()) => true,
            Err(e) => {
                warn!(provider = %id, error = %e, "Inline reconnect failed");
                false
            }
        };
        metrics::record_reconnect(id, ok);
        ok
    }

    pub fn is_active(&self, id: ProviderId) -> bool {
        self.states.lock()[id.index()].active
    }

    /// Active providers in A, B order.
    pub fn active_providers(&self) -> Vec<ProviderId> {
        let states = self.states.lock();
        ProviderId::ALL
            .into_iter()
            .filter(|id| states[id.index()].active)
            .collect()
    }

    pub fn last_error(&self, id: ProviderId) -> Option<String> {
        self.states.lock()[id.index()].last_error.clone()
    }

    /// Mark `id` inactive. Returns `true` only when this call performed the
    /// active→inactive transition, so callers alert once per transition.
    pub fn mark_inactive(&self, id: ProviderId, reason: &str) -> bool {
        let mut states = self.states.lock();
        let state = &mut states[id.index()];
        state.last_error = Some(reason.to_string());
        if !state.active {
            return false;
        }
        state.active = false;

        let next = HealthState::from_flags(states[0].active, states[1].active);
        self.health.send_replace(next);
        drop(states);

        metrics::set_provider_active(id, false);
        metrics::set_health_state(&next.to_string());
        warn!(provider = %id, reason, health = %next, "Provider marked inactive");
        true
    }

    fn set_active(&self, id: ProviderId, last_error: Option<String>) {
        let mut states = self.states.lock();
        states[id.index()] = ProviderState { active: true, last_error };
        let next = HealthState::from_flags(states[0].active, states[1].active);
        self.health.send_replace(next);
        drop(states);

        metrics::set_provider_active(id, true);
        metrics::set_health_state(&next.to_string());
    }

    pub fn health(&self) -> HealthState {
        *self.health.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthState> {
        self.health.subscribe()
    }

    /// Execute on one provider. A transient error triggers a reconnect and a
    /// retry of the same statement, up to the configured retry count.
    pub async fn execute_on(
        &self,
        id: ProviderId,
        statement: &Statement,
        fetch: Fetch,
        operation: &'static str,
    ) -> Result<QueryOutput, ProviderError> {
        let provider = self
            .provider(id)
            .ok_or_else(|| ProviderError::new(id, ProviderErrorKind::Unavailable, "provider not configured"))?;

        let mut retries = 0;
        loop {
            let result = {
                let _timer = metrics::LatencyTimer::new(id, operation);
                provider.execute(statement, fetch).await
            };

            match result {
                Ok(output) => {
                    metrics::record_operation(id, operation, "success");
                    return Ok(output);
                }
                Err(err) => {
                    metrics::record_operation(id, operation, metrics::error_status(err.kind));
                    if !err.is_transient() || retries >= self.retry.max_retries {
                        return Err(err);
                    }

                    debug!(provider = %id, error = %err, retry = retries + 1, "Transient error, reconnecting");
                    let delay = self.retry.delay_for(retries);
                    retries += 1;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if !self.reconnect(id).await {
                        return Err(ProviderError::new(
                            id,
                            ProviderErrorKind::Unavailable,
                            format!("reconnect failed after: {}", err.message),
                        ));
                    }
                }
            }
        }
    }

    pub fn status(&self) -> Vec<ProviderStatus> {
        let states = self.states.lock();
        ProviderId::ALL
            .into_iter()
            .map(|id| {
                let state = &states[id.index()];
                ProviderStatus {
                    id,
                    label: self
                        .provider(id)
                        .map_or_else(|| format!("Provider {}", id), |p| p.label()),
                    configured: self.is_configured(id),
                    active: state.active,
                    last_error: state.last_error.clone(),
                }
            })
            .collect()
    }

    pub async fn close_all(&self) {
        for provider in self.providers.iter().flatten() {
            provider.close().await;
        }
    }
}
