// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use thiserror::Error;

use crate::provider::{ProviderError, ProviderErrorKind, ProviderId};

/// Errors surfaced by the mirrored store.
///
/// Connection problems are handled inside the store (reconnect, retry,
/// degrade); what reaches the caller is either a quorum violation, a
/// statement the providers refused, or total failure.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transient connection error on provider {provider}: {message}")]
    TransientConnection { provider: ProviderId, message: String },

    #[error("provider {provider} unavailable: {message}")]
    ProviderUnavailable { provider: ProviderId, message: String },

    #[error("statement rejected by provider {provider}: {message}")]
    Rejected { provider: ProviderId, message: String },

    #[error("mirrored write failed on active provider(s) {}: {message}", fmt_providers(.failed))]
    MirroredWriteFailure { failed: Vec<ProviderId>, message: String },

    #[error("total failure: no provider reachable (last known sl_no: {})", fmt_watermark(.watermark))]
    TotalFailure { watermark: Option<i64> },

    #[error("reconciliation of {table} incomplete: {message}")]
    ReconciliationPartial { table: String, message: String },

    #[error("local cache error: {0}")]
    Cache(String),

    #[error("invalid connection uri: {0}")]
    InvalidUri(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("decode error: {0}")]
    Decode(String),
}

fn fmt_providers(ids: &[ProviderId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
}

fn fmt_watermark(watermark: &Option<i64>) -> String {
    watermark.map_or_else(|| "unknown".to_string(), |w| w.to_string())
}

impl From<ProviderError> for StoreError {
    fn from(err: ProviderError) -> Self {
        match err.kind {
            ProviderErrorKind::Transient => StoreError::TransientConnection {
                provider: err.provider,
                message: err.message,
            },
            ProviderErrorKind::Unavailable => StoreError::ProviderUnavailable {
                provider: err.provider,
                message: err.message,
            },
            ProviderErrorKind::Rejected => StoreError::Rejected {
                provider: err.provider,
                message: err.message,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
