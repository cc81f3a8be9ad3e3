// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the mirrored store.

use crate::provider::ProviderId;

/// Degraded-mode state of the store.
///
/// ```text
/// AllActive → Degraded(X) → TotalFailure
/// ```
///
/// Transitions only move right within a process. Use
/// [`super::MirrorStore::health()`] to check the current state or
/// [`super::MirrorStore::health_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    /// Every configured provider is active
    AllActive,
    /// Only the named provider is still active
    Degraded(ProviderId),
    /// No provider is active (terminal)
    TotalFailure,
}

impl HealthState {
    /// Derive the state from the two active flags.
    pub fn from_flags(a_active: bool, b_active: bool) -> Self {
        match (a_active, b_active) {
            (true, true) => Self::AllActive,
            (true, false) => Self::Degraded(ProviderId::A),
            (false, true) => Self::Degraded(ProviderId::B),
            (false, false) => Self::TotalFailure,
        }
    }

    #[must_use]
    pub fn is_total_failure(&self) -> bool {
        matches!(self, Self::TotalFailure)
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllActive => write!(f, "AllActive"),
            Self::Degraded(survivor) => write!(f, "Degraded({})", survivor),
            Self::TotalFailure => write!(f, "TotalFailure"),
        }
    }
}

/// Point-in-time view of one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderStatus {
    pub id: ProviderId,
    pub label: String,
    /// A URI (or injected provider) was supplied
    pub configured: bool,
    pub active: bool,
    pub last_error: Option<String>,
}

/// Outcome of reconciling one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    /// Both providers already had the same `max(sl_no)`
    InSync { max_sl_no: i64 },
    /// Rows were copied from the leader to the lagger
    Transferred {
        from: ProviderId,
        to: ProviderId,
        rows: usize,
        max_sl_no: i64,
    },
    /// Only one provider was active; only its counter was resynced
    SingleProvider { provider: ProviderId },
    /// Comparison or transfer failed; the table was left as is
    Skipped { reason: String },
}

impl TableOutcome {
    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::InSync { .. } => "in_sync",
            Self::Transferred { .. } => "transferred",
            Self::SingleProvider { .. } => "single_provider",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub tables: Vec<(String, TableOutcome)>,
}

impl ReconcileReport {
    /// Rows copied across all tables.
    #[must_use]
    pub fn rows_transferred(&self) -> usize {
        self.tables
            .iter()
            .map(|(_, outcome)| match outcome {
                TableOutcome::Transferred { rows, .. } => *rows,
                _ => 0,
            })
            .sum()
    }

    /// Whether every table was compared (none skipped).
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self
            .tables
            .iter()
            .any(|(_, outcome)| matches!(outcome, TableOutcome::Skipped { .. }))
    }

    pub fn outcome(&self, table: &str) -> Option<&TableOutcome> {
        self.tables.iter().find(|(name, _)| name == table).map(|(_, o)| o)
    }
}

/// Result of a full cloud→cache sync for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSync {
    pub table: String,
    /// Rows pulled from the providers and written to the cache
    pub pulled: usize,
    /// Row count on the provider that served the count query
    pub cloud_rows: i64,
    pub cache_rows: i64,
}

impl TableSync {
    #[must_use]
    pub fn counts_match(&self) -> bool {
        self.cloud_rows == self.cache_rows
    }
}

/// Result of [`super::MirrorStore::sync_to_cache()`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub tables: Vec<TableSync>,
}

impl SyncReport {
    #[must_use]
    pub fn total_pulled(&self) -> usize {
        self.tables.iter().map(|t| t.pulled).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_state_from_flags() {
        assert_eq!(HealthState::from_flags(true, true), HealthState::AllActive);
        assert_eq!(HealthState::from_flags(false, true), HealthState::Degraded(ProviderId::B));
        assert_eq!(HealthState::from_flags(true, false), HealthState::Degraded(ProviderId::A));
        assert!(HealthState::from_flags(false, false).is_total_failure());
    }

    #[test]
    fn test_health_state_display() {
        assert_eq!(format!("{}", HealthState::AllActive), "AllActive");
        assert_eq!(format!("{}", HealthState::Degraded(ProviderId::B)), "Degraded(B)");
        assert_eq!(format!("{}", HealthState::TotalFailure), "TotalFailure");
    }

    #[test]
    fn test_reconcile_report_totals() {
        let report = ReconcileReport {
            tables: vec![
                (
                    "media_library".into(),
                    TableOutcome::Transferred { from: ProviderId::A, to: ProviderId::B, rows: 3, max_sl_no: 10 },
                ),
                ("trips_config".into(), TableOutcome::InSync { max_sl_no: 2 }),
            ],
        };
        assert_eq!(report.rows_transferred(), 3);
        assert!(report.is_complete());
        assert_eq!(report.outcome("trips_config"), Some(&TableOutcome::InSync { max_sl_no: 2 }));

        let skipped = ReconcileReport {
            tables: vec![("media_library".into(), TableOutcome::Skipped { reason: "timeout".into() })],
        };
        assert!(!skipped.is_complete());
    }
}
