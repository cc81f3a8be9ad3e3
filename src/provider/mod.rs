// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote relational providers.
//!
//! A [`Provider`] is one independently hosted SQL endpoint. The store owns
//! two of them (A and B) and never talks to a backend except through this
//! trait, so hosts and tests can substitute their own endpoints.
//!
//! Statements are written once in a neutral form (`?` placeholders, ANSI
//! `"ident"` quoting) and rendered per provider by its [`Dialect`].

pub mod dialect;
pub mod sql;
pub mod uri;

pub use dialect::Dialect;
pub use sql::SqlProvider;
pub use uri::ConnectionUri;

use async_trait::async_trait;
use thiserror::Error;

use crate::schema::{Column, Row, Value};

/// Identity of one of the two mirrored providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProviderId {
    A,
    B,
}

impl ProviderId {
    pub const ALL: [ProviderId; 2] = [ProviderId::A, ProviderId::B];

    pub(crate) fn index(self) -> usize {
        match self {
            ProviderId::A => 0,
            ProviderId::B => 1,
        }
    }

    /// The other provider of the pair.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            ProviderId::A => ProviderId::B,
            ProviderId::B => ProviderId::A,
        }
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// How a provider failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Connection reset, broken pipe, stale or closed handle.
    /// Eligible for one inline reconnect-and-retry.
    Transient,
    /// The provider cannot be reached or used; durable for the process lifetime.
    Unavailable,
    /// The provider answered and refused the statement (constraint, syntax).
    Rejected,
}

#[derive(Error, Debug, Clone)]
#[error("provider {provider} ({kind:?}): {message}")]
pub struct ProviderError {
    pub provider: ProviderId,
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(provider: ProviderId, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self { provider, kind, message: message.into() }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }

    /// Error for an operation attempted without an open connection.
    pub fn not_connected(provider: ProviderId) -> Self {
        Self::new(provider, ProviderErrorKind::Transient, "connection is closed")
    }
}

/// Result cardinality of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Execute only; report rows affected.
    None,
    /// At most one row.
    One,
    /// Every row.
    All,
}

/// A parameterized statement in neutral form.
#[derive(Debug, Clone)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
    /// Result columns, used to decode returned rows.
    pub shape: Vec<Column>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into(), params: Vec::new(), shape: Vec::new() }
    }

    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    #[must_use]
    pub fn bind_all(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.params.extend(values);
        self
    }

    #[must_use]
    pub fn returning(mut self, shape: &[Column]) -> Self {
        self.shape = shape.to_vec();
        self
    }
}

/// Rows and affected-row count of one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Row>,
    pub rows_affected: u64,
}

impl QueryOutput {
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn into_first(self) -> Option<Row> {
        self.rows.into_iter().next()
    }
}

/// One remote relational endpoint.
#[async_trait]
pub trait Provider: Send + Sync {
    fn id(&self) -> ProviderId;

    fn dialect(&self) -> Dialect;

    /// Human-readable name used in logs and alerts (never contains secrets).
    fn label(&self) -> String {
        format!("Provider {}", self.id())
    }

    /// Whether an INSERT can hand back the stored row.
    fn supports_returning(&self) -> bool {
        self.dialect().supports_returning()
    }

    /// Open (or replace) the live connection. Auto-commit: no transaction
    /// spans calls.
    async fn connect(&self) -> Result<(), ProviderError>;

    async fn close(&self);

    async fn execute(&self, statement: &Statement, fetch: Fetch) -> Result<QueryOutput, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_helpers() {
        assert_eq!(ProviderId::A.peer(), ProviderId::B);
        assert_eq!(ProviderId::B.peer(), ProviderId::A);
        assert_eq!(ProviderId::B.index(), 1);
        assert_eq!(ProviderId::A.to_string(), "A");
    }

    #[test]
    fn test_statement_builder() {
        let stmt = Statement::new("SELECT 1 FROM t WHERE a = ? AND b = ?")
            .bind(1i64)
            .bind("x")
            .returning(&[Column::int("one")]);
        assert_eq!(stmt.params.len(), 2);
        assert_eq!(stmt.shape.len(), 1);
    }

    #[test]
    fn test_not_connected_is_transient() {
        assert!(ProviderError::not_connected(ProviderId::A).is_transient());
    }
}
