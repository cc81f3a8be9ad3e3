// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! sqlx-backed provider.
//!
//! One `AnyPool` per provider, capped at a single connection so every
//! statement runs in auto-commit mode on the same session (no transaction
//! spans calls). Works against PostgreSQL, MySQL and SQLite URIs.
//!
//! ## sqlx Any Driver Quirks
//!
//! - MySQL TEXT columns may decode only as `Vec<u8>`; text is read as
//!   `String` first, then as UTF-8 bytes.
//! - Postgres `SERIAL`/`INT4` columns decode as `i32`; integers are read as
//!   `i64` first, then as `i32`.
//! - SQLite booleans are stored as integers; booleans are read as `bool`
//!   first, then as a non-zero integer.

use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::any::{AnyArguments, AnyPoolOptions, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyPool, Row as _};
use tracing::{debug, info};

use super::{ConnectionUri, Dialect, Fetch, Provider, ProviderError, ProviderErrorKind, ProviderId, QueryOutput, Statement};
use crate::error::StoreError;
use crate::schema::{Column, ColumnKind, Row, Value};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

pub(crate) fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Pool settings for a provider connection.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            idle_timeout: None,
        }
    }
}

pub struct SqlProvider {
    id: ProviderId,
    label: String,
    uri: ConnectionUri,
    settings: PoolSettings,
    pool: RwLock<Option<AnyPool>>,
}

impl SqlProvider {
    /// Create an unconnected provider; call [`Provider::connect`] to open it.
    pub fn new(id: ProviderId, label: impl Into<String>, url: &str, settings: PoolSettings) -> Result<Self, StoreError> {
        let uri = ConnectionUri::parse(url)?;
        Ok(Self {
            id,
            label: label.into(),
            uri,
            settings,
            pool: RwLock::new(None),
        })
    }

    pub fn uri(&self) -> &ConnectionUri {
        &self.uri
    }

    fn current_pool(&self) -> Result<AnyPool, ProviderError> {
        self.pool
            .read()
            .clone()
            .ok_or_else(|| ProviderError::not_connected(self.id))
    }

    fn error(&self, err: sqlx::Error) -> ProviderError {
        ProviderError::new(self.id, classify(&err), err.to_string())
    }
}

#[async_trait]
impl Provider for SqlProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn dialect(&self) -> Dialect {
        self.uri.dialect
    }

    fn label(&self) -> String {
        self.label.clone()
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        install_drivers();
        debug!(provider = %self.id, uri = %self.uri, "Opening provider connection");

        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(self.settings.connect_timeout)
            .idle_timeout(self.settings.idle_timeout)
            .test_before_acquire(false)
            .connect(self.uri.as_str())
            .await
            // a provider that cannot be opened at all is not worth retrying inline
            .map_err(|e| ProviderError::new(self.id, ProviderErrorKind::Unavailable, e.to_string()))?;

        let previous = self.pool.write().replace(pool);
        if let Some(previous) = previous {
            previous.close().await;
        }
        info!(provider = %self.id, label = %self.label, dialect = %self.uri.dialect, "Provider connected");
        Ok(())
    }

    async fn close(&self) {
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.close().await;
            debug!(provider = %self.id, "Provider connection closed");
        }
    }

    async fn execute(&self, statement: &Statement, fetch: Fetch) -> Result<QueryOutput, ProviderError> {
        let pool = self.current_pool()?;
        let sql = self.uri.dialect.render(&statement.sql);

        let query = build_query(&sql, &statement.params);

        match fetch {
            Fetch::None => {
                let result = query.execute(&pool).await.map_err(|e| self.error(e))?;
                Ok(QueryOutput {
                    rows: Vec::new(),
                    rows_affected: result.rows_affected(),
                })
            }
            Fetch::One => {
                let row = query.fetch_optional(&pool).await.map_err(|e| self.error(e))?;
                let rows = match row {
                    Some(row) => vec![decode_row(&row, &statement.shape).map_err(|e| self.decode_error(e))?],
                    None => Vec::new(),
                };
                Ok(QueryOutput { rows_affected: rows.len() as u64, rows })
            }
            Fetch::All => {
                let raw = query.fetch_all(&pool).await.map_err(|e| self.error(e))?;
                let rows = raw
                    .iter()
                    .map(|row| decode_row(row, &statement.shape))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| self.decode_error(e))?;
                Ok(QueryOutput { rows_affected: rows.len() as u64, rows })
            }
        }
    }
}

impl SqlProvider {
    fn decode_error(&self, err: StoreError) -> ProviderError {
        ProviderError::new(self.id, ProviderErrorKind::Rejected, err.to_string())
    }
}

/// Map a driver error onto the failure taxonomy, once, at the boundary.
pub(crate) fn classify(err: &sqlx::Error) -> ProviderErrorKind {
    match err {
        // reset, broken pipe, aborted, refused: all socket-level
        sqlx::Error::Io(_) => ProviderErrorKind::Transient,
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => {
            ProviderErrorKind::Transient
        }
        // a stale session usually surfaces as a protocol desync
        sqlx::Error::Protocol(_) => ProviderErrorKind::Transient,
        sqlx::Error::Database(db) if db.code().is_some_and(|code| is_forced_closure(&code)) => {
            ProviderErrorKind::Transient
        }
        sqlx::Error::Database(_)
        | sqlx::Error::RowNotFound
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::Encode(_)
        | sqlx::Error::TypeNotFound { .. } => ProviderErrorKind::Rejected,
        _ => ProviderErrorKind::Unavailable,
    }
}

/// SQLSTATEs a server sends when it drops the session: class 08 (connection
/// exception, also MySQL's `08S01`) and the 57P0x shutdown codes.
fn is_forced_closure(sqlstate: &str) -> bool {
    sqlstate.starts_with("08") || matches!(sqlstate, "57P01" | "57P02" | "57P03")
}

/// Prepare `sql` with every parameter bound as its typed (nullable) value.
pub(crate) fn build_query<'q>(sql: &'q str, params: &[Value]) -> Query<'q, Any, AnyArguments<'q>> {
    params.iter().fold(sqlx::query(sql), bind_value)
}

fn bind_value<'q>(query: Query<'q, Any, AnyArguments<'q>>, value: &Value) -> Query<'q, Any, AnyArguments<'q>> {
    match value {
        Value::Int(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.clone()),
        Value::Bool(v) => query.bind(*v),
    }
}

pub(crate) fn decode_row(row: &AnyRow, shape: &[Column]) -> Result<Row, StoreError> {
    if shape.len() > row.len() {
        return Err(StoreError::Decode(format!(
            "expected {} columns, row has {}",
            shape.len(),
            row.len()
        )));
    }
    shape
        .iter()
        .enumerate()
        .map(|(idx, column)| decode_value(row, idx, column))
        .collect::<Result<Vec<_>, _>>()
        .map(Row::new)
}

fn decode_value(row: &AnyRow, idx: usize, column: &Column) -> Result<Value, StoreError> {
    let mismatch = || StoreError::Decode(format!("column '{}' (#{}) is not {:?}", column.name, idx, column.kind));
    match column.kind {
        ColumnKind::Integer => row
            .try_get::<Option<i64>, _>(idx)
            .or_else(|_| row.try_get::<Option<i32>, _>(idx).map(|v| v.map(i64::from)))
            .map(Value::Int)
            .map_err(|_| mismatch()),
        ColumnKind::Text => row
            .try_get::<Option<String>, _>(idx)
            .or_else(|_| {
                row.try_get::<Option<Vec<u8>>, _>(idx)
                    .map(|bytes| bytes.and_then(|b| String::from_utf8(b).ok()))
            })
            .map(Value::Text)
            .map_err(|_| mismatch()),
        ColumnKind::Boolean => row
            .try_get::<Option<bool>, _>(idx)
            .or_else(|_| row.try_get::<Option<i64>, _>(idx).map(|v| v.map(|i| i != 0)))
            .or_else(|_| row.try_get::<Option<i32>, _>(idx).map(|v| v.map(|i| i != 0)))
            .map(Value::Bool)
            .map_err(|_| mismatch()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use std::error::Error as StdError;
    use tempfile::tempdir;

    /// Server-side error carrying only a SQLSTATE.
    #[derive(Debug)]
    struct ServerError {
        code: &'static str,
        message: &'static str,
    }

    impl std::fmt::Display for ServerError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}: {}", self.code, self.message)
        }
    }

    impl StdError for ServerError {}

    impl sqlx::error::DatabaseError for ServerError {
        fn message(&self) -> &str {
            self.message
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.code))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn StdError + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn StdError + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> sqlx::error::ErrorKind {
            sqlx::error::ErrorKind::Other
        }
    }

    fn server_error(code: &'static str, message: &'static str) -> sqlx::Error {
        sqlx::Error::Database(Box::new(ServerError { code, message }))
    }

    fn sqlite_url(dir: &std::path::Path, name: &str) -> String {
        format!("sqlite://{}?mode=rwc", dir.join(name).display())
    }

    #[test]
    fn test_classify_io_errors_transient() {
        let err = sqlx::Error::Io(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"));
        assert_eq!(classify(&err), ProviderErrorKind::Transient);
        assert_eq!(classify(&sqlx::Error::PoolClosed), ProviderErrorKind::Transient);
        assert_eq!(classify(&sqlx::Error::RowNotFound), ProviderErrorKind::Rejected);
        assert_eq!(
            classify(&sqlx::Error::Configuration("bad".into())),
            ProviderErrorKind::Unavailable
        );
    }

    #[test]
    fn test_classify_forced_closure_transient() {
        let admin = server_error("57P01", "terminating connection due to administrator command");
        assert_eq!(classify(&admin), ProviderErrorKind::Transient);
        assert_eq!(classify(&server_error("57P02", "crash shutdown")), ProviderErrorKind::Transient);
        assert_eq!(classify(&server_error("57P03", "cannot connect now")), ProviderErrorKind::Transient);
        assert_eq!(classify(&server_error("08006", "connection failure")), ProviderErrorKind::Transient);
        assert_eq!(classify(&server_error("08S01", "communication link failure")), ProviderErrorKind::Transient);

        // refusals stay refusals
        assert_eq!(classify(&server_error("23505", "duplicate key")), ProviderErrorKind::Rejected);
        assert_eq!(classify(&server_error("42P01", "relation does not exist")), ProviderErrorKind::Rejected);
    }

    #[tokio::test]
    async fn test_execute_before_connect_is_transient() {
        let dir = tempdir().unwrap();
        let provider = SqlProvider::new(ProviderId::A, "a", &sqlite_url(dir.path(), "a.db"), PoolSettings::default()).unwrap();
        let err = provider.execute(&Statement::new("SELECT 1"), Fetch::None).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_roundtrip_typed_values() {
        let dir = tempdir().unwrap();
        let provider = SqlProvider::new(ProviderId::B, "b", &sqlite_url(dir.path(), "b.db"), PoolSettings::default()).unwrap();
        provider.connect().await.unwrap();

        provider
            .execute(
                &Statement::new("CREATE TABLE t (id INTEGER PRIMARY KEY, label TEXT, flag BOOLEAN)"),
                Fetch::None,
            )
            .await
            .unwrap();

        let inserted = provider
            .execute(
                &Statement::new("INSERT INTO t (label, flag) VALUES (?, ?)")
                    .bind("hello")
                    .bind(true),
                Fetch::None,
            )
            .await
            .unwrap();
        assert_eq!(inserted.rows_affected, 1);

        provider
            .execute(
                &Statement::new("INSERT INTO t (label, flag) VALUES (?, ?)")
                    .bind(Value::Text(None))
                    .bind(Value::Bool(None)),
                Fetch::None,
            )
            .await
            .unwrap();

        let out = provider
            .execute(
                &Statement::new("SELECT id, label, flag FROM t ORDER BY id").returning(&[
                    Column::int("id"),
                    Column::text("label"),
                    Column::boolean("flag"),
                ]),
                Fetch::All,
            )
            .await
            .unwrap();

        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.rows[0].int(0).unwrap(), Some(1));
        assert_eq!(out.rows[0].text(1).unwrap().as_deref(), Some("hello"));
        assert_eq!(out.rows[0].boolean(2).unwrap(), Some(true));
        assert!(out.rows[1].get(1).unwrap().is_null());

        provider.close().await;
    }

    #[tokio::test]
    async fn test_constraint_violation_is_rejected() {
        let dir = tempdir().unwrap();
        let provider = SqlProvider::new(ProviderId::A, "a", &sqlite_url(dir.path(), "c.db"), PoolSettings::default()).unwrap();
        provider.connect().await.unwrap();
        provider
            .execute(&Statement::new("CREATE TABLE u (name TEXT PRIMARY KEY)"), Fetch::None)
            .await
            .unwrap();
        let insert = Statement::new("INSERT INTO u (name) VALUES (?)").bind("dup");
        provider.execute(&insert, Fetch::None).await.unwrap();

        let err = provider.execute(&insert, Fetch::None).await.unwrap_err();
        assert_eq!(err.kind, ProviderErrorKind::Rejected);
        assert_eq!(err.provider, ProviderId::A);
    }
}
