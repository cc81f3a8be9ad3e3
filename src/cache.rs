// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local cache projection.
//!
//! A single SQLite file holding the replicated tables, keyed for
//! replace-by-key upserts so every write is safe to re-apply:
//!
//! ```sql
//! CREATE TABLE media_library (
//!   sl_no INTEGER PRIMARY KEY,
//!   file_hash TEXT, filename TEXT, ...
//! );
//! CREATE INDEX idx_filename ON media_library (filename);
//! CREATE INDEX idx_hash ON media_library (file_hash);
//!
//! CREATE TABLE trips_config (
//!   sl_no INTEGER, name TEXT PRIMARY KEY, ...
//! );
//! ```
//!
//! The cache lags the providers and is never a source of truth; callers fall
//! back to the providers whenever it errors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row as _};
use tracing::{debug, info, warn};

use crate::error::{Result, StoreError};
use crate::metrics;
use crate::provider::sql::{build_query, decode_row, install_drivers};
use crate::record::{MediaRecord, TripConfig};
use crate::schema::{Column, ColumnKind, Row, TableSpec, Value, MEDIA_LIBRARY, REPLICATED_TABLES, SEQUENCE_COLUMN, TRIPS_CONFIG};

/// Extension groups treated as the same file type in name lookups.
pub const EXTENSION_ALIASES: &[&[&str]] = &[&["jpg", "jpeg"], &["tif", "tiff"]];

/// Filenames that count as the same file as `filename`, in its own case.
///
/// `IMG_1.JPG` yields `IMG_1.jpg` and `IMG_1.jpeg`. Case folding happens in
/// SQL on both sides of the comparison, so one engine decides what
/// "same case" means.
pub fn name_variants(filename: &str) -> Vec<String> {
    let Some((stem, ext)) = filename.rsplit_once('.') else {
        return vec![filename.to_string()];
    };
    let ext = ext.to_ascii_lowercase();
    match EXTENSION_ALIASES.iter().find(|group| group.contains(&ext.as_str())) {
        Some(group) => group.iter().map(|alias| format!("{}.{}", stem, alias)).collect(),
        None => vec![filename.to_string()],
    }
}

/// `LOWER(filename) IN (LOWER(?), ...)` lookup over the name variants.
pub(crate) fn name_lookup_sql(variants: usize) -> String {
    let placeholders = vec!["LOWER(?)"; variants.max(1)].join(", ");
    format!(
        "SELECT 1 FROM \"{}\" WHERE LOWER(\"filename\") IN ({}) LIMIT 1",
        MEDIA_LIBRARY.name, placeholders
    )
}

const ONE: [Column; 1] = [Column::int("one")];

pub struct LocalCache {
    pool: AnyPool,
    path: PathBuf,
}

impl LocalCache {
    /// Open (creating if needed) the cache file and bring its schema up to date.
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        install_drivers();
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Cache(format!("create {}: {}", parent.display(), e)))?;
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = AnyPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&url)
            .await
            .map_err(|e| StoreError::Cache(format!("open {}: {}", path.display(), e)))?;

        let cache = Self { pool, path };
        cache.enable_wal_mode().await?;
        cache.init_schema().await?;
        info!(path = %cache.path.display(), "Local cache ready");
        Ok(cache)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// WAL lets snapshot and lookup readers run alongside the writer.
    async fn enable_wal_mode(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Cache(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Cache(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<()> {
        for spec in REPLICATED_TABLES {
            self.exec(&create_table_sql(spec), &[]).await?;
            self.add_missing_columns(spec).await?;
            for (index, column) in spec.cache_indexes {
                let sql = format!(
                    "CREATE INDEX IF NOT EXISTS \"{}\" ON \"{}\" (\"{}\")",
                    index, spec.name, column
                );
                self.exec(&sql, &[]).await?;
            }
        }
        Ok(())
    }

    /// Add columns an older cache file was created without.
    async fn add_missing_columns(&self, spec: &TableSpec) -> Result<()> {
        let rows = sqlx::query(&format!("PRAGMA table_info(\"{}\")", spec.name))
            .fetch_all(&self.pool)
            .await
            .map_err(cache_err)?;

        let existing: Vec<String> = rows
            .iter()
            .filter_map(|row| {
                row.try_get::<String, _>(1)
                    .ok()
                    .or_else(|| row.try_get::<Vec<u8>, _>(1).ok().and_then(|b| String::from_utf8(b).ok()))
            })
            .collect();

        for column in spec.columns {
            if existing.iter().any(|name| name.eq_ignore_ascii_case(column.name)) {
                continue;
            }
            warn!(table = spec.name, column = column.name, "Cache table missing column, adding it");
            let sql = format!(
                "ALTER TABLE \"{}\" ADD COLUMN \"{}\" {}",
                spec.name,
                column.name,
                sqlite_type(column.kind)
            );
            self.exec(&sql, &[]).await?;
        }
        Ok(())
    }

    async fn exec(&self, sql: &str, params: &[Value]) -> Result<u64> {
        build_query(sql, params)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(cache_err)
    }

    async fn fetch_optional(&self, sql: &str, params: &[Value], shape: &[Column]) -> Result<Option<Row>> {
        let row = build_query(sql, params)
            .fetch_optional(&self.pool)
            .await
            .map_err(cache_err)?;
        row.map(|r| decode_row(&r, shape)).transpose()
    }

    async fn fetch_all(&self, sql: &str, params: &[Value], shape: &[Column]) -> Result<Vec<Row>> {
        build_query(sql, params)
            .fetch_all(&self.pool)
            .await
            .map_err(cache_err)?
            .iter()
            .map(|r| decode_row(r, shape))
            .collect()
    }

    /// Replace the row with the same cache key.
    pub async fn upsert(&self, spec: &TableSpec, row: &Row) -> Result<()> {
        check_width(spec, row)?;
        self.exec(&replace_sql(spec), row.values()).await?;
        metrics::record_cache_rows(spec.name, 1);
        Ok(())
    }

    /// Replace many rows in one transaction.
    pub async fn upsert_many(&self, spec: &TableSpec, rows: &[Row]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let sql = replace_sql(spec);
        let mut tx = self.pool.begin().await.map_err(cache_err)?;
        for row in rows {
            check_width(spec, row)?;
            build_query(&sql, row.values())
                .execute(&mut *tx)
                .await
                .map_err(cache_err)?;
        }
        tx.commit().await.map_err(cache_err)?;
        metrics::record_cache_rows(spec.name, rows.len());
        debug!(table = spec.name, rows = rows.len(), "Cache rows upserted");
        Ok(rows.len())
    }

    /// Whether a row matches every `(column, value)` pair.
    pub async fn exists(&self, spec: &TableSpec, key_columns: &[&str], values: &[Value]) -> Result<bool> {
        if key_columns.is_empty() || key_columns.len() != values.len() {
            return Err(StoreError::Cache(format!(
                "exists on {} needs matching key columns and values ({} vs {})",
                spec.name,
                key_columns.len(),
                values.len()
            )));
        }
        let predicate = key_columns
            .iter()
            .map(|c| format!("\"{}\" = ?", c))
            .collect::<Vec<_>>()
            .join(" AND ");
        let sql = format!("SELECT 1 FROM \"{}\" WHERE {} LIMIT 1", spec.name, predicate);
        Ok(self.fetch_optional(&sql, values, &ONE).await?.is_some())
    }

    /// Row with the given cache key.
    pub async fn get(&self, spec: &TableSpec, key: &Value) -> Result<Option<Row>> {
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE \"{}\" = ? LIMIT 1",
            spec.column_list(),
            spec.name,
            spec.cache_key
        );
        self.fetch_optional(&sql, std::slice::from_ref(key), spec.columns).await
    }

    /// Case-insensitive filename lookup honouring extension aliases.
    pub async fn exists_by_name(&self, filename: &str) -> Result<bool> {
        let variants: Vec<Value> = name_variants(filename).into_iter().map(Value::from).collect();
        let found = self
            .fetch_optional(&name_lookup_sql(variants.len()), &variants, &ONE)
            .await?
            .is_some();
        Ok(found)
    }

    pub async fn exists_by_hash(&self, file_hash: &str) -> Result<bool> {
        self.exists(&MEDIA_LIBRARY, &["file_hash"], &[Value::from(file_hash)]).await
    }

    pub async fn get_by_hash(&self, file_hash: &str) -> Result<Option<MediaRecord>> {
        let sql = format!(
            "SELECT {} FROM \"{}\" WHERE \"file_hash\" = ? LIMIT 1",
            MEDIA_LIBRARY.column_list(),
            MEDIA_LIBRARY.name
        );
        self.fetch_optional(&sql, &[Value::from(file_hash)], MEDIA_LIBRARY.columns)
            .await?
            .map(|row| MediaRecord::from_row(&row))
            .transpose()
    }

    pub async fn trips(&self) -> Result<Vec<TripConfig>> {
        let sql = format!(
            "SELECT {} FROM \"{}\" ORDER BY \"name\"",
            TRIPS_CONFIG.column_list(),
            TRIPS_CONFIG.name
        );
        self.fetch_all(&sql, &[], TRIPS_CONFIG.columns)
            .await?
            .iter()
            .map(TripConfig::from_row)
            .collect()
    }

    pub async fn update_trip_album_id(&self, name: &str, album_id: Option<String>) -> Result<u64> {
        let sql = format!("UPDATE \"{}\" SET \"album_id\" = ? WHERE \"name\" = ?", TRIPS_CONFIG.name);
        self.exec(&sql, &[Value::Text(album_id), Value::from(name)]).await
    }

    /// Highest `sl_no` held for `spec`, `None` when the table is empty.
    pub async fn max_sl_no(&self, spec: &TableSpec) -> Result<Option<i64>> {
        let sql = format!("SELECT MAX(\"{}\") FROM \"{}\"", SEQUENCE_COLUMN, spec.name);
        let row = self.fetch_optional(&sql, &[], &[Column::int("max_sl_no")]).await?;
        Ok(match row {
            Some(row) => row.int(0)?,
            None => None,
        })
    }

    pub async fn count(&self, spec: &TableSpec) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", spec.name);
        let row = self.fetch_optional(&sql, &[], &[Column::int("cnt")]).await?;
        Ok(row.map(|r| r.int(0)).transpose()?.flatten().unwrap_or(0))
    }

    /// Point-in-time copy of the cache into `target` (replaced if present).
    #[tracing::instrument(skip(self, target), fields(target = %target.as_ref().display()))]
    pub async fn snapshot(&self, target: impl AsRef<Path>) -> Result<()> {
        let target = target.as_ref();
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::Cache(format!("create {}: {}", parent.display(), e)))?;
        }
        match tokio::fs::remove_file(target).await {
            Ok(()) => debug!("Replacing existing snapshot"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StoreError::Cache(format!("remove {}: {}", target.display(), e))),
        }

        // VACUUM INTO takes a literal, not a bind parameter
        let literal = target.display().to_string().replace('\'', "''");
        self.exec(&format!("VACUUM INTO '{}'", literal), &[]).await?;
        info!(target = %target.display(), "Cache snapshot written");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn cache_err(e: sqlx::Error) -> StoreError {
    StoreError::Cache(e.to_string())
}

fn check_width(spec: &TableSpec, row: &Row) -> Result<()> {
    if row.len() != spec.columns.len() {
        return Err(StoreError::Cache(format!(
            "{} row has {} values, expected {}",
            spec.name,
            row.len(),
            spec.columns.len()
        )));
    }
    Ok(())
}

fn sqlite_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Integer => "INTEGER",
        ColumnKind::Text => "TEXT",
        ColumnKind::Boolean => "BOOLEAN",
    }
}

fn create_table_sql(spec: &TableSpec) -> String {
    let defs = spec
        .columns
        .iter()
        .map(|c| {
            let mut def = format!("\"{}\" {}", c.name, sqlite_type(c.kind));
            if c.name == spec.cache_key {
                def.push_str(" PRIMARY KEY");
            }
            def
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", spec.name, defs)
}

fn replace_sql(spec: &TableSpec) -> String {
    let placeholders = vec!["?"; spec.columns.len()].join(", ");
    format!(
        "REPLACE INTO \"{}\" ({}) VALUES ({})",
        spec.name,
        spec.column_list(),
        placeholders
    )
}
