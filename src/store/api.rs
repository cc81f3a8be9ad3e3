// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Record-level operations used by the ingestion pipeline.
//!
//! Lookups consult the local cache first and only go to the providers when
//! the cache is absent or errors. A cache miss is an answer, not a reason to
//! ask the providers.

use std::path::Path;

use tracing::{debug, info, warn};

use super::types::{SyncReport, TableSync};
use super::MirrorStore;
use crate::cache::{name_lookup_sql, name_variants};
use crate::error::{Result, StoreError};
use crate::metrics;
use crate::provider::{Fetch, Statement};
use crate::record::{AlbumOwners, MediaRecord, TripConfig};
use crate::schema::{quoted_list, Column, Row, TableSpec, Value, MEDIA_LIBRARY, REPLICATED_TABLES, SEQUENCE_COLUMN, TRIPS_CONFIG};

const ONE: [Column; 1] = [Column::int("one")];

impl MirrorStore {
    /// Whether a file with this name (any case, any extension alias) is stored.
    pub async fn exists_by_name(&self, filename: &str) -> Result<bool> {
        if let Some(cache) = &self.cache {
            match cache.exists_by_name(filename).await {
                Ok(found) => {
                    metrics::record_cache_lookup("exists_by_name", hit_or_miss(found));
                    return Ok(found);
                }
                Err(e) => {
                    metrics::record_cache_lookup("exists_by_name", "error");
                    warn!(error = %e, "Local cache query failed, asking providers");
                }
            }
        }

        let variants: Vec<Value> = name_variants(filename).into_iter().map(Value::from).collect();
        let stmt = Statement::new(name_lookup_sql(variants.len()))
            .bind_all(variants)
            .returning(&ONE);
        Ok(self.read(&stmt, Fetch::One).await?.first().is_some())
    }

    pub async fn exists_by_hash(&self, file_hash: &str) -> Result<bool> {
        if let Some(cache) = &self.cache {
            match cache.exists_by_hash(file_hash).await {
                Ok(found) => {
                    metrics::record_cache_lookup("exists_by_hash", hit_or_miss(found));
                    return Ok(found);
                }
                Err(e) => {
                    metrics::record_cache_lookup("exists_by_hash", "error");
                    warn!(error = %e, "Local cache query failed, asking providers");
                }
            }
        }

        let stmt = Statement::new(format!(
            "SELECT 1 FROM \"{}\" WHERE \"file_hash\" = ? LIMIT 1",
            MEDIA_LIBRARY.name
        ))
        .bind(file_hash)
        .returning(&ONE);
        Ok(self.read(&stmt, Fetch::One).await?.first().is_some())
    }

    /// Record with this content hash. A cache miss falls through to the
    /// providers, since the cache may lag.
    pub async fn get_by_hash(&self, file_hash: &str) -> Result<Option<MediaRecord>> {
        if let Some(cache) = &self.cache {
            match cache.get_by_hash(file_hash).await {
                Ok(Some(record)) => {
                    metrics::record_cache_lookup("get_by_hash", "hit");
                    return Ok(Some(record));
                }
                Ok(None) => metrics::record_cache_lookup("get_by_hash", "miss"),
                Err(e) => {
                    metrics::record_cache_lookup("get_by_hash", "error");
                    warn!(error = %e, "Local cache query failed, asking providers");
                }
            }
        }

        let stmt = Statement::new(format!(
            "SELECT {} FROM \"{}\" WHERE \"file_hash\" = ? LIMIT 1",
            MEDIA_LIBRARY.column_list(),
            MEDIA_LIBRARY.name
        ))
        .bind(file_hash)
        .returning(MEDIA_LIBRARY.columns);
        self.read(&stmt, Fetch::One)
            .await?
            .into_first()
            .map(|row| MediaRecord::from_row(&row))
            .transpose()
    }

    /// Insert on every active provider and project the result into the cache.
    ///
    /// The returned record carries provider A's `sl_no` (B's if A is down).
    /// Providers without `RETURNING` are asked for the row by its hash
    /// afterwards; if that fails too the `sl_no` is left unset.
    pub async fn insert(&self, record: &MediaRecord) -> Result<MediaRecord> {
        let row = self.insert_row(&MEDIA_LIBRARY, record.insert_values()).await?;
        match row {
            Some(row) => MediaRecord::from_row(&row),
            None => Ok(MediaRecord { sl_no: None, ..record.clone() }),
        }
    }

    /// Every configured trip, from the cache when it has any.
    pub async fn get_trips(&self) -> Result<Vec<TripConfig>> {
        if let Some(cache) = &self.cache {
            match cache.trips().await {
                Ok(trips) if !trips.is_empty() => {
                    metrics::record_cache_lookup("get_trips", "hit");
                    return Ok(trips);
                }
                Ok(_) => metrics::record_cache_lookup("get_trips", "miss"),
                Err(e) => {
                    metrics::record_cache_lookup("get_trips", "error");
                    warn!(error = %e, "Failed to fetch trips locally");
                }
            }
        }

        let stmt = Statement::new(format!(
            "SELECT {} FROM \"{}\" ORDER BY \"name\"",
            TRIPS_CONFIG.column_list(),
            TRIPS_CONFIG.name
        ))
        .returning(TRIPS_CONFIG.columns);
        self.read(&stmt, Fetch::All)
            .await?
            .rows
            .iter()
            .map(TripConfig::from_row)
            .collect()
    }

    /// Replace the album ids of trip `name` on the providers and in the cache.
    /// Returns the rows updated on the provider that answered.
    pub async fn update_trip_album_id(&self, name: &str, owners: &AlbumOwners) -> Result<u64> {
        let encoded = owners.to_column()?;
        let stmt = Statement::new(format!(
            "UPDATE \"{}\" SET \"album_id\" = ? WHERE \"name\" = ?",
            TRIPS_CONFIG.name
        ))
        .bind(encoded.clone())
        .bind(name);
        let updated = self.write(&stmt, Fetch::None).await?.rows_affected;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.update_trip_album_id(name, encoded).await {
                warn!(trip = name, error = %e, "Failed to update trip album id in cache");
            }
        }
        info!(trip = name, owners = owners.iter().count(), "Updated album id for trip");
        Ok(updated)
    }

    /// Create a trip. Rejects an empty name or an end date before the start.
    pub async fn insert_trip(&self, trip: &TripConfig) -> Result<TripConfig> {
        trip.validate()?;
        let row = self.insert_row(&TRIPS_CONFIG, trip.insert_values()?).await?;
        match row {
            Some(row) => TripConfig::from_row(&row),
            None => Ok(TripConfig { sl_no: None, ..trip.clone() }),
        }
    }

    /// Whether a trip with this name exists on the providers.
    pub async fn trip_exists(&self, name: &str) -> Result<bool> {
        let stmt = Statement::new(format!(
            "SELECT 1 FROM \"{}\" WHERE \"name\" = ? LIMIT 1",
            TRIPS_CONFIG.name
        ))
        .bind(name)
        .returning(&ONE);
        Ok(self.read(&stmt, Fetch::One).await?.first().is_some())
    }

    /// Pull every row above the cache's max `sl_no` into the cache, then
    /// compare row counts with the providers.
    #[tracing::instrument(skip(self))]
    pub async fn sync_to_cache(&self) -> Result<SyncReport> {
        let Some(cache) = &self.cache else {
            return Err(StoreError::Cache("local cache is not enabled".into()));
        };

        let mut report = SyncReport::default();
        for spec in REPLICATED_TABLES {
            let after = cache.max_sl_no(spec).await?.unwrap_or(0);
            let fetch = Statement::new(format!(
                "SELECT {} FROM \"{}\" WHERE \"{}\" > ? ORDER BY \"{}\" ASC",
                spec.column_list(),
                spec.name,
                SEQUENCE_COLUMN,
                SEQUENCE_COLUMN
            ))
            .bind(after)
            .returning(spec.columns);
            let rows = self.read(&fetch, Fetch::All).await?.rows;
            let pulled = cache.upsert_many(spec, &rows).await?;
            if pulled > 0 {
                info!(table = spec.name, rows = pulled, after, "Pulled new rows into cache");
            }

            let count = Statement::new(format!("SELECT COUNT(*) FROM \"{}\"", spec.name))
                .returning(&[Column::int("cnt")]);
            let cloud_rows = self
                .read(&count, Fetch::One)
                .await?
                .first()
                .map(|row| row.int(0))
                .transpose()?
                .flatten()
                .unwrap_or(0);
            let cache_rows = cache.count(spec).await?;

            let table = TableSync {
                table: spec.name.to_string(),
                pulled,
                cloud_rows,
                cache_rows,
            };
            if table.counts_match() {
                info!(table = spec.name, rows = cache_rows, "Local cache fully synchronized");
            } else {
                warn!(
                    table = spec.name,
                    cloud_rows,
                    cache_rows,
                    "Row count mismatch after sync, local cache may be incomplete"
                );
            }
            report.tables.push(table);
        }
        Ok(report)
    }

    /// Point-in-time copy of the cache file. Returns `false` when caching is
    /// disabled.
    pub async fn snapshot_local_cache(&self, target: impl AsRef<Path>) -> Result<bool> {
        let Some(cache) = &self.cache else {
            warn!("No local cache to snapshot, skipping");
            return Ok(false);
        };
        cache.snapshot(target).await?;
        Ok(true)
    }

    /// Mirrored insert of `values` (every column but `sl_no`), then cache
    /// upsert of the stored row.
    async fn insert_row(&self, spec: &TableSpec, values: Vec<Value>) -> Result<Option<Row>> {
        let returning = self
            .connections
            .active_providers()
            .iter()
            .filter_map(|id| self.connections.provider(*id))
            .all(|p| p.supports_returning());

        let columns = spec.data_columns();
        let key = columns
            .iter()
            .position(|c| c.name == spec.natural_key)
            .and_then(|idx| values.get(idx).cloned());

        let mut sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            spec.name,
            quoted_list(columns),
            vec!["?"; columns.len()].join(", ")
        );
        if returning {
            sql.push_str(&format!(" RETURNING {}", spec.column_list()));
        }
        let mut stmt = Statement::new(sql).bind_all(values);
        let fetch = if returning {
            stmt = stmt.returning(spec.columns);
            Fetch::One
        } else {
            Fetch::None
        };

        let mut row = self.write(&stmt, fetch).await?.into_first();
        if row.is_none() {
            if let Some(key) = key {
                row = self.read_back(spec, key).await;
            }
        }

        match (&row, &self.cache) {
            (Some(row), Some(cache)) => {
                if let Err(e) = cache.upsert(spec, row).await {
                    warn!(table = spec.name, error = %e, "Failed to mirror insert into cache");
                }
            }
            (None, Some(_)) => debug!(table = spec.name, "No stored row to project, cache will catch up on sync"),
            _ => {}
        }
        Ok(row)
    }

    /// Latest row with this business key, from the first active provider
    /// that answers. Best effort: the write already succeeded.
    async fn read_back(&self, spec: &TableSpec, key: Value) -> Option<Row> {
        let stmt = Statement::new(format!(
            "SELECT {} FROM \"{}\" WHERE \"{}\" = ? ORDER BY \"{}\" DESC LIMIT 1",
            spec.column_list(),
            spec.name,
            spec.natural_key,
            SEQUENCE_COLUMN
        ))
        .bind(key)
        .returning(spec.columns);

        for id in self.connections.active_providers() {
            match self.connections.execute_on(id, &stmt, Fetch::One, "read_back").await {
                Ok(output) => return output.into_first(),
                Err(e) => debug!(provider = %id, table = spec.name, error = %e, "Read-back after insert failed"),
            }
        }
        warn!(table = spec.name, "Inserted row could not be read back");
        None
    }
}

fn hit_or_miss(found: bool) -> &'static str {
    if found {
        "hit"
    } else {
        "miss"
    }
}
