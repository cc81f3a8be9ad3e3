// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed records of the replicated tables.
//!
//! Each record converts to and from a [`Row`] laid out in its
//! [`TableSpec`](crate::schema::TableSpec) column order, so the same row can
//! travel between providers and the local cache unchanged.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::schema::{Row, Value, MEDIA_LIBRARY, TRIPS_CONFIG};

/// Date format of the `start`/`end` trip columns.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Owner key given to an album id stored before per-account ids existed.
pub const LEGACY_OWNER: &str = "legacy_creator";

/// One uploaded media file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRecord {
    /// Provider-assigned; `None` until inserted.
    pub sl_no: Option<i64>,
    pub file_hash: String,
    pub filename: String,
    pub file_size_bytes: Option<i64>,
    pub upload_date: Option<String>,
    pub account_email: Option<String>,
    pub device_source: Option<String>,
    pub remote_id: Option<String>,
    pub album_name: Option<String>,
    pub thumbid: Option<String>,
}

impl MediaRecord {
    pub fn new(file_hash: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            file_hash: file_hash.into(),
            filename: filename.into(),
            ..Default::default()
        }
    }

    /// Full row including `sl_no`, in `media_library` column order.
    pub fn to_row(&self) -> Row {
        Row::new(vec![
            Value::Int(self.sl_no),
            Value::from(self.file_hash.clone()),
            Value::from(self.filename.clone()),
            Value::Int(self.file_size_bytes),
            Value::Text(self.upload_date.clone()),
            Value::Text(self.account_email.clone()),
            Value::Text(self.device_source.clone()),
            Value::Text(self.remote_id.clone()),
            Value::Text(self.album_name.clone()),
            Value::Text(self.thumbid.clone()),
        ])
    }

    /// Values for a fresh insert (every column but `sl_no`).
    pub fn insert_values(&self) -> Vec<Value> {
        self.to_row().into_values().into_iter().skip(1).collect()
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        if row.len() != MEDIA_LIBRARY.columns.len() {
            return Err(StoreError::Decode(format!(
                "media_library row has {} columns, expected {}",
                row.len(),
                MEDIA_LIBRARY.columns.len()
            )));
        }
        Ok(Self {
            sl_no: row.int(0)?,
            file_hash: row.required_text(1)?,
            filename: row.required_text(2)?,
            file_size_bytes: row.int(3)?,
            upload_date: row.text(4)?,
            account_email: row.text(5)?,
            device_source: row.text(6)?,
            remote_id: row.text(7)?,
            album_name: row.text(8)?,
            thumbid: row.text(9)?,
        })
    }
}

/// Remote album ids of one trip, keyed by owning account.
///
/// Stored as a JSON object in the `album_id` text column. A bare string (the
/// older single-owner form) decodes as `{"legacy_creator": <id>}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlbumOwners(BTreeMap<String, String>);

impl AlbumOwners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode the `album_id` column. Empty or NULL means no albums yet.
    pub fn from_column(raw: Option<&str>) -> Result<Self> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Self::default());
        };
        if raw.starts_with('{') && raw.ends_with('}') {
            return serde_json::from_str(raw)
                .map_err(|e| StoreError::Decode(format!("album_id is not a JSON object: {}", e)));
        }
        Ok(Self::default().with(LEGACY_OWNER, raw))
    }

    /// Encode for the `album_id` column; `None` when there are no owners.
    pub fn to_column(&self) -> Result<Option<String>> {
        if self.0.is_empty() {
            return Ok(None);
        }
        serde_json::to_string(&self.0)
            .map(Some)
            .map_err(|e| StoreError::Decode(format!("album_id encode failed: {}", e)))
    }

    #[must_use]
    pub fn with(mut self, owner: impl Into<String>, album_id: impl Into<String>) -> Self {
        self.set(owner, album_id);
        self
    }

    pub fn set(&mut self, owner: impl Into<String>, album_id: impl Into<String>) {
        self.0.insert(owner.into(), album_id.into());
    }

    pub fn get(&self, owner: &str) -> Option<&str> {
        self.0.get(owner).map(String::as_str)
    }

    /// Album id left by the single-owner format, if any.
    pub fn legacy(&self) -> Option<&str> {
        self.get(LEGACY_OWNER)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// A configured trip: date range that groups uploads into one album.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripConfig {
    pub sl_no: Option<i64>,
    pub name: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub require_gps: bool,
    pub album_id: AlbumOwners,
}

impl TripConfig {
    pub fn new(name: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            sl_no: None,
            name: name.into(),
            start,
            end,
            require_gps: false,
            album_id: AlbumOwners::default(),
        }
    }

    /// Reject an inverted date range.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Config("trip name is empty".into()));
        }
        if self.end < self.start {
            return Err(StoreError::Config(format!(
                "trip '{}' ends ({}) before it starts ({})",
                self.name, self.end, self.start
            )));
        }
        Ok(())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Full row including `sl_no`, in `trips_config` column order.
    pub fn to_row(&self) -> Result<Row> {
        Ok(Row::new(vec![
            Value::Int(self.sl_no),
            Value::from(self.name.clone()),
            Value::from(self.start.format(DATE_FORMAT).to_string()),
            Value::from(self.end.format(DATE_FORMAT).to_string()),
            Value::from(self.require_gps),
            Value::Text(self.album_id.to_column()?),
        ]))
    }

    pub fn insert_values(&self) -> Result<Vec<Value>> {
        Ok(self.to_row()?.into_values().into_iter().skip(1).collect())
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        if row.len() != TRIPS_CONFIG.columns.len() {
            return Err(StoreError::Decode(format!(
                "trips_config row has {} columns, expected {}",
                row.len(),
                TRIPS_CONFIG.columns.len()
            )));
        }
        Ok(Self {
            sl_no: row.int(0)?,
            name: row.required_text(1)?,
            start: parse_date(row.text(2)?.as_deref(), "start")?,
            end: parse_date(row.text(3)?.as_deref(), "end")?,
            require_gps: row.boolean(4)?.unwrap_or(false),
            album_id: AlbumOwners::from_column(row.text(5)?.as_deref())?,
        })
    }
}

fn parse_date(raw: Option<&str>, column: &str) -> Result<NaiveDate> {
    let raw = raw.ok_or_else(|| StoreError::Decode(format!("trip {} date is NULL", column)))?;
    // Postgres DATE columns may come back with a time part
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, DATE_FORMAT)
        .map_err(|e| StoreError::Decode(format!("trip {} date '{}': {}", column, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_media_record_row_layout() {
        let mut record = MediaRecord::new("abc123", "IMG_1.JPG");
        record.file_size_bytes = Some(2048);
        record.account_email = Some("me@example.com".into());

        let row = record.to_row();
        assert_eq!(row.len(), MEDIA_LIBRARY.columns.len());
        assert!(row.get(0).unwrap().is_null());
        assert_eq!(record.insert_values().len(), MEDIA_LIBRARY.data_columns().len());

        let mut stored = row.clone();
        stored.0[0] = Value::from(5i64);
        let back = MediaRecord::from_row(&stored).unwrap();
        assert_eq!(back.sl_no, Some(5));
        assert_eq!(back.filename, "IMG_1.JPG");
        assert_eq!(back.file_size_bytes, Some(2048));
    }

    #[test]
    fn test_media_record_requires_hash() {
        let mut row = MediaRecord::new("h", "f").to_row();
        row.0[1] = Value::Text(None);
        assert!(matches!(MediaRecord::from_row(&row), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_album_owners_json_and_legacy() {
        let owners = AlbumOwners::from_column(Some(r#"{"a@x.com": "ALB1", "b@x.com": "ALB2"}"#)).unwrap();
        assert_eq!(owners.get("b@x.com"), Some("ALB2"));
        assert_eq!(owners.legacy(), None);

        let legacy = AlbumOwners::from_column(Some("OLDALBUM")).unwrap();
        assert_eq!(legacy.legacy(), Some("OLDALBUM"));

        assert!(AlbumOwners::from_column(None).unwrap().is_empty());
        assert!(AlbumOwners::from_column(Some("  ")).unwrap().is_empty());
        assert!(AlbumOwners::from_column(Some("{broken}")).is_err());
    }

    #[test]
    fn test_album_owners_column_encoding() {
        assert_eq!(AlbumOwners::new().to_column().unwrap(), None);
        let owners = AlbumOwners::new().with("a@x.com", "ALB1");
        assert_eq!(owners.to_column().unwrap().as_deref(), Some(r#"{"a@x.com":"ALB1"}"#));
    }

    #[test]
    fn test_trip_row_roundtrip_and_validation() {
        let mut trip = TripConfig::new("Goa 2024", date("2024-12-20"), date("2024-12-27"));
        trip.require_gps = true;
        trip.album_id.set("a@x.com", "ALB1");
        assert!(trip.validate().is_ok());
        assert!(trip.contains(date("2024-12-24")));
        assert!(!trip.contains(date("2025-01-01")));

        let back = TripConfig::from_row(&trip.to_row().unwrap()).unwrap();
        assert_eq!(back, trip);

        let inverted = TripConfig::new("Backwards", date("2024-05-02"), date("2024-05-01"));
        assert!(matches!(inverted.validate(), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_trip_date_with_time_part() {
        assert_eq!(parse_date(Some("2024-12-20 00:00:00"), "start").unwrap(), date("2024-12-20"));
        assert!(parse_date(None, "end").is_err());
        assert!(parse_date(Some("20/12/2024"), "start").is_err());
    }
}
