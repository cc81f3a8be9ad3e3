// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicated table layout and typed column values.
//!
//! Every replicated table carries the provider-local `sl_no` sequence column
//! first, followed by its business columns. The same column list is
//! projected into the local cache, so a [`Row`] read from either provider can
//! be written verbatim into the other provider or into the cache.
//!
//! ```text
//! media_library  (sl_no, file_hash, filename, file_size_bytes, upload_date,
//!                 account_email, device_source, remote_id, album_name, thumbid)
//! trips_config   (sl_no, name, start, end, require_gps, album_id)
//! ```

use crate::error::StoreError;

/// Name of the sequence column every replicated table carries.
pub const SEQUENCE_COLUMN: &str = "sl_no";

/// Storage class of a column.
///
/// Only the three classes every backend agrees on are used; richer types
/// (dates, JSON) are stored as text and parsed at the record layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Text,
    Boolean,
}

/// A column of a replicated table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    /// NOT NULL on the providers
    pub required: bool,
}

impl Column {
    pub const fn int(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Integer, required: false }
    }

    pub const fn text(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Text, required: false }
    }

    pub const fn boolean(name: &'static str) -> Self {
        Self { name, kind: ColumnKind::Boolean, required: false }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// A relation mirrored on both providers and projected into the cache.
#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    /// All replicated columns; `sl_no` is always first.
    pub columns: &'static [Column],
    /// Primary key of the cache projection (replace-by-key target).
    pub cache_key: &'static str,
    /// Business key identifying a row across providers.
    pub natural_key: &'static str,
    /// Columns with a UNIQUE constraint on the providers.
    pub unique: &'static [&'static str],
    /// Secondary indexes on the cache: (index name, column).
    pub cache_indexes: &'static [(&'static str, &'static str)],
}

impl TableSpec {
    /// Column names in declaration order.
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// Columns other than the sequence column (what a fresh insert supplies).
    pub fn data_columns(&self) -> &'static [Column] {
        &self.columns[1..]
    }

    /// Comma-separated, double-quoted column list.
    pub fn column_list(&self) -> String {
        quoted_list(self.columns)
    }

    pub fn position(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == column)
    }
}

pub(crate) fn quoted_list(columns: &[Column]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{}\"", c.name))
        .collect::<Vec<_>>()
        .join(", ")
}

pub static MEDIA_LIBRARY: TableSpec = TableSpec {
    name: "media_library",
    columns: &[
        Column::int("sl_no"),
        Column::text("file_hash").required(),
        Column::text("filename").required(),
        Column::int("file_size_bytes"),
        Column::text("upload_date"),
        Column::text("account_email"),
        Column::text("device_source"),
        Column::text("remote_id"),
        Column::text("album_name"),
        Column::text("thumbid"),
    ],
    cache_key: "sl_no",
    natural_key: "file_hash",
    unique: &[],
    cache_indexes: &[("idx_filename", "filename"), ("idx_hash", "file_hash")],
};

pub static TRIPS_CONFIG: TableSpec = TableSpec {
    name: "trips_config",
    columns: &[
        Column::int("sl_no"),
        Column::text("name").required(),
        Column::text("start"),
        Column::text("end"),
        Column::boolean("require_gps"),
        Column::text("album_id"),
    ],
    cache_key: "name",
    natural_key: "name",
    unique: &["name"],
    cache_indexes: &[],
};

/// Tables covered by reconciliation and cache sync, in processing order.
pub static REPLICATED_TABLES: [&TableSpec; 2] = [&MEDIA_LIBRARY, &TRIPS_CONFIG];

/// A typed, nullable column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(Option<i64>),
    Text(Option<String>),
    Bool(Option<bool>),
}

impl Value {
    /// Typed NULL for a column kind.
    pub fn null(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Integer => Value::Int(None),
            ColumnKind::Text => Value::Text(None),
            ColumnKind::Boolean => Value::Bool(None),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Int(None) | Value::Text(None) | Value::Bool(None))
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => *v,
            Value::Bool(v) => v.map(i64::from),
            Value::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => v.as_deref(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => *v,
            Value::Int(v) => v.map(|i| i != 0),
            Value::Text(_) => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(Some(v))
    }
}

impl From<Option<i64>> for Value {
    fn from(v: Option<i64>) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(Some(v))
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(Some(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(Some(v))
    }
}

impl From<Option<String>> for Value {
    fn from(v: Option<String>) -> Self {
        Value::Text(v)
    }
}

/// One result row, values aligned with the statement's result shape.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row(pub Vec<Value>);

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn get(&self, idx: usize) -> Result<&Value, StoreError> {
        self.0
            .get(idx)
            .ok_or_else(|| StoreError::Decode(format!("column index {} out of range ({} columns)", idx, self.0.len())))
    }

    pub fn int(&self, idx: usize) -> Result<Option<i64>, StoreError> {
        match self.get(idx)? {
            Value::Int(v) => Ok(*v),
            other => Err(StoreError::Decode(format!("column {} is not an integer: {:?}", idx, other))),
        }
    }

    pub fn text(&self, idx: usize) -> Result<Option<String>, StoreError> {
        match self.get(idx)? {
            Value::Text(v) => Ok(v.clone()),
            other => Err(StoreError::Decode(format!("column {} is not text: {:?}", idx, other))),
        }
    }

    pub fn required_text(&self, idx: usize) -> Result<String, StoreError> {
        self.text(idx)?
            .ok_or_else(|| StoreError::Decode(format!("column {} is unexpectedly NULL", idx)))
    }

    pub fn boolean(&self, idx: usize) -> Result<Option<bool>, StoreError> {
        self.get(idx).map(Value::as_bool)
    }
}
