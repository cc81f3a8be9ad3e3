// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL dialect differences between the supported backends.
//!
//! Statements are authored once with `?` placeholders and ANSI double-quoted
//! identifiers. [`Dialect::render`] rewrites them for the target:
//!
//! | Dialect  | Placeholder | Identifier quote | RETURNING |
//! |----------|-------------|------------------|-----------|
//! | Postgres | `$1`, `$2`  | `"end"`          | yes       |
//! | MySQL    | `?`         | `` `end` ``      | no        |
//! | SQLite   | `?`         | `"end"`          | yes       |

use std::borrow::Cow;

use super::Statement;
use crate::schema::{ColumnKind, TableSpec, SEQUENCE_COLUMN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::MySql),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            Self::Postgres => Some(5432),
            Self::MySql => Some(3306),
            Self::Sqlite => None,
        }
    }

    /// Whether `INSERT ... RETURNING` is available.
    pub fn supports_returning(self) -> bool {
        !matches!(self, Self::MySql)
    }

    /// Rewrite a neutral statement into this dialect.
    ///
    /// Text inside single-quoted literals is never touched.
    pub fn render<'a>(self, sql: &'a str) -> Cow<'a, str> {
        if self == Self::Sqlite || (!sql.contains('?') && !sql.contains('"')) {
            return Cow::Borrowed(sql);
        }

        let mut out = String::with_capacity(sql.len() + 8);
        let mut in_literal = false;
        let mut in_ident = false;
        let mut param = 0usize;

        for ch in sql.chars() {
            match ch {
                // '' inside a literal toggles twice, which leaves the state unchanged
                '\'' if !in_ident => {
                    in_literal = !in_literal;
                    out.push(ch);
                }
                '"' if !in_literal => {
                    in_ident = !in_ident;
                    out.push(if self == Self::MySql { '`' } else { '"' });
                }
                '?' if !in_literal && !in_ident && self == Self::Postgres => {
                    param += 1;
                    out.push('$');
                    out.push_str(&param.to_string());
                }
                _ => out.push(ch),
            }
        }
        Cow::Owned(out)
    }

    fn column_type(self, kind: ColumnKind, constrained: bool) -> &'static str {
        match (self, kind) {
            (Self::Sqlite, ColumnKind::Integer) => "INTEGER",
            (_, ColumnKind::Integer) => "BIGINT",
            // MySQL cannot index unbounded TEXT
            (Self::MySql, ColumnKind::Text) if constrained => "VARCHAR(255)",
            (_, ColumnKind::Text) => "TEXT",
            (_, ColumnKind::Boolean) => "BOOLEAN",
        }
    }

    fn sequence_column_type(self) -> &'static str {
        match self {
            Self::Postgres => "BIGSERIAL PRIMARY KEY",
            Self::MySql => "BIGINT AUTO_INCREMENT PRIMARY KEY",
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` for a replicated table on a provider.
    pub fn create_table(self, spec: &TableSpec) -> Statement {
        let mut defs = Vec::with_capacity(spec.columns.len() + spec.unique.len());
        for column in spec.columns {
            if column.name == SEQUENCE_COLUMN {
                defs.push(format!("\"{}\" {}", column.name, self.sequence_column_type()));
                continue;
            }
            let constrained = spec.unique.contains(&column.name);
            let mut def = format!("\"{}\" {}", column.name, self.column_type(column.kind, constrained));
            if column.required {
                def.push_str(" NOT NULL");
            }
            defs.push(def);
        }
        for unique in spec.unique {
            defs.push(format!("UNIQUE (\"{}\")", unique));
        }
        Statement::new(format!("CREATE TABLE IF NOT EXISTS \"{}\" ({})", spec.name, defs.join(", ")))
    }

    /// Statements that move the auto-increment counter of `table` so the next
    /// generated `sl_no` is `max_sl_no + 1`.
    pub fn counter_resync(self, table: &str, max_sl_no: i64) -> Vec<Statement> {
        let next = max_sl_no.max(0) + 1;
        match self {
            Self::Postgres => vec![Statement::new(
                "SELECT setval(CAST(COALESCE(pg_get_serial_sequence(?, 'sl_no'), ?) AS regclass), ?, false)",
            )
            .bind(table)
            .bind(format!("{}_sl_no_seq", table))
            .bind(next)],
            // AUTO_INCREMENT does not accept a bind parameter
            Self::MySql => vec![Statement::new(format!("ALTER TABLE \"{}\" AUTO_INCREMENT = {}", table, next))],
            Self::Sqlite => vec![
                Statement::new("DELETE FROM sqlite_sequence WHERE name = ?").bind(table),
                Statement::new("INSERT INTO sqlite_sequence (name, seq) VALUES (?, ?)")
                    .bind(table)
                    .bind(next - 1),
            ],
        }
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::MySql => write!(f, "mysql"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{MEDIA_LIBRARY, TRIPS_CONFIG};

    #[test]
    fn test_postgres_placeholders_numbered() {
        let sql = "SELECT \"end\" FROM trips_config WHERE name = ? AND sl_no > ?";
        assert_eq!(
            Dialect::Postgres.render(sql),
            "SELECT \"end\" FROM trips_config WHERE name = $1 AND sl_no > $2"
        );
    }

    #[test]
    fn test_literals_are_untouched() {
        let sql = "SELECT 'why?' , \"x\" FROM t WHERE a = ? AND b = 'it''s ?'";
        assert_eq!(
            Dialect::Postgres.render(sql),
            "SELECT 'why?' , \"x\" FROM t WHERE a = $1 AND b = 'it''s ?'"
        );
        assert_eq!(
            Dialect::MySql.render(sql),
            "SELECT 'why?' , `x` FROM t WHERE a = ? AND b = 'it''s ?'"
        );
    }

    #[test]
    fn test_sqlite_render_is_identity() {
        let sql = "SELECT \"end\" FROM t WHERE a = ?";
        assert!(matches!(Dialect::Sqlite.render(sql), Cow::Borrowed(_)));
    }

    #[test]
    fn test_create_table_per_dialect() {
        let pg = Dialect::Postgres.create_table(&TRIPS_CONFIG).sql;
        assert!(pg.contains("\"sl_no\" BIGSERIAL PRIMARY KEY"));
        assert!(pg.contains("\"name\" TEXT NOT NULL"));
        assert!(pg.contains("UNIQUE (\"name\")"));

        let my = Dialect::MySql.create_table(&TRIPS_CONFIG).sql;
        assert!(my.contains("\"name\" VARCHAR(255) NOT NULL"));
        assert!(my.contains("AUTO_INCREMENT"));

        let lite = Dialect::Sqlite.create_table(&MEDIA_LIBRARY).sql;
        assert!(lite.contains("INTEGER PRIMARY KEY AUTOINCREMENT"));
        assert!(lite.contains("\"file_size_bytes\" INTEGER"));
    }

    #[test]
    fn test_counter_resync_statements() {
        let pg = Dialect::Postgres.counter_resync("media_library", 10);
        assert_eq!(pg.len(), 1);
        assert_eq!(pg[0].params.last(), Some(&crate::schema::Value::from(11i64)));

        let my = Dialect::MySql.counter_resync("media_library", 10);
        assert!(my[0].sql.ends_with("AUTO_INCREMENT = 11"));

        let lite = Dialect::Sqlite.counter_resync("trips_config", 0);
        assert_eq!(lite.len(), 2);
        assert_eq!(lite[1].params[1], crate::schema::Value::from(0i64));
    }

    #[test]
    fn test_returning_support() {
        assert!(Dialect::Postgres.supports_returning());
        assert!(Dialect::Sqlite.supports_returning());
        assert!(!Dialect::MySql.supports_returning());
    }
}
