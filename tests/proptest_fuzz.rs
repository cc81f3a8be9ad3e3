// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests (fuzzing) for statement rendering, URI parsing and
//! record decoding.
//!
//! Uses proptest to generate random/malformed inputs and verify the store
//! never panics, only returns clean errors.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;

use mirror_store::{name_variants, AlbumOwners, ConnectionUri, Dialect};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Neutral SQL made of identifiers, placeholders and literals
fn neutral_sql_strategy() -> impl Strategy<Value = (String, usize)> {
    let token = prop_oneof![
        "[a-z_]{1,8}".prop_map(|s| (s, 0usize)),
        "[a-z_]{1,8}".prop_map(|s| (format!("\"{}\"", s), 0)),
        Just(("?".to_string(), 1)),
        "[a-z ?]{0,6}".prop_map(|s| (format!("'{}'", s), 0)),
        Just((" = ".to_string(), 0)),
        Just((", ".to_string(), 0)),
    ];
    prop::collection::vec(token, 0..30).prop_map(|tokens| {
        let params = tokens.iter().map(|(_, n)| n).sum();
        let sql = tokens.into_iter().map(|(t, _)| t).collect::<Vec<_>>().join(" ");
        (sql, params)
    })
}

fn uri_strategy() -> impl Strategy<Value = String> {
    (
        prop_oneof![Just("postgres"), Just("postgresql"), Just("mysql")],
        "[a-z]{1,8}",
        "[a-zA-Z0-9]{1,12}",
        "[a-z]{1,10}(\\.[a-z]{2,5}){0,2}",
        prop::option::of(1024u16..65535),
        "[a-z_]{1,10}",
    )
        .prop_map(|(scheme, user, pass, host, port, db)| match port {
            Some(port) => format!("{}://{}:{}@{}:{}/{}", scheme, user, pass, host, port, db),
            None => format!("{}://{}:{}@{}/{}", scheme, user, pass, host, db),
        })
}

// =============================================================================
// Statement rendering
// =============================================================================

proptest! {
    /// Postgres numbers exactly the placeholders outside literals and identifiers
    #[test]
    fn prop_postgres_numbers_every_placeholder((sql, params) in neutral_sql_strategy()) {
        let rendered = Dialect::Postgres.render(&sql);
        for i in 1..=params {
            let needle = format!("${}", i);
            prop_assert!(rendered.contains(&needle), "missing {} in {}", needle, rendered);
        }
        let extra = format!("${}", params + 1);
        prop_assert!(!rendered.contains(&extra));
    }

    /// SQLite takes the neutral form verbatim
    #[test]
    fn prop_sqlite_render_is_identity((sql, _) in neutral_sql_strategy()) {
        let rendered = Dialect::Sqlite.render(&sql);
        prop_assert_eq!(rendered.as_ref(), sql.as_str());
    }

    /// MySQL swaps identifier quotes only; placeholders stay positional
    #[test]
    fn prop_mysql_keeps_placeholders((sql, _) in neutral_sql_strategy()) {
        let rendered = Dialect::MySql.render(&sql);
        prop_assert_eq!(rendered.matches('?').count(), sql.matches('?').count());
        prop_assert_eq!(rendered.len(), sql.len());
    }

    /// Rendering arbitrary text never panics
    #[test]
    fn fuzz_render_arbitrary_text(sql in ".*") {
        let _ = Dialect::Postgres.render(&sql);
        let _ = Dialect::MySql.render(&sql);
    }
}

// =============================================================================
// URI parsing
// =============================================================================

proptest! {
    /// Well-formed URIs parse into their parts and never leak the password
    #[test]
    fn prop_uri_fields_and_redaction(raw in uri_strategy()) {
        let uri = ConnectionUri::parse(&raw).unwrap();
        prop_assert!(uri.host.is_some());
        prop_assert!(uri.port.is_some());
        prop_assert!(!uri.database.is_empty());

        let password = uri.password.clone().unwrap();
        let shown = uri.redacted();
        prop_assert!(shown.contains("****"));
        let needle = format!(":{}@", password);
        prop_assert!(!shown.contains(&needle));
        let debug = format!("{:?}", uri);
        prop_assert!(!debug.contains("password"));
    }

    /// Garbage input yields an error, not a panic
    #[test]
    fn fuzz_uri_parse_never_panics(raw in ".*") {
        let _ = ConnectionUri::parse(&raw);
    }
}

// =============================================================================
// Record helpers
// =============================================================================

proptest! {
    /// Every variant keeps the stem as given and matches the name itself
    #[test]
    fn prop_name_variants_keep_stem(stem in "[A-Za-zÀ-ÖØ-Þ0-9_]{1,12}", ext in "(jpg|JPEG|png|Tif|tiff|heic)") {
        let name = format!("{}.{}", stem, ext);
        let variants = name_variants(&name);
        prop_assert!(variants.iter().any(|v| v.eq_ignore_ascii_case(&name)));
        let prefix = format!("{}.", stem);
        for v in &variants {
            prop_assert!(v.starts_with(&prefix));
        }
    }

    /// The album column decoder never panics on arbitrary text
    #[test]
    fn fuzz_album_owners_from_column(raw in ".*") {
        let _ = AlbumOwners::from_column(Some(&raw));
    }

    /// Encoding then decoding an owner map is lossless
    #[test]
    fn prop_album_owners_column(owners in prop::collection::btree_map("[a-z@.]{1,12}", "[A-Za-z0-9_-]{1,16}", 1..5)) {
        let mut map = AlbumOwners::new();
        for (owner, album) in &owners {
            map.set(owner.clone(), album.clone());
        }
        let column = map.to_column().unwrap();
        prop_assert_eq!(AlbumOwners::from_column(column.as_deref()).unwrap(), map);
    }
}
