// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared harness: two SQLite-file providers behind fault-injecting wrappers.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use mirror_store::provider::sql::PoolSettings;
use mirror_store::{
    Column, Dialect, Fetch, MediaRecord, MirrorStore, Provider, ProviderError, ProviderErrorKind, ProviderId,
    QueryOutput, RecordingNotifier, SqlProvider, Statement, StoreConfig, TableSpec, MEDIA_LIBRARY,
    REPLICATED_TABLES,
};

/// Wraps a real provider and injects failures on demand.
pub struct FaultyProvider {
    inner: SqlProvider,
    /// Fail this many upcoming executes with `Transient`
    transient_failures: AtomicUsize,
    /// Fail this many upcoming executes with `Rejected`
    rejections: AtomicUsize,
    /// Unreachable: every execute and connect fails
    down: AtomicBool,
    /// Report no RETURNING support, like MySQL
    no_returning: AtomicBool,
    pub executes: AtomicUsize,
}

impl FaultyProvider {
    pub fn new(inner: SqlProvider) -> Arc<Self> {
        Arc::new(Self {
            inner,
            transient_failures: AtomicUsize::new(0),
            rejections: AtomicUsize::new(0),
            down: AtomicBool::new(false),
            no_returning: AtomicBool::new(false),
            executes: AtomicUsize::new(0),
        })
    }

    pub fn fail_transient(&self, times: usize) {
        self.transient_failures.store(times, Ordering::SeqCst);
    }

    pub fn reject_next(&self, times: usize) {
        self.rejections.store(times, Ordering::SeqCst);
    }

    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }

    pub fn without_returning(&self) {
        self.no_returning.store(true, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &SqlProvider {
        &self.inner
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Provider for FaultyProvider {
    fn id(&self) -> ProviderId {
        self.inner.id()
    }

    fn dialect(&self) -> Dialect {
        self.inner.dialect()
    }

    fn label(&self) -> String {
        self.inner.label()
    }

    fn supports_returning(&self) -> bool {
        !self.no_returning.load(Ordering::SeqCst) && self.inner.supports_returning()
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ProviderError::new(self.id(), ProviderErrorKind::Unavailable, "connection refused"));
        }
        self.inner.connect().await
    }

    async fn close(&self) {
        self.inner.close().await;
    }

    async fn execute(&self, statement: &Statement, fetch: Fetch) -> Result<QueryOutput, ProviderError> {
        self.executes.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ProviderError::new(self.id(), ProviderErrorKind::Unavailable, "host unreachable"));
        }
        if Self::take(&self.transient_failures) {
            return Err(ProviderError::new(self.id(), ProviderErrorKind::Transient, "connection reset by peer"));
        }
        if Self::take(&self.rejections) {
            return Err(ProviderError::new(self.id(), ProviderErrorKind::Rejected, "constraint violation"));
        }
        self.inner.execute(statement, fetch).await
    }
}

/// Two provider files, a cache path and a recording notifier in one temp dir.
pub struct Harness {
    pub dir: TempDir,
    pub a: Arc<FaultyProvider>,
    pub b: Arc<FaultyProvider>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let a = FaultyProvider::new(sqlite_provider(&dir, ProviderId::A, "provider_a.db"));
        let b = FaultyProvider::new(sqlite_provider(&dir, ProviderId::B, "provider_b.db"));
        Self {
            dir,
            a,
            b,
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    pub fn cache_path(&self) -> PathBuf {
        self.dir.path().join("Data").join("local_cache.db")
    }

    pub fn config(&self, with_cache: bool) -> StoreConfig {
        StoreConfig {
            cache_path: with_cache.then(|| self.cache_path().display().to_string()),
            create_schema: true,
            exit_on_total_failure: false,
            alert_timeout_ms: 500,
            ..Default::default()
        }
    }

    pub async fn open(&self, with_cache: bool) -> MirrorStore {
        self.open_with_config(self.config(with_cache)).await
    }

    pub async fn open_with_config(&self, config: StoreConfig) -> MirrorStore {
        MirrorStore::open_with(
            config,
            Some(self.a.clone() as Arc<dyn Provider>),
            Some(self.b.clone() as Arc<dyn Provider>),
            self.notifier.clone(),
        )
        .await
        .expect("store should open")
    }

    /// Create the tables on one provider and fill `media_library` with
    /// records 1..=n, outside the store.
    pub async fn seed(&self, provider: &FaultyProvider, n: i64) {
        let inner = provider.inner();
        inner.connect().await.unwrap();
        for spec in REPLICATED_TABLES {
            inner.execute(&Dialect::Sqlite.create_table(spec), Fetch::None).await.unwrap();
        }
        for i in 1..=n {
            let stmt = Statement::new(
                "INSERT INTO \"media_library\" (\"file_hash\", \"filename\", \"file_size_bytes\") VALUES (?, ?, ?)",
            )
            .bind(format!("hash-{:03}", i))
            .bind(format!("IMG_{:03}.JPG", i))
            .bind(i * 1024);
            inner.execute(&stmt, Fetch::None).await.unwrap();
        }
    }
}

fn sqlite_provider(dir: &TempDir, id: ProviderId, file: &str) -> SqlProvider {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join(file).display());
    SqlProvider::new(id, format!("Provider {}", id), &url, PoolSettings::default()).unwrap()
}

pub fn record(n: usize) -> MediaRecord {
    MediaRecord {
        file_size_bytes: Some(2048),
        account_email: Some("me@example.com".into()),
        ..MediaRecord::new(format!("sha-{:04}", n), format!("IMG_{:04}.JPG", n))
    }
}

/// `max(sl_no)` read directly from one provider's file.
pub async fn max_sl_no(provider: &FaultyProvider, spec: &TableSpec) -> i64 {
    let stmt = Statement::new(format!("SELECT MAX(\"sl_no\") FROM \"{}\"", spec.name))
        .returning(&[Column::int("max_sl_no")]);
    let out = provider.inner().execute(&stmt, Fetch::One).await.unwrap();
    out.first().and_then(|row| row.int(0).unwrap()).unwrap_or(0)
}

pub async fn count(provider: &FaultyProvider, spec: &TableSpec) -> i64 {
    let stmt = Statement::new(format!("SELECT COUNT(*) FROM \"{}\"", spec.name)).returning(&[Column::int("cnt")]);
    let out = provider.inner().execute(&stmt, Fetch::One).await.unwrap();
    out.first().and_then(|row| row.int(0).unwrap()).unwrap_or(0)
}

/// Whether a media row with this hash exists on one provider.
pub async fn has_hash(provider: &FaultyProvider, hash: &str) -> bool {
    let stmt = Statement::new("SELECT 1 FROM \"media_library\" WHERE \"file_hash\" = ?")
        .bind(hash)
        .returning(&[Column::int("one")]);
    provider.inner().execute(&stmt, Fetch::One).await.unwrap().first().is_some()
}

pub fn media() -> &'static TableSpec {
    &MEDIA_LIBRARY
}
