// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Basic mirror-store usage example.
//!
//! Demonstrates:
//! 1. Opening a store over two providers (SQLite files, so no servers needed)
//! 2. Mirrored inserts and cache-backed existence checks
//! 3. Trips and per-account album ids
//! 4. Reconciliation report
//! 5. Snapshotting the local cache
//! 6. Displaying metrics
//! 7. Clean shutdown
//!
//! # Run
//!
//! ```bash
//! cargo run --example basic_usage
//! ```
//!
//! Point `PROVIDER_A_URL` / `PROVIDER_B_URL` at real Postgres or MySQL
//! databases to run the same flow against them.

use chrono::NaiveDate;
use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use mirror_store::{AlbumOwners, MediaRecord, MirrorStore, StoreConfig, TripConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           mirror-store: Basic Usage Example                   ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Configure and open the store
    // ─────────────────────────────────────────────────────────────────────────
    let workdir = tempfile::tempdir()?;
    let sqlite = |name: &str| format!("sqlite://{}?mode=rwc", workdir.path().join(name).display());

    let config = StoreConfig {
        provider_a_url: std::env::var("PROVIDER_A_URL").ok().or_else(|| Some(sqlite("provider_a.db"))),
        provider_b_url: std::env::var("PROVIDER_B_URL").ok().or_else(|| Some(sqlite("provider_b.db"))),
        cache_path: Some(workdir.path().join("Data").join("local_cache.db").display().to_string()),
        create_schema: true,
        exit_on_total_failure: false,
        ..Default::default()
    };

    println!("🚀 Opening store (connect, create tables, reconcile)...");
    let store = MirrorStore::open(config).await?;
    println!("   ✅ Ready! Health: {}", store.health());

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Mirrored inserts and lookups
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📝 Inserting 5 media records...");
    for i in 1..=5 {
        let record = MediaRecord {
            file_size_bytes: Some(1_000 * i),
            account_email: Some("me@example.com".into()),
            device_source: Some("Pixel 8".into()),
            ..MediaRecord::new(format!("sha256-{:04}", i), format!("IMG_{:04}.JPG", i))
        };
        let start = std::time::Instant::now();
        let saved = store.insert(&record).await?;
        println!("   └─ {} → sl_no {:?} ({:?})", saved.filename, saved.sl_no, start.elapsed());
    }

    println!("\n🔍 Checking existence (served by the local cache)...");
    for name in ["img_0003.jpeg", "IMG_0003.JPG", "IMG_0099.JPG"] {
        println!("   └─ exists_by_name('{}'): {}", name, store.exists_by_name(name).await?);
    }
    if let Some(found) = store.get_by_hash("sha256-0002").await? {
        println!("   └─ get_by_hash('sha256-0002'): {} ({:?} bytes)", found.filename, found.file_size_bytes);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Trips
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🧳 Creating a trip...");
    let start = NaiveDate::from_ymd_opt(2025, 4, 1).ok_or("bad date")?;
    let end = NaiveDate::from_ymd_opt(2025, 4, 10).ok_or("bad date")?;
    if !store.trip_exists("Kyoto 2025").await? {
        store.insert_trip(&TripConfig::new("Kyoto 2025", start, end)).await?;
    }
    let owners = AlbumOwners::new().with("me@example.com", "album-kyoto-001");
    store.update_trip_album_id("Kyoto 2025", &owners).await?;
    for trip in store.get_trips().await? {
        println!("   └─ {} {}..{} albums={:?}", trip.name, trip.start, trip.end, trip.album_id);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Reconciliation
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔄 Reconciling providers...");
    let report = store.reconcile().await?;
    for (table, outcome) in &report.tables {
        println!("   └─ {}: {:?}", table, outcome);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Snapshot
    // ─────────────────────────────────────────────────────────────────────────
    let snapshot = workdir.path().join("backups").join("cache_snapshot.db");
    if store.snapshot_local_cache(&snapshot).await? {
        println!("\n💾 Cache snapshot written to {}", snapshot.display());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 6. Metrics
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n📍 Provider Status:");
    for status in store.provider_status() {
        println!("   └─ {} ({}): active={}", status.label, status.id, status.active);
    }

    println!("\n📈 Raw Metrics:");
    dump_metrics(&snapshotter);

    // ─────────────────────────────────────────────────────────────────────────
    // 7. Clean shutdown
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🛑 Shutting down...");
    store.shutdown().await;
    println!("   ✅ Shutdown complete!");

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║                    Example complete!                          ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    Ok(())
}

/// Dump all captured metrics, grouped by kind
fn dump_metrics(snapshotter: &Snapshotter) {
    let snapshot = snapshotter.snapshot();

    let mut counters: Vec<_> = vec![];
    let mut gauges: Vec<_> = vec![];
    let mut histograms: Vec<_> = vec![];

    for (composite_key, _, _, value) in snapshot.into_vec() {
        let (_, key) = composite_key.into_parts();
        let name = key.name().to_string();
        let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
        let label_str = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };

        match value {
            DebugValue::Counter(v) => counters.push((name, label_str, v)),
            DebugValue::Gauge(v) => gauges.push((name, label_str, v.into_inner())),
            DebugValue::Histogram(samples) => {
                let count = samples.len();
                let sum: f64 = samples.iter().map(|v| v.into_inner()).sum();
                histograms.push((name, label_str, count, sum));
            }
        }
    }

    counters.sort_by(|a, b| a.0.cmp(&b.0));
    gauges.sort_by(|a, b| a.0.cmp(&b.0));
    histograms.sort_by(|a, b| a.0.cmp(&b.0));

    if !counters.is_empty() {
        println!("   ┌─ Counters (cumulative)");
        for (name, labels, value) in &counters {
            println!("   │  └─ {}{} = {}", name, labels, value);
        }
    }
    if !gauges.is_empty() {
        println!("   ├─ Gauges (current value)");
        for (name, labels, value) in &gauges {
            println!("   │  └─ {}{} = {:.2}", name, labels, value);
        }
    }
    if !histograms.is_empty() {
        println!("   └─ Histograms (distributions)");
        for (name, labels, count, sum) in &histograms {
            let avg = if *count > 0 { sum / *count as f64 } else { 0.0 };
            println!("   │  └─ {}{} count={} avg={:.4}", name, labels, count, avg);
        }
    }
    if counters.is_empty() && gauges.is_empty() && histograms.is_empty() {
        println!("   └─ (no metrics recorded)");
    }
}
