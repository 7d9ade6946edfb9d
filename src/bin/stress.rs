//! AtlasDB Stress Binary
//!
//! Hammers the write path from many threads and reports group commit and
//! stall statistics.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use atlasdb::{ColumnFamilyOptions, Config, Engine, ReadOptions, WriteBatch, WriteOptions};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasDB write path stress test
#[derive(Parser, Debug)]
#[command(name = "atlasdb-stress")]
#[command(about = "Concurrent write path stress test for AtlasDB")]
#[command(version)]
struct Args {
    /// Log directory; logs stay in memory when omitted
    #[arg(short, long)]
    wal_dir: Option<String>,

    /// Writer threads
    #[arg(short, long, default_value = "8")]
    threads: usize,

    /// Reader threads running alongside the writers
    #[arg(short, long, default_value = "2")]
    readers: usize,

    /// Seconds to run
    #[arg(short, long, default_value = "10")]
    duration: u64,

    /// Records per batch
    #[arg(short, long, default_value = "4")]
    batch_size: usize,

    /// Value size in bytes
    #[arg(long, default_value = "256")]
    value_size: usize,

    /// Memtable size in KB before a flush is requested
    #[arg(short = 'm', long, default_value = "1024")]
    memtable_kb: u64,

    /// Column families written round-robin (the default one included)
    #[arg(long, default_value = "2")]
    column_families: usize,

    /// Sync the log on every write
    #[arg(long)]
    sync: bool,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlasdb=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();
    tracing::info!("AtlasDB stress v{}", atlasdb::VERSION);

    let cf_options = ColumnFamilyOptions::builder()
        .write_buffer_size(args.memtable_kb * 1024)
        .max_write_buffer_number(4)
        .build();
    let mut builder = Config::builder().default_cf_options(cf_options.clone());
    if let Some(dir) = &args.wal_dir {
        builder = builder.wal_dir(dir);
    }

    let engine = match Engine::open(builder.build()) {
        Ok(e) => Arc::new(e),
        Err(e) => {
            tracing::error!("Failed to open engine: {}", e);
            std::process::exit(1);
        }
    };

    let mut families = vec![engine.default_column_family().clone()];
    for i in 1..args.column_families.max(1) {
        match engine.create_column_family(&format!("stress{i}"), cf_options.clone()) {
            Ok(handle) => families.push(handle),
            Err(e) => {
                tracing::error!("Failed to create column family: {}", e);
                std::process::exit(1);
            }
        }
    }
    let families = Arc::new(families);

    let stop = Arc::new(AtomicBool::new(false));
    let written = Arc::new(AtomicU64::new(0));
    let failed = Arc::new(AtomicU64::new(0));
    let reads = Arc::new(AtomicU64::new(0));
    let options = WriteOptions {
        sync: args.sync,
        ..WriteOptions::default()
    };

    let start = Instant::now();
    let mut handles = Vec::new();
    for t in 0..args.threads {
        let engine = Arc::clone(&engine);
        let families = Arc::clone(&families);
        let stop = Arc::clone(&stop);
        let written = Arc::clone(&written);
        let failed = Arc::clone(&failed);
        let value = vec![b'v'; args.value_size];
        let batch_size = args.batch_size.max(1);
        handles.push(thread::spawn(move || {
            let mut i = 0u64;
            while !stop.load(Ordering::Relaxed) {
                let mut batch = WriteBatch::new();
                for _ in 0..batch_size {
                    let cf = &families[(i as usize) % families.len()];
                    batch.put_cf(cf.id(), format!("t{t}-{i:012}").as_bytes(), &value);
                    i += 1;
                }
                match engine.write(&options, batch) {
                    Ok(()) => {
                        written.fetch_add(batch_size as u64, Ordering::Relaxed);
                    }
                    Err(e) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(thread = t, error = %e, "write failed");
                        if engine.background_error().is_some() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    for r in 0..args.readers {
        let engine = Arc::clone(&engine);
        let families = Arc::clone(&families);
        let stop = Arc::clone(&stop);
        let reads = Arc::clone(&reads);
        let threads = args.threads.max(1) as u64;
        handles.push(thread::spawn(move || {
            let mut n = r as u64;
            while !stop.load(Ordering::Relaxed) {
                let cf = &families[(n as usize) % families.len()];
                let key = format!("t{}-{:012}", n % threads, n);
                if let Err(e) = engine.get_cf(&ReadOptions::default(), cf, key.as_bytes()) {
                    tracing::warn!(reader = r, error = %e, "read failed");
                }
                reads.fetch_add(1, Ordering::Relaxed);
                n = n.wrapping_add(7919);
            }
        }));
    }

    thread::sleep(Duration::from_secs(args.duration));
    stop.store(true, Ordering::Relaxed);
    for handle in handles {
        let _ = handle.join();
    }
    let elapsed = start.elapsed().as_secs_f64();

    if let Err(e) = engine.wait_for_background_work() {
        tracing::error!("Background work failed: {}", e);
    }

    let stats = engine.stats();
    let records = written.load(Ordering::Relaxed);
    tracing::info!(
        records,
        failed = failed.load(Ordering::Relaxed),
        reads = reads.load(Ordering::Relaxed),
        last_sequence = engine.latest_sequence_number(),
        "run finished"
    );
    tracing::info!(
        writes_per_sec = (records as f64 / elapsed) as u64,
        groups = stats.write_groups,
        by_self = stats.writes_done_by_self,
        by_other = stats.writes_done_by_other,
        avg_group = if stats.write_groups > 0 {
            (stats.writes_done_by_self + stats.writes_done_by_other) as f64 / stats.write_groups as f64
        } else {
            0.0
        },
        "group commit"
    );
    tracing::info!(
        switches = stats.memtable_switches,
        flushes = stats.flushes_completed,
        compactions = stats.compactions_completed,
        stalls = stats.write_stalls,
        stall_ms = stats.stall_micros / 1000,
        wal_syncs = stats.wal_syncs,
        "background"
    );

    if let Err(e) = engine.close() {
        tracing::error!("Error during shutdown: {}", e);
        std::process::exit(1);
    }
}
