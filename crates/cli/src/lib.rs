//! Headless driver for the lightbox image pipeline.
//!
//! Scans a directory of images, replays navigation against the engine and
//! reports cache statistics as JSON. Useful for profiling cache behavior
//! and for exercising the pipeline end to end without a UI.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lightbox_cache::{
    LogSuppressor, MemoryBudgetPool, PipelineConfig, RemoteFileCache, StdFileSystem,
};
use lightbox_core::{CacheStatsReport, ImageEngine};
use lightbox_decode::RequestPriority;
use serde_json::json;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp",
];

#[derive(Debug, Parser)]
#[command(name = "lightbox-cli")]
#[command(about = "Lightbox image pipeline driver")]
pub struct Cli {
    /// Pipeline configuration file (TOML); environment variables otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Decode every image in a directory through the pipeline.
    Warm {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Target dimensions, e.g. 1200x800
        #[arg(long)]
        target: Option<String>,
    },
    /// Replay a navigation script against a directory.
    Browse {
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Script of comma-separated moves: "8n" = 8 next, "2p" = 2 prev
        #[arg(long, default_value = "8n,2p,4n")]
        script: String,

        /// Target dimensions, e.g. 1200x800
        #[arg(long)]
        target: Option<String>,
    },
    /// Remove every cached remote file and reset the cache index.
    Clear,
}

/// CLI entry point.
pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let _ = env_logger::Builder::from_default_env().try_init();
    let cli = Cli::parse_from(args);

    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::from_env().context("reading LIGHTBOX_* environment")?,
    };

    match cli.command {
        Commands::Warm { dir, target } => warm(config, &dir, target.as_deref()),
        Commands::Browse {
            dir,
            script,
            target,
        } => browse(config, &dir, &script, target.as_deref()),
        Commands::Clear => clear(config),
    }
}

fn warm(config: PipelineConfig, dir: &Path, target: Option<&str>) -> Result<()> {
    let keys = scan_images(dir)?;
    if keys.is_empty() {
        bail!("no images found in {}", dir.display());
    }
    let target = target.map(parse_target).transpose()?;
    log::info!("warming {} images from {}", keys.len(), dir.display());

    let mut engine = ImageEngine::new(config);
    engine.set_sequence(keys.clone());

    let mut decoded = 0usize;
    for key in &keys {
        let start = Instant::now();
        match engine
            .request_image(key, target, RequestPriority::Current)
            .wait()
        {
            Some(image) => {
                decoded += 1;
                println!(
                    "{key}: {}x{} in {}ms",
                    image.width,
                    image.height,
                    start.elapsed().as_millis()
                );
            }
            None => println!("{key}: decode failed"),
        }
    }

    println!("{}", report_json(&engine.get_cache_stats(), decoded));
    engine.shutdown();
    Ok(())
}

fn browse(config: PipelineConfig, dir: &Path, script: &str, target: Option<&str>) -> Result<()> {
    let keys = scan_images(dir)?;
    if keys.is_empty() {
        bail!("no images found in {}", dir.display());
    }
    let target = target.map(parse_target).transpose()?;
    let moves = parse_script(script)?;
    log::info!(
        "browsing {} images from {} with script {script:?}",
        keys.len(),
        dir.display()
    );

    let mut engine = ImageEngine::new(config);
    engine.set_sequence(keys.clone());

    for (count, step) in moves {
        for _ in 0..count {
            engine.navigate(step);
        }
        // Let the debounce fire and the window settle between bursts
        std::thread::sleep(Duration::from_millis(150));

        let index = engine.current_index();
        if let Some(key) = keys.get(index) {
            let _ = engine.request_image(key, target, RequestPriority::Current).wait();
        }
        if let Some(direction) = engine.take_sequence_advance() {
            println!("(sequence boundary: advance {direction})");
        }
    }

    // Drain outstanding prefetch work before reporting
    std::thread::sleep(Duration::from_millis(300));
    println!("{}", report_json(&engine.get_cache_stats(), 0));
    engine.shutdown();
    Ok(())
}

fn clear(config: PipelineConfig) -> Result<()> {
    let pool = Arc::new(MemoryBudgetPool::new(config.pool_budget));
    let cache = RemoteFileCache::new(
        &config,
        Arc::new(StdFileSystem),
        pool,
        Arc::new(LogSuppressor::new(config.suppress_after)),
    );
    let before = cache.total_cached_files();
    cache.clear_all_cache();
    println!("cleared {before} cached remote files");
    Ok(())
}

/// List image files in a directory, sorted by name.
fn scan_images(dir: &Path) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("reading directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            keys.push(path.to_string_lossy().into_owned());
        }
    }
    keys.sort();
    Ok(keys)
}

/// Parse "1200x800" into dimensions.
fn parse_target(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s
        .split_once('x')
        .with_context(|| format!("target must be WIDTHxHEIGHT, got {s:?}"))?;
    Ok((
        w.parse().with_context(|| format!("bad width in {s:?}"))?,
        h.parse().with_context(|| format!("bad height in {s:?}"))?,
    ))
}

/// Parse a navigation script like "8n,2p" into (count, step) moves.
fn parse_script(script: &str) -> Result<Vec<(u32, i64)>> {
    let mut moves = Vec::new();
    for part in script.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (count, dir) = part.split_at(part.len() - 1);
        let count: u32 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .with_context(|| format!("bad move count in {part:?}"))?
        };
        let step = match dir {
            "n" => 1,
            "p" => -1,
            _ => bail!("bad move {part:?}: expected <count>n or <count>p"),
        };
        moves.push((count, step));
    }
    Ok(moves)
}

fn report_json(stats: &CacheStatsReport, decoded: usize) -> serde_json::Value {
    json!({
        "decoded": decoded,
        "hit_rate": stats.hit_rate,
        "occupancy_bytes": stats.occupancy_bytes,
        "eviction_count": stats.eviction_count,
        "hot": {
            "entries": stats.hot.entry_count,
            "bytes_used": stats.hot.bytes_used,
            "hits": stats.hot.hits,
            "misses": stats.hot.misses,
            "evictions": stats.hot.evictions,
        },
        "remote": {
            "files": stats.remote.total_cached_files,
            "bytes": stats.remote.total_cache_size,
            "hits": stats.remote.hits,
            "misses": stats.remote.misses,
            "evictions": stats.remote.evictions,
        },
        "pool": {
            "allocated_bytes": stats.pool.allocated_bytes,
            "reuse_rate": stats.pool.reuse_rate(),
            "denied": stats.pool.denied,
        },
        "preload": {
            "scheduled": stats.preload.scheduled,
            "attached": stats.preload.attached,
            "stale_discards": stats.preload.stale_discards,
            "cancelled": stats.preload.cancelled,
        },
        "suppressed_logs": stats.suppressed_logs,
    })
}
