// Copyright (c) 2025 vecbridge Contributors
// Licensed under the MIT License. See LICENSE file for details.

//! vecbridge Command-Line Interface
//!
//! A CLI tool for inspecting, querying, and building vecbridge indexes.
//!
//! # Commands
//!
//! - `info` - Display index file information
//! - `search` - Query an index file
//! - `build` - Build a segment from a raw `f32` embeddings file
//! - `compact` - Merge all segments of a variant into one shard
//! - `selftest` - Build and query a tiny index in a temporary directory

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use vecbridge::config::{IndexConfig, IndexKind, Parameter};
use vecbridge::segment::{read_f32_file, stable_id};
use vecbridge::{build_segment, compact, persist, registry, SegmentLayout, ShardedSearch};

/// vecbridge CLI - Command-line interface for vecbridge indexes
#[derive(Parser, Debug)]
#[command(name = "vb")]
#[command(author, version, about = "vecbridge index CLI", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show index file info
    Info {
        /// Path to index file
        path: String,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search an index file
    Search {
        /// Path to index file
        path: String,
        /// Query vector as comma-separated floats
        #[arg(short, long)]
        query: String,
        /// Number of results
        #[arg(short, long, default_value = "10")]
        k: usize,
        /// IVF lists to probe
        #[arg(long)]
        nprobe: Option<usize>,
        /// HNSW search beam width
        #[arg(long)]
        ef_search: Option<usize>,
    },
    /// Build a segment from an embeddings file
    Build {
        /// Path to JSON index configuration
        #[arg(short, long)]
        config: String,
        /// Raw little-endian f32 embeddings, row-major
        #[arg(short, long)]
        embeddings: String,
        /// Source name used to derive stable ids
        #[arg(short, long)]
        source: String,
        /// Segment timestamp (defaults to now, in milliseconds)
        #[arg(long)]
        ts: Option<u64>,
    },
    /// Compact all segments into a shard
    Compact {
        /// Path to JSON index configuration
        #[arg(short, long)]
        config: String,
        /// Shard timestamp (defaults to now, in milliseconds)
        #[arg(long)]
        ts: Option<u64>,
    },
    /// Build and query a tiny index end to end
    Selftest,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Info { path, json } => cmd_info(&path, json),
        Commands::Search {
            path,
            query,
            k,
            nprobe,
            ef_search,
        } => cmd_search(&path, &query, k, nprobe, ef_search),
        Commands::Build {
            config,
            embeddings,
            source,
            ts,
        } => cmd_build(&config, &embeddings, &source, ts),
        Commands::Compact { config, ts } => cmd_compact(&config, ts),
        Commands::Selftest => cmd_selftest(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Serialize)]
struct IndexInfo {
    path: String,
    kind: IndexKind,
    format_version: u16,
    dimension: usize,
    ntotal: usize,
    trained: bool,
    nprobe: Option<usize>,
    ef_search: Option<usize>,
    ef_construction: Option<usize>,
    file_size: u64,
}

/// Display index file information
fn cmd_info(path: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        return Err(format!("Index not found: {}", path).into());
    }

    let header = persist::read_header(path)?;
    let index = persist::read(path)?;
    let info = IndexInfo {
        path: path.to_string(),
        kind: header.kind,
        format_version: header.version,
        dimension: index.dimension(),
        ntotal: index.ntotal(),
        trained: index.is_trained(),
        nprobe: index.parameter(Parameter::NProbe),
        ef_search: index.parameter(Parameter::EfSearch),
        ef_construction: index.parameter(Parameter::EfConstruction),
        file_size: std::fs::metadata(path)?.len(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Index: {}", info.path);
    println!(
        "File size: {} bytes ({:.2} KB)",
        info.file_size,
        info.file_size as f64 / 1024.0
    );
    println!("Kind: {} (format v{})", info.kind, info.format_version);
    println!("Dimension: {}", info.dimension);
    println!("Vectors: {}", info.ntotal);
    println!("Trained: {}", info.trained);

    let params = [
        (Parameter::NProbe, info.nprobe),
        (Parameter::EfSearch, info.ef_search),
        (Parameter::EfConstruction, info.ef_construction),
    ];
    let present: Vec<_> = params
        .iter()
        .filter_map(|(p, v)| v.map(|v| (p, v)))
        .collect();
    if !present.is_empty() {
        println!("\nParameters:");
        for (param, value) in present {
            println!("  {}: {}", param, value);
        }
    }

    Ok(())
}

fn parse_query(text: &str) -> Result<Vec<f32>, Box<dyn std::error::Error>> {
    text.split(',')
        .map(|s| {
            s.trim()
                .parse::<f32>()
                .map_err(|_| format!("Invalid float in query: {:?}", s))
        })
        .collect::<Result<Vec<f32>, String>>()
        .map_err(Into::into)
}

/// Search an index file
fn cmd_search(
    path: &str,
    query: &str,
    k: usize,
    nprobe: Option<usize>,
    ef_search: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        return Err(format!("Index not found: {}", path).into());
    }

    let query = parse_query(query)?;
    let registry = registry::global();
    let handle = registry.read_index(path)?;
    debug!(path, k, dim = query.len(), ?nprobe, ?ef_search, "searching index");

    let outcome = (|| -> Result<_, Box<dyn std::error::Error>> {
        if let Some(value) = nprobe {
            registry.set(handle, Parameter::NProbe, value)?;
        }
        if let Some(value) = ef_search {
            registry.set(handle, Parameter::EfSearch, value)?;
        }
        Ok(registry.search(handle, &query, k)?)
    })();
    registry.free(handle)?;
    let results = outcome?;

    let hits = results.query(0);
    let found: Vec<_> = hits.iter().filter(|h| !h.is_sentinel()).collect();
    if found.is_empty() {
        println!("No results");
        return Ok(());
    }

    println!("Top {} results:", found.len());
    for (rank, hit) in found.iter().enumerate() {
        println!("  {:>3}. id={} score={:.6}", rank + 1, hit.id, hit.score);
    }

    Ok(())
}

/// Build a segment from an embeddings file
fn cmd_build(
    config_path: &str,
    embeddings: &str,
    source: &str,
    ts: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = IndexConfig::from_json_file(config_path)?;
    let layout = SegmentLayout::from_config(&config);
    let rows = read_f32_file(embeddings)?;
    info!(
        config = config_path,
        embeddings,
        source,
        values = rows.len(),
        "building segment"
    );

    let meta = build_segment(&config, &layout, source, &rows, ts.unwrap_or_else(now_millis))?;
    println!(
        "Built segment {} with {} vectors",
        layout.segments().join(&meta.file).display(),
        meta.count
    );

    Ok(())
}

/// Compact all segments into a shard
fn cmd_compact(config_path: &str, ts: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let config = IndexConfig::from_json_file(config_path)?;
    let layout = SegmentLayout::from_config(&config);
    debug!(
        variant = layout.variant(),
        min_segments = config.compaction_min_segments,
        "compacting"
    );

    match compact(&config, &layout, ts.unwrap_or_else(now_millis))? {
        Some(shard) => println!(
            "Compacted into {} ({} vectors)",
            layout.shards().join(&shard.file).display(),
            shard.count
        ),
        None => println!("Nothing to compact"),
    }

    Ok(())
}

/// Build and query a tiny index end to end
fn cmd_selftest() -> Result<(), Box<dyn std::error::Error>> {
    let root = tempfile::tempdir()?;
    let config = IndexConfig {
        index_root: root.path().to_path_buf(),
        index_type: IndexKind::Flat,
        dim: 4,
        ..IndexConfig::default()
    };
    let layout = SegmentLayout::from_config(&config);
    debug!(root = %root.path().display(), "selftest root");

    let rows = [1.0f32, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
    build_segment(&config, &layout, "selftest", &rows, now_millis())?;

    let search = ShardedSearch::open(&config, &layout)?;
    let hits = search.search_top_k(&rows[4..8], 2)?;
    let expected = stable_id("selftest", 1, config.id_hash_salt);

    match hits.first() {
        Some(hit) if hit.id == expected => {
            println!("selftest OK: id={} score={:.4}", hit.id, hit.score);
            Ok(())
        }
        Some(hit) => Err(format!("selftest failed: expected id {}, got {}", expected, hit.id).into()),
        None => Err("selftest failed: no results".into()),
    }
}
