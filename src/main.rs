//! scour - local incremental file search
//!
//! Crawls user-chosen roots into a persistent tantivy index over
//! filenames and sampled file content, newest files first.

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use scour::cli::{Cli, Commands, OutputFormat};
use scour::config::Config;
use scour::engine::Engine;
use scour::output::{format_mtime, format_size, print_json};
use scour::pipeline::{CrawlMode, CrawlPhase, Crawler};
use scour::planner::SearchRequest;
use scour::prefs::PrefsStore;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load();

    match cli.command {
        Commands::Index { roots, full, reset } => run_index(&config, roots, full, reset),
        Commands::Search {
            query,
            scope,
            glob,
            limit,
            sort_modified,
        } => run_search(&config, query, scope.into(), glob, limit, sort_modified, cli.format),
        Commands::Status => run_status(&config, cli.format),
        Commands::Reset => run_reset(&config),
    }
}

fn open_engine(config: &Config) -> Result<Arc<Engine>> {
    Ok(Arc::new(Engine::open(
        &config.resolved_index_dir(),
        config.store_settings(),
    )?))
}

fn run_index(config: &Config, roots: Vec<PathBuf>, full: bool, reset: bool) -> Result<()> {
    let roots = if roots.is_empty() {
        vec![std::env::current_dir()?]
    } else {
        roots
    };

    let engine = open_engine(config)?;
    let prefs = PrefsStore::load(config.prefs_path());
    let crawler = Crawler::new(Arc::clone(&engine), prefs, config.crawl_settings());

    let updates = crawler.subscribe();
    if reset {
        crawler.reset_and_start(roots)?;
    } else {
        let mode = if full {
            CrawlMode::Full
        } else {
            CrawlMode::Incremental
        };
        crawler.start(roots, mode, CrawlPhase::Initial, false);
    }

    let mut last_status = String::new();
    for snapshot in updates {
        if snapshot.status != last_status {
            eprintln!("  {} ({} files)", snapshot.status, snapshot.files_indexed);
            last_status = snapshot.status.clone();
        }
        if !snapshot.is_running {
            break;
        }
    }

    let done = crawler.wait();
    if done.status == "complete" {
        println!(
            "{} Indexed {} files ({} documents total)",
            "✓".green(),
            done.files_indexed,
            engine.num_docs()
        );
    } else {
        println!("{} Crawl ended: {}", "✗".yellow(), done.status);
    }
    Ok(())
}

fn run_search(
    config: &Config,
    query: String,
    scope: scour::planner::SearchScope,
    glob: Option<String>,
    limit: usize,
    sort_modified: bool,
    format: OutputFormat,
) -> Result<()> {
    let engine = open_engine(config)?;
    let request = SearchRequest {
        q: query,
        scope,
        glob,
        limit,
        sort_by_mtime: sort_modified,
    };
    let hits = engine.search(&request)?;

    match format {
        OutputFormat::Json => print_json(&hits, false)?,
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("No results.");
                return Ok(());
            }
            for hit in &hits {
                println!(
                    "{}  {}  {}  {:.2}",
                    hit.path.cyan(),
                    format_mtime(hit.mtime).dimmed(),
                    format_size(hit.size).dimmed(),
                    hit.score
                );
            }
        }
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusReport {
    index_dir: String,
    documents: u64,
    tracked_paths: usize,
    last_completed_at: Option<i64>,
    schedule_window_enabled: bool,
    bucket_progress: std::collections::BTreeMap<String, usize>,
}

fn run_status(config: &Config, format: OutputFormat) -> Result<()> {
    let engine = open_engine(config)?;
    let prefs = PrefsStore::load(config.prefs_path());
    let snapshot = prefs.snapshot();

    let report = StatusReport {
        index_dir: engine.index_dir().display().to_string(),
        documents: engine.num_docs(),
        tracked_paths: engine.dedup_len(),
        last_completed_at: snapshot.last_completed_at,
        schedule_window_enabled: snapshot.schedule_window_enabled.unwrap_or(false),
        bucket_progress: snapshot.bucket_progress,
    };

    match format {
        OutputFormat::Json => print_json(&report, false)?,
        OutputFormat::Text => {
            println!("Index: {}", report.index_dir);
            println!("Documents: {}", report.documents);
            println!("Tracked paths: {}", report.tracked_paths);
            match report.last_completed_at {
                Some(at) => println!("Last completed: {}", format_mtime(at)),
                None => println!("Last completed: {}", "never".yellow()),
            }
            println!(
                "Nightly window: {}",
                if report.schedule_window_enabled {
                    "enabled".green().to_string()
                } else {
                    "disabled".to_string()
                }
            );
            if !report.bucket_progress.is_empty() {
                println!("Interrupted full crawl, resume points:");
                for (root, bucket) in &report.bucket_progress {
                    println!("  {root} -> bucket {bucket}");
                }
            }
        }
    }
    Ok(())
}

fn run_reset(config: &Config) -> Result<()> {
    let engine = open_engine(config)?;
    engine.reset()?;
    println!("{} Index reset: {}", "✓".green(), engine.index_dir().display());
    Ok(())
}
