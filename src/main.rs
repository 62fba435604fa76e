use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use series_reconcile::config::{Config, DEFAULT_CONFIG_FILE};
use series_reconcile::models::{IssueRecord, LocalItem};
use series_reconcile::persist::{read_results, RESULTS_FILE};
use series_reconcile::progress::{create_progress_bar, format_duration, log_progress};
use series_reconcile::reconcile::{reconcile, reconcile_parallel, ItemOutcome, SkipReason};
use series_reconcile::store::{CalibreLibrary, InventoryStore};

#[derive(Parser)]
#[command(name = "series-reconcile")]
#[command(about = "Apply fetched Comic Vine issue metadata to matching Calibre books")]
struct Args {
    /// Results document written by fetch-issues (default: <output_dir>/results.json)
    #[arg(long)]
    results: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Calibre library directory or metadata.db (overrides CALIBRE_DB_PATH)
    #[arg(long)]
    library: Option<PathBuf>,

    /// Local series to update (default: the volume of the first fetched issue)
    #[arg(long)]
    series: Option<String>,

    /// Books to consider when no book carries the series name
    #[arg(long, value_enum, default_value_t = Fallback::Unseried)]
    fallback: Fallback,

    /// Compute patches without writing them
    #[arg(long)]
    dry_run: bool,

    /// Reconcile on the rayon thread pool
    #[arg(long)]
    parallel: bool,

    /// Write run statistics as JSON
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Print the library's series names and exit
    #[arg(long)]
    list_series: bool,

    /// Log progress lines instead of drawing progress bars
    #[arg(long)]
    log_only: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Fallback {
    /// Books without any series
    Unseried,
    /// Every book in the library
    All,
    /// Give up
    None,
}

const LOG_INTERVAL: u64 = 50;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let start = Instant::now();

    let mut config = Config::load_or_default(&args.config).context("Failed to load configuration")?;
    if let Some(library) = args.library.clone() {
        config.library_path = Some(library);
    }

    let library_path = config.library_path().context("No Calibre library given")?;
    info!("Opening library: {}", library_path.display());
    let mut library = CalibreLibrary::open(library_path).context("Failed to open Calibre library")?;

    if args.list_series {
        for name in library.list_series()? {
            println!("{}", name);
        }
        return Ok(());
    }

    let results_path = args
        .results
        .clone()
        .unwrap_or_else(|| config.output_dir().join(RESULTS_FILE));
    let issues = read_results(&results_path).context("Failed to read results document")?;
    if issues.is_empty() {
        error!("No issues in {}", results_path.display());
        std::process::exit(1);
    }
    info!("Loaded {} issues from {}", issues.len(), results_path.display());

    let series_name = args
        .series
        .clone()
        .unwrap_or_else(|| issues[0].series.name.clone());
    let items = load_items(&library, &series_name, args.fallback)?;
    if items.is_empty() {
        error!("No books to update for series '{}'", series_name);
        std::process::exit(1);
    }

    let result = if args.parallel {
        reconcile_parallel(&items, &issues)
    } else {
        reconcile(&items, &issues)
    };
    if result.stats.index_collisions > 0 {
        warn!(
            "{} issues share an index with an earlier issue; the later one wins",
            result.stats.index_collisions
        );
    }

    let mut applied = 0usize;
    let mut failed = 0usize;
    let pb = create_progress_bar(result.outcomes.len() as u64, "Updating books", args.log_only);
    for (i, outcome) in result.outcomes.iter().enumerate() {
        match outcome {
            ItemOutcome::Matched { id, title, index, source, patch } => {
                info!("[{}] '{}' -> #{} ({:?}): {}", id, title, index, source, patch.title);
                if !args.dry_run {
                    match library.apply_patch(*id, patch) {
                        Ok(()) => applied += 1,
                        Err(e) => {
                            error!("[{}] Failed to update '{}': {}", id, title, e);
                            failed += 1;
                        }
                    }
                }
            }
            ItemOutcome::Unmatched { id, title, reason } => log_unmatched(*id, title, reason, &issues),
        }
        pb.inc(1);
        if args.log_only {
            log_progress("update", i as u64 + 1, result.outcomes.len() as u64, LOG_INTERVAL);
        }
    }
    pb.finish_and_clear();

    let stats = &result.stats;
    println!("\n{:=<60}", "");
    println!("Reconciliation {}", if args.dry_run { "preview" } else { "complete" });
    println!("  Books: {}  Issues: {}", stats.total_items, stats.total_issues);
    println!(
        "  Matched: {} ({:.1}%) by title {}, hint {}, author {}",
        stats.total_matched(),
        stats.match_rate(),
        stats.matched_by_title,
        stats.matched_by_hint,
        stats.matched_by_author
    );
    println!(
        "  Unmatched: {} (no index {}, no issue {}, invalid issue {})",
        stats.total_unmatched(),
        stats.unmatched_no_index,
        stats.unmatched_no_issue,
        stats.unmatched_invalid_issue
    );
    if !args.dry_run {
        println!("  Applied: {}  Failed: {}", applied, failed);
    }
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    if let Some(path) = &args.stats {
        stats.write_to_file(path)?;
        info!("Wrote stats to {}", path.display());
    }

    Ok(())
}

/// Books for `series_name`, falling back per `fallback` when none carry it.
fn load_items(library: &CalibreLibrary, series_name: &str, fallback: Fallback) -> Result<Vec<LocalItem>> {
    let items = library.list_by_series(series_name)?;
    if !items.is_empty() {
        info!("Found {} books in series '{}'", items.len(), series_name);
        return Ok(items);
    }

    let items = match fallback {
        Fallback::Unseried => library.list_without_series()?,
        Fallback::All => library.list_all()?,
        Fallback::None => Vec::new(),
    };
    warn!(
        "No books in series '{}'; falling back to {} books ({:?})",
        series_name,
        items.len(),
        fallback
    );
    Ok(items)
}

fn log_unmatched(id: i64, title: &str, reason: &SkipReason, issues: &[IssueRecord]) {
    match reason {
        SkipReason::NoIndex => warn!("[{}] No index in '{}'", id, title),
        SkipReason::NoIssueAtIndex(index) => {
            warn!("[{}] No issue #{} for '{}' ({} issues fetched)", id, index, title, issues.len())
        }
        SkipReason::InvalidIssue { index, error } => {
            warn!("[{}] Skipping issue #{} for '{}': {}", id, index, title, error)
        }
    }
}
