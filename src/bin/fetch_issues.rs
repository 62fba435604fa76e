//! Search Comic Vine for a volume and save its issues as a results document.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use series_reconcile::catalog::{rank_candidates, CatalogError, CatalogFetcher, ComicVineClient, IssueRange};
use series_reconcile::config::{Config, DEFAULT_CONFIG_FILE};
use series_reconcile::models::SeriesDescriptor;
use series_reconcile::persist::{write_results, RAW_RESPONSE_FILE, RESULTS_FILE};
use series_reconcile::progress::{create_progress_bar, create_spinner, format_duration, log_progress};

#[derive(Parser)]
#[command(name = "fetch-issues")]
#[command(about = "Fetch a Comic Vine volume's issues into a results document")]
struct Args {
    /// Volume name to search for
    search_term: String,

    /// First issue number to fetch
    #[arg(long)]
    start: Option<i64>,

    /// Last issue number to fetch
    #[arg(long)]
    end: Option<i64>,

    /// Candidate to use (1-based) instead of prompting
    #[arg(long)]
    pick: Option<usize>,

    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log progress lines instead of drawing progress bars
    #[arg(long)]
    log_only: bool,
}

const LOG_INTERVAL: u64 = 10;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    let start = Instant::now();

    let config = Config::load(&args.config).context("Failed to load configuration")?;
    let output_dir = config.output_dir().to_path_buf();
    let client = ComicVineClient::from_config(&config)
        .context("Incomplete catalog configuration")?
        .with_raw_dump(output_dir.join(RAW_RESPONSE_FILE));

    let spinner = create_spinner(&format!("Searching for '{}'", args.search_term), args.log_only);
    let searched = client.search(&args.search_term);
    spinner.finish_and_clear();
    let mut candidates = exit_on_rate_limit(searched)?;
    if candidates.is_empty() {
        error!("No volumes found for '{}'", args.search_term);
        std::process::exit(1);
    }
    rank_candidates(&args.search_term, &mut candidates);

    for (i, volume) in candidates.iter().enumerate() {
        println!("{}", candidate_line(i + 1, volume));
    }
    let choice = match args.pick {
        Some(pick) => pick,
        None => prompt_choice(candidates.len())?,
    };
    let Some(chosen) = choice.checked_sub(1).and_then(|i| candidates.get(i)) else {
        bail!("Choice {} is out of range 1..={}", choice, candidates.len());
    };
    let series: Arc<SeriesDescriptor> = Arc::new(chosen.clone());
    info!("Selected {}", series);

    let range = IssueRange::from_bounds(args.start, args.end);
    if let Some(range) = range {
        info!("Restricting to issues {}..={}", range.start, range.end);
    }

    let pb = create_progress_bar(0, "Fetching issues", args.log_only);
    let mut report = |done: usize, planned: usize| {
        pb.set_length(planned as u64);
        pb.set_position(done as u64);
        if args.log_only {
            log_progress("fetch", done as u64, planned as u64, LOG_INTERVAL);
        }
    };
    let fetched = client.fetch_issues(&series, range, &mut report);
    pb.finish_and_clear();
    let issues = exit_on_rate_limit(fetched)?;
    if issues.is_empty() {
        error!("No issues found for {}", series);
        std::process::exit(1);
    }

    let results_path = output_dir.join(RESULTS_FILE);
    write_results(&results_path, &issues).context("Failed to write results")?;

    info!(
        "Saved {} issues to {} in {}",
        issues.len(),
        results_path.display(),
        format_duration(start.elapsed())
    );
    Ok(())
}

/// Rate limiting ends the run with exit code 1; other errors propagate.
fn exit_on_rate_limit<T>(result: Result<T, CatalogError>) -> Result<T> {
    match result {
        Err(e) if e.is_rate_limit() => {
            error!("{}", e);
            std::process::exit(1);
        }
        other => Ok(other?),
    }
}

/// One numbered line of the candidate list.
fn candidate_line(number: usize, volume: &SeriesDescriptor) -> String {
    format!("{:>3}. {}", number, volume)
}

fn prompt_choice(count: usize) -> Result<usize> {
    let stdin = io::stdin();
    loop {
        print!("Choose a volume [1-{}]: ", count);
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            bail!("No volume chosen");
        }
        match line.trim().parse::<usize>() {
            Ok(n) if (1..=count).contains(&n) => return Ok(n),
            _ => println!("Please enter a number between 1 and {}", count),
        }
    }
}
