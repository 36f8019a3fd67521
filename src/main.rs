use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use matchfeed::cli::Cli;
use matchfeed::cli::commands::Commands;
use matchfeed::config::Config;
use matchfeed::domain::{Candidate, Filters, MatchEvent, SubmitResult, SwipeDirection};
use matchfeed::mock::{MockCandidateSource, MockImageFetcher, MockSwipeService};
use matchfeed::network::NetworkMonitor;
use matchfeed::pool::{CandidateSource, FetchExtra, FetchRequest, HttpCandidateSource};
use matchfeed::retry::RetryPolicy;
use matchfeed::sinks::{LogAnalyticsSink, NotificationSink};
use matchfeed::{FeedDeps, MatchFeed};

fn setup_logging(default_filter: &str) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("matchfeed")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("matchfeed.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Candidates and scripted match replies for `simulate`
#[derive(Debug, Deserialize)]
struct Fixture {
    candidates: Vec<Value>,
    #[serde(default)]
    matches: HashMap<String, f64>,
}

/// Prints each delivered match to the terminal
struct ConsoleNotificationSink;

impl NotificationSink for ConsoleNotificationSink {
    fn deliver(&self, event: MatchEvent) {
        println!(
            "{} {} (score {:.1})",
            "It's a match:".magenta().bold(),
            event.matched_user.name(),
            event.score
        );
    }
}

async fn run_application(cli: &Cli, config: &Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        None => handle_config_command(config),
        Some(Commands::Simulate { fixture, swipes, undo }) => {
            handle_simulate_command(fixture, swipes, *undo, config, cli.is_verbose()).await
        }
        Some(Commands::Config) => handle_config_command(config),
        Some(Commands::Backoff { sample }) => handle_backoff_command(*sample, config),
        Some(Commands::Fetch { page, base_url }) => handle_fetch_command(*page, base_url.as_deref(), config).await,
    }
}

fn load_fixture(path: &Path) -> Result<Fixture> {
    let content = fs::read_to_string(path).context(format!("Failed to read fixture {}", path.display()))?;
    serde_json::from_str(&content).context("Failed to parse fixture")
}

async fn handle_simulate_command(
    fixture_path: &Path,
    swipes: &[SwipeDirection],
    undo: bool,
    config: &Config,
    verbose: bool,
) -> Result<()> {
    info!("Simulating feed from {} with {} swipes", fixture_path.display(), swipes.len());
    let fixture = load_fixture(fixture_path)?;
    let feed_config = config.feed_config();

    // The initial load is a reset and asks for a double batch
    let source = Arc::new(MockCandidateSource::new());
    let first = (feed_config.pool.batch_size * 2).min(fixture.candidates.len());
    let (head, tail) = fixture.candidates.split_at(first);
    source.push_page(head.to_vec());
    for chunk in tail.chunks(feed_config.pool.batch_size.max(1)) {
        source.push_page(chunk.to_vec());
    }

    let service = Arc::new(MockSwipeService::new());
    for (id, score) in &fixture.matches {
        service.respond(id, Ok(SubmitResult::matched(*score)));
    }

    let deps = FeedDeps {
        source,
        swipes: service,
        notifications: Arc::new(ConsoleNotificationSink),
        analytics: Arc::new(LogAnalyticsSink),
        images: Arc::new(MockImageFetcher::new()),
    };
    let feed = MatchFeed::new(deps, feed_config, NetworkMonitor::default());

    let outcome = feed.start().await.context("Initial load failed")?;
    println!(
        "{} {} candidates (more: {})",
        "Loaded".green(),
        outcome.accepted.len(),
        outcome.has_more
    );

    for direction in swipes {
        let Some(ticket) = feed.swipe(*direction) else {
            println!("{}", "No more candidates".yellow());
            break;
        };
        if verbose {
            let label = match direction {
                SwipeDirection::Like => direction.as_str().green(),
                SwipeDirection::Pass => direction.as_str().red(),
            };
            println!("  {} {}", label, ticket.record.candidate.name());
        }
        ticket.submitted().await;
    }

    if undo && let Some(record) = feed.undo() {
        println!("{} {}", "Undid".yellow(), record.candidate.name());
    }

    feed.settle().await;
    for failure in feed.take_failures() {
        println!("{} {}: {}", "Failed:".red(), failure.candidate.name(), failure.error);
    }

    let snapshot = feed.snapshot();
    println!(
        "{} cursor {} of {}, {} swipes in history",
        "Done:".cyan(),
        snapshot.cursor,
        snapshot.candidates.len(),
        snapshot.history.len()
    );
    feed.close();
    Ok(())
}

fn handle_config_command(config: &Config) -> Result<()> {
    info!("Printing effective configuration");
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn handle_backoff_command(sample: bool, config: &Config) -> Result<()> {
    info!("Printing retry schedule");
    let policy = RetryPolicy::from(&config.retry);
    println!("{}", "Retry schedule:".cyan());
    for retry_count in 0..policy.max_retries {
        if sample {
            println!("  retry {}: {} ms", retry_count + 1, policy.delay_for(retry_count).as_millis());
        } else {
            let low = policy.delay_with_jitter(retry_count, std::time::Duration::ZERO);
            let high = policy.delay_with_jitter(retry_count, policy.jitter);
            println!("  retry {}: {}..={} ms", retry_count + 1, low.as_millis(), high.as_millis());
        }
    }
    println!("  then {}", "give up (manual retry only)".red());
    Ok(())
}

async fn handle_fetch_command(page: u32, base_url: Option<&str>, config: &Config) -> Result<()> {
    let mut source_config = config.source_config();
    if let Some(base_url) = base_url {
        source_config.base_url = base_url.to_string();
    }
    let source = HttpCandidateSource::new(source_config).context("Failed to build HTTP client")?;
    info!("Fetching page {} from {}", page, source.endpoint());

    let request = FetchRequest {
        page,
        filters: Filters::default(),
        limit: config.pool.batch_size,
        extra: FetchExtra::default(),
    };
    let response = source.fetch(request).await.context("Fetch failed")?;

    println!("{} {} items from {}", "Fetched".green(), response.items.len(), source.endpoint());
    for item in response.items {
        match Candidate::from_value(item) {
            Ok(candidate) => println!("  {} (score {:.1})", candidate.name(), candidate.score),
            Err(e) => println!("  {} {}", "skipped:".yellow(), e),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging at the configured level
    setup_logging(config.log_filter()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    run_application(&cli, &config).await.context("Application failed")?;

    Ok(())
}
