use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::filter::LevelFilter;

use dupe_scanner::config::{AppConfig, load_config};
use dupe_scanner::core::executor::{Progress, ProgressCallback};
use dupe_scanner::core::profile::ScanProfile;
use dupe_scanner::services::backend::Backend;
use dupe_scanner::services::report::DEFAULT_REPORT_FILE;
use dupe_scanner::services::{FlowClient, Indexer, Scanner, write_groups};

#[derive(Parser, Debug)]
#[command(
    name = "dupe-scanner",
    version,
    about = "Find duplicate images with a Flow similarity-search backend"
)]
struct Cli {
    /// Flow host, e.g. http://localhost:8983
    #[arg(long, global = true, env = "FLOW_HOST")]
    host: Option<String>,

    /// Collection (core) name
    #[arg(long, global = true, env = "FLOW_COLLECTION")]
    collection: Option<String>,

    /// Path between host and collection
    #[arg(long, global = true, value_name = "PATH")]
    context_path: Option<String>,

    /// Request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// JSON settings file; flags override its values
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the backend is reachable and count its documents
    Status,

    /// Analyze and ingest local images
    Index {
        /// Directory to index
        #[arg(short, long, value_name = "DIR")]
        dir: PathBuf,
        /// Only index the top-level directory
        #[arg(long)]
        no_recursive: bool,
        /// Stop after this many images
        #[arg(long, value_name = "N")]
        max_docs: Option<usize>,
        /// Parallel requests
        #[arg(short, long, value_name = "N")]
        concurrency: Option<usize>,
    },

    /// Delete every document in the collection
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Find duplicate groups across the whole collection
    Scan {
        /// Minimum similarity score, 0.0 to 1.0
        #[arg(short, long)]
        threshold: Option<f64>,
        /// Speed/quality trade-off
        #[arg(long, value_enum)]
        profile: Option<ScanProfile>,
        /// Only scan the first N documents
        #[arg(long, value_name = "N")]
        limit: Option<usize>,
        /// Parallel requests
        #[arg(short, long, value_name = "N")]
        concurrency: Option<usize>,
        /// Where to write the duplicate groups
        #[arg(short, long, value_name = "FILE", default_value = DEFAULT_REPORT_FILE)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let mut config = load_app_config(&cli)?;
    let client = FlowClient::new(config.flow.clone()).context("Failed to build HTTP client")?;

    match cli.command {
        Commands::Status => {
            let status = client.status().await;
            println!("▶ Flow at {}", status.url);
            if !status.reachable {
                bail!("Flow backend not reachable. Ensure Flow is up and running.");
            }
            match status.documents {
                Some(count) => println!("   ✅ Reachable, {count} documents indexed"),
                None => println!("   ✅ Reachable, document count unavailable"),
            }
        }

        Commands::Index {
            dir,
            no_recursive,
            max_docs,
            concurrency,
        } => {
            if no_recursive {
                config.index.recursive = false;
            }
            if let Some(max_docs) = max_docs {
                config.index.max_docs = max_docs;
            }
            if let Some(concurrency) = concurrency {
                config.index.concurrency = concurrency;
            }
            ensure_reachable(&client).await?;

            let client = client.with_thumbnail_size(config.index.thumbnail_size);
            let bar = progress_bar("images")?;
            let indexer = Indexer::new(Arc::new(client), config.index.clone())
                .with_progress_callback(progress_callback(&bar));
            cancel_on_ctrl_c(indexer.get_cancellation_token());

            let discovery = indexer
                .discover(&dir)
                .with_context(|| format!("Failed to scan {:?}", dir))?;
            if discovery.truncated {
                println!(
                    "Doc limit of {} reached. Quit scanning.",
                    config.index.max_docs
                );
            }
            if discovery.paths.is_empty() {
                bar.finish_and_clear();
                println!("No images to index.");
                return Ok(());
            }
            println!(
                "▶ Indexing {} images in {} (this may take a while)…",
                discovery.paths.len(),
                dir.display()
            );

            let start = Instant::now();
            let result = indexer.index(discovery).await;
            bar.finish_and_clear();
            let report = result?;
            print_elapsed("indexing", start);

            if report.is_cancelled() {
                println!("⚠️  Indexing aborted; ingested documents were committed.");
            }
            if report.run.failed() > 0 {
                println!(
                    "⚠️  {}/{} images could not be indexed.",
                    report.run.failed(),
                    report.run.total
                );
            }
            println!(
                "✨ Indexed {} images",
                report.run.completed - report.run.failed()
            );
        }

        Commands::Clear { yes } => {
            let collection = config.flow.collection.clone();
            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Delete ALL documents in collection '{collection}'?"
                    ))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("Nothing deleted.");
                    return Ok(());
                }
            }
            client
                .clear()
                .await
                .with_context(|| format!("Failed to clear collection '{collection}'"))?;
            println!("🗑️  Cleared collection '{collection}'");
        }

        Commands::Scan {
            threshold,
            profile,
            limit,
            concurrency,
            output,
        } => {
            if let Some(threshold) = threshold {
                config.scan.threshold = threshold;
            }
            if let Some(profile) = profile {
                config.scan.profile = profile;
            }
            if limit.is_some() {
                config.scan.limit = limit;
            }
            if let Some(concurrency) = concurrency {
                config.scan.concurrency = concurrency;
            }
            ensure_reachable(&client).await?;

            println!("▶ Scanning {} for duplicates…", client.url());
            let bar = progress_bar("items")?;
            let scanner = Scanner::new(Arc::new(client), config.scan.clone())
                .with_progress_callback(progress_callback(&bar));
            cancel_on_ctrl_c(scanner.get_cancellation_token());

            let start = Instant::now();
            let result = scanner.scan().await;
            bar.finish_and_clear();
            let report = result?;
            print_elapsed("scan", start);

            if report.is_cancelled() {
                println!("⚠️  Scan aborted; no report written.");
                return Ok(());
            }
            println!(
                "   {} of {} documents scanned (approximate={}, filter={})",
                report.scanned, report.collection_size, report.mode.approximate, report.mode.filter
            );
            if report.run.failed() > 0 {
                println!(
                    "⚠️  {} of {} items failed",
                    report.run.failed(),
                    report.run.total
                );
            }

            if report.groups.is_empty() {
                println!("No duplicates found.");
                return Ok(());
            }
            println!(
                "Found {} duplicate group(s) with {} images:",
                report.groups.len(),
                report.groups.member_count()
            );
            for group in report.groups.iter() {
                println!(" {}:", group.name);
                for member in &group.members {
                    println!("   ▶ {member}");
                }
            }
            write_groups(&output, &report.groups)?;
            println!("💾 Saved groups to {}", output.display());
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        LevelFilter::ERROR
    } else {
        match verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Settings file (if any) with command-line flags applied on top.
fn load_app_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            load_config(path).with_context(|| format!("Failed to load config {:?}", path))?
        }
        None => AppConfig::default(),
    };
    if let Some(host) = &cli.host {
        config.flow.host = host.clone();
    }
    if let Some(collection) = &cli.collection {
        config.flow.collection = collection.clone();
    }
    if let Some(context_path) = &cli.context_path {
        config.flow.context_path = context_path.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.flow.timeout_secs = timeout;
    }
    config.flow.validate()?;
    Ok(config)
}

async fn ensure_reachable(client: &FlowClient) -> Result<()> {
    if !client.ping().await {
        bail!(
            "Flow backend at {} not reachable. Ensure Flow is up and running.",
            client.url()
        );
    }
    Ok(())
}

fn progress_bar(unit: &str) -> Result<ProgressBar> {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(&format!(
            "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.green/blue}}] {{pos}}/{{len}} {unit} {{msg}}"
        ))?
        .progress_chars("#>-"),
    );
    bar.enable_steady_tick(Duration::from_millis(100));
    Ok(bar)
}

fn progress_callback(bar: &ProgressBar) -> ProgressCallback {
    let bar = bar.clone();
    Arc::new(move |progress: Progress| {
        bar.set_length(progress.total as u64);
        bar.set_position(progress.completed as u64);
        if progress.failed > 0 {
            bar.set_message(format!("({} failed)", progress.failed));
        }
    })
}

/// Flip `token` on the first Ctrl+C; running requests finish, nothing new starts.
fn cancel_on_ctrl_c(token: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n⚠️  Interrupted, waiting for running requests…");
            token.store(true, Ordering::SeqCst);
        }
    });
}

fn print_elapsed(label: &str, start: Instant) {
    println!("⏱ {} took {:.2?}", label, start.elapsed());
}
