//! Forum Archiver CLI
//!
//! Crawls a paginated forum listing and archives every topic's posts to a
//! markdown file, streaming posts to disk as they are extracted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use forum_archiver::{
    models::Config,
    pipeline::{Crawler, run_forum_crawl},
    storage::MarkdownStorage,
};

/// Exit code for a run stopped by SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

/// Archive a paginated forum to markdown
#[derive(Parser, Debug)]
#[command(name = "forum-archiver", version, about = "Archives forum topics and posts to markdown")]
struct Cli {
    /// Forum listing URL to archive
    #[arg(default_value = "https://forum.awd.ru/viewforum.php?f=1193")]
    forum_url: String,

    /// Path to the configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Output directory (overrides the configured one)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Disable the page cache
    #[arg(long)]
    no_cache: bool,

    /// Print request metrics after the run
    #[arg(long)]
    metrics: bool,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    if let Some(output) = &cli.output {
        config.output.dir = output.display().to_string();
    }
    if cli.no_cache {
        log::info!("page cache disabled");
        config.cache.enabled = false;
    }
    if let Err(e) = config.validate() {
        log::error!("invalid configuration: {e}");
        return ExitCode::FAILURE;
    }

    if !config.site.is_listing_url(&cli.forum_url) {
        log::error!("invalid forum URL: {}", cli.forum_url);
        log::error!(
            "expected something like {}{}?f=1190",
            config.site.base_url,
            config.site.listing_marker
        );
        return ExitCode::FAILURE;
    }

    // SIGINT flips the shared flag; traversals wind down at their next
    // checkpoint and return partial results.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupt received, finishing current page...");
                interrupted.store(true, Ordering::Relaxed);
            }
        });
    }

    let config = Arc::new(config);
    let storage = MarkdownStorage::new(&config.output);

    let mut crawler = match Crawler::with_interrupt(Arc::clone(&config), Arc::clone(&interrupted)) {
        Ok(crawler) => crawler,
        Err(e) => {
            log::error!("failed to initialize crawler: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = run_forum_crawl(&mut crawler, &storage, &cli.forum_url).await;

    if cli.metrics {
        let snapshot = crawler.metrics().snapshot();
        log::info!("requests: {} total, {} ok, {} failed", snapshot.total, snapshot.successful, snapshot.failed);
        log::info!(
            "cache hits: {}, retries: {}, avg request: {:.3}s",
            snapshot.cached,
            snapshot.retry_attempts,
            snapshot.avg_time_secs
        );
    }

    match result {
        Ok(report) if report.success => {
            log::info!("done: {} posts archived", report.total_posts);
            ExitCode::SUCCESS
        }
        Ok(report) => {
            log::error!("run did not complete: {}", report.error_message);
            if interrupted.load(Ordering::Relaxed) {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            log::error!("crawl failed: {e}");
            if interrupted.load(Ordering::Relaxed) {
                ExitCode::from(EXIT_INTERRUPTED)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
