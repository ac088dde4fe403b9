use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use hsreplay_kernel::config::SiteConfig;
use hsreplay_kernel::embed::PlaybackState;
use hsreplay_kernel::history::{filter_games, GameListing, GameReplay, GameSummary};
use hsreplay_kernel::metadata::{
    url_template, FileStorage, HttpFetcher, MetadataManager, NullStorage, StorageBackend,
};
use hsreplay_kernel::metrics::{
    BatchingMiddleware, Fields, FlushMode, InfluxMetricsBackend, MetricsReporter, Tags,
};
use hsreplay_kernel::share::{build_url, ShareOptions};

/// HSReplay client tools
#[derive(Parser, Debug)]
#[command(name = "hsreplay")]
#[command(about = "Replay metadata, share links, history and telemetry", long_about = None)]
struct Cli {
    /// Path to site config JSON
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch card metadata for a build through the cache
    Metadata {
        /// Client build number; omitted or 0 loads the latest
        build: Option<u32>,

        #[arg(long)]
        locale: Option<String>,
    },

    /// Print the share link for a replay
    Share {
        url: String,

        #[arg(long)]
        turn: Option<u32>,

        #[arg(long)]
        reveal: Option<bool>,

        #[arg(long)]
        swap: Option<bool>,

        /// Pin the link to the current turn
        #[arg(long)]
        link_turn: bool,

        /// Keep reveal/swap in the link
        #[arg(long)]
        preserve_perspective: bool,
    },

    /// Summarize a game listing as JSON
    History {
        /// Path to a listing (`{"count", "results"}`) or an array of games
        games: PathBuf,

        #[arg(long, default_value = "")]
        query: String,
    },

    /// Send one data point through the batching pipeline
    Metric {
        series: String,

        /// Field values as key=value
        #[arg(required = true)]
        values: Vec<String>,

        /// Tags as key=value
        #[arg(long = "tag")]
        tags: Vec<String>,
    },
}

/// Wrapper for `history` JSON output
#[derive(Debug, Serialize)]
struct HistoryOutput {
    query: String,
    count: usize,
    results: Vec<GameSummary>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    // ----------------------------
    // Load config
    // ----------------------------
    let config = match &cli.config {
        Some(path) => SiteConfig::load(path)?,
        None => SiteConfig::default(),
    };

    match cli.command {
        Command::Metadata { build, locale } => metadata(&config, build, locale).await,
        Command::Share {
            url,
            turn,
            reveal,
            swap,
            link_turn,
            preserve_perspective,
        } => {
            let state = PlaybackState {
                turn,
                revealed: reveal,
                swapped: swap,
            };
            let options = ShareOptions {
                show_link_to_turn: true,
                link_to_turn: link_turn,
                show_preserve_perspective: true,
                preserve_perspective,
                ..ShareOptions::default()
            };
            println!("{}", build_url(&url, &state, &options));
            Ok(())
        }
        Command::History { games, query } => history(&games, &query),
        Command::Metric {
            series,
            values,
            tags,
        } => metric(&config, &series, &values, &tags).await,
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

async fn metadata(config: &SiteConfig, build: Option<u32>, locale: Option<String>) -> Result<()> {
    let storage: Arc<dyn StorageBackend> = match config.resolved_cache_dir() {
        Some(dir) => Arc::new(FileStorage::new(dir)),
        None => Arc::new(NullStorage),
    };
    let manager = MetadataManager::new(
        url_template(config.metadata_url_template.clone()),
        storage,
        Arc::new(HttpFetcher::default()),
    )
    .with_locale(locale.unwrap_or_else(|| config.locale.clone()));

    let document = manager.get(build).await?;
    println!("{}", document.len());
    Ok(())
}

fn history(path: &Path, query: &str) -> Result<()> {
    let data =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let games = match serde_json::from_str::<GameListing>(&data) {
        Ok(listing) => listing.results,
        Err(_) => serde_json::from_str::<Vec<GameReplay>>(&data)?,
    };

    let output = summarize(&games, query, Utc::now());
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn summarize(games: &[GameReplay], query: &str, now: DateTime<Utc>) -> HistoryOutput {
    let results: Vec<GameSummary> = filter_games(games, query)
        .into_iter()
        .map(|game| GameSummary::new(game, now))
        .collect();

    HistoryOutput {
        query: query.to_string(),
        count: results.len(),
        results,
    }
}

async fn metric(config: &SiteConfig, series: &str, values: &[String], tags: &[String]) -> Result<()> {
    let mut fields = Fields::new();
    for pair in values {
        let (key, value) = split_pair(pair)?;
        let value: f64 = value
            .parse()
            .with_context(|| format!("field `{key}` is not a number"))?;
        fields.insert(key.to_string(), value);
    }

    let mut point_tags = Tags::new();
    for pair in tags {
        let (key, value) = split_pair(pair)?;
        point_tags.insert(key.to_string(), value.to_string());
    }
    let point_tags = (!point_tags.is_empty()).then_some(point_tags);

    let batching = BatchingMiddleware::with_interval(
        InfluxMetricsBackend::new(config.telemetry_endpoint.clone()),
        config.flush_interval(),
    );
    let reporter = MetricsReporter::new(batching, config.metrics_prefix.as_str());
    reporter.write_point(series, fields, point_tags);
    reporter.backend().teardown(FlushMode::Synchronous).await;

    tracing::info!(series, "metric sent");
    Ok(())
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("expected key=value, got `{pair}`"),
    }
}
