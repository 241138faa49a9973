use anyhow::Context;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use epi_ingest::apis::{CovidTrackingClient, JsonFileSource};
use epi_ingest::config::Config;
use epi_ingest::logging;
use epi_ingest::metrics::init_metrics;
use epi_ingest::pipeline::Pipeline;
use epi_ingest::plot::{render_timeline, render_timeline_svg, DEFAULT_HEIGHT, DEFAULT_WIDTH};
use epi_ingest::schema::Metric;
use epi_ingest::types::RegionSource;

#[derive(Parser)]
#[command(name = "epi_ingest")]
#[command(about = "Daily epidemiological statistics ingester and query tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull records from the upstream source into the local store
    Fetch {
        #[command(flatten)]
        target: FetchTarget,
        /// With --all-regions, only the first N regions
        #[arg(long, requires = "all_regions")]
        limit: Option<usize>,
        /// Only the region's current snapshot instead of its full history
        #[arg(long, requires = "region")]
        current: bool,
        /// Read records from a JSON dump instead of the HTTP API
        #[arg(long)]
        source_file: Option<PathBuf>,
    },
    /// Regions ranked by a metric, one row per region
    Top {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, value_enum, default_value_t = Metric::Cases)]
        metric: Metric,
        /// Rank rows from this day (YYYY-MM-DD) instead of each region's latest
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Latest stored record for a region
    Region { code: String },
    /// Most recent daily records for a region, newest first
    Timeline {
        code: String,
        #[arg(long, default_value_t = 30)]
        days: usize,
    },
    /// Aggregate statistics over every region's latest record
    Summary,
    /// Draw a region's metric over time: text on stdout, or an SVG file with --output
    Visualize {
        code: String,
        #[arg(long, value_enum, default_value_t = Metric::Cases)]
        metric: Metric,
        #[arg(long, default_value_t = 30)]
        days: usize,
        /// Write an SVG chart to this path instead of printing a text chart
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Recent ingest runs from the ledger
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct FetchTarget {
    /// Two-letter region code
    #[arg(long)]
    region: Option<String>,
    /// Every region the source lists
    #[arg(long)]
    all_regions: bool,
    /// The whole-country series, stored under region code US
    #[arg(long)]
    national: bool,
}

fn build_source(config: &Config, source_file: Option<&Path>) -> anyhow::Result<Box<dyn RegionSource>> {
    match source_file {
        Some(path) => {
            let source = JsonFileSource::load(path)
                .with_context(|| format!("Failed to load source file {}", path.display()))?;
            Ok(Box::new(source))
        }
        None => Ok(Box::new(CovidTrackingClient::new(config)?)),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run_fetch(pipeline: &Pipeline, target: FetchTarget, limit: Option<usize>, current: bool) -> anyhow::Result<()> {
    if let Some(code) = target.region {
        if current {
            println!("🔄 Refreshing current snapshot for {}...", code);
            match pipeline.refresh_current(&code).await? {
                Some(record) => print_json(&record)?,
                None => println!("⚠️  No data for {}", code),
            }
        } else {
            println!("🔄 Fetching daily history for {}...", code);
            let records = pipeline.run_region(&code).await?;
            if records.is_empty() {
                println!("⚠️  No data for {}", code);
            } else {
                println!("✅ Loaded {} records for {}", records.len(), code);
            }
        }
    } else if target.all_regions {
        println!("🚀 Fetching all regions...");
        let report = pipeline.run_all_with_report(limit).await?;
        println!("\n📊 Pipeline Results:");
        println!("   Regions attempted: {}", report.regions_attempted);
        println!("   Succeeded: {}", report.regions_succeeded);
        println!("   Failed: {}", report.regions_failed);
        println!("   Records loaded: {}", report.total_accepted);
        if !report.failures.is_empty() {
            println!("\n⚠️  Failures:");
            for failure in &report.failures {
                println!("   - {}: {}", failure.region_code, failure.error);
            }
        }
    } else if target.national {
        println!("🔄 Fetching national history...");
        let records = pipeline.run_national().await?;
        if records.is_empty() {
            println!("⚠️  No national data");
        } else {
            println!("✅ Loaded {} national records", records.len());
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;
    logging::init_logging(&config.log_dir);
    if let Some(port) = config.metrics_port {
        init_metrics(port);
    }
    info!(db = %config.db_path.display(), "Starting epi_ingest");

    let source_file = match &cli.command {
        Commands::Fetch { source_file, .. } => source_file.clone(),
        _ => None,
    };
    let source = build_source(&config, source_file.as_deref())?;
    let pipeline = Pipeline::from_config(&config, source)?;

    match cli.command {
        Commands::Fetch {
            target, limit, current, ..
        } => {
            if let Err(e) = run_fetch(&pipeline, target, limit, current).await {
                error!("Fetch failed: {:#}", e);
                println!("❌ Fetch failed: {:#}", e);
                return Err(e);
            }
        }
        Commands::Top { limit, metric, as_of } => {
            let rows = pipeline.query_top(metric, limit, as_of)?;
            if rows.is_empty() {
                println!("No data");
            } else {
                print_json(&rows)?;
            }
        }
        Commands::Region { code } => match pipeline.query_region(&code)? {
            Some(row) => print_json(&row)?,
            None => println!("No data for {}", code),
        },
        Commands::Timeline { code, days } => {
            let rows = pipeline.query_time_series(&code, days)?;
            if rows.is_empty() {
                println!("No data for {}", code);
            } else {
                print_json(&rows)?;
            }
        }
        Commands::Summary => print_json(&pipeline.query_summary()?)?,
        Commands::Visualize {
            code,
            metric,
            days,
            output,
        } => {
            let rows = pipeline.query_time_series(&code, days)?;
            if rows.is_empty() {
                println!("No data for {}", code);
                return Ok(());
            }
            match output {
                Some(path) => match render_timeline_svg(&rows, metric, &path)? {
                    0 => println!("No {} data for {}", metric.label(), code),
                    points => println!("✅ Chart of {} points written to {}", points, path.display()),
                },
                None => print!("{}", render_timeline(&rows, metric, DEFAULT_WIDTH, DEFAULT_HEIGHT)),
            }
        }
        Commands::Runs { limit } => {
            let runs = pipeline.recent_runs(limit)?;
            if runs.is_empty() {
                println!("No runs recorded");
            } else {
                print_json(&runs)?;
            }
        }
    }
    Ok(())
}
