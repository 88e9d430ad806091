#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Command-line orchestrator for the street works impact pipeline.
//!
//! Loads inputs into the `DuckDB` warehouse, scores a reporting period,
//! computes wellbeing costs, and lists the run log. Without a subcommand it
//! falls back to an interactive menu.
//!
//! Uses `indicatif-log-bridge` (via [`street_impact_cli_utils::init_logger`])
//! to route `log` output through `indicatif::MultiProgress` so that log
//! lines and progress bars never fight for the terminal.

mod interactive;
mod pipeline;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use street_impact_config::ImpactConfig;
use street_impact_database::{Connection, outputs, paths, run_log};
use street_impact_ingest_models::{ImportResult, InputKind};
use street_impact_permit_models::ReportingPeriod;
use street_impact_scoring_models::{AggregationLevel, NormalizationVariant};
use street_impact_wellbeing_models::WellbeingRun;

use crate::pipeline::{BoxError, ScoreOutcome};

#[derive(Parser)]
#[command(
    name = "street_impact",
    about = "Street works impact scoring and wellbeing pipeline"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (defaults to `$STREET_IMPACT_CONFIG`, then
    /// `street_impact.toml` if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Warehouse file (overrides `warehouse.path`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Reporting period, `YYYY-MM`
    #[arg(long, global = true)]
    period: Option<ReportingPeriod>,

    /// Normalization variant (`percentile_rank` or `min_max`)
    #[arg(long, global = true)]
    variant: Option<NormalizationVariant>,

    /// Aggregation level (`street` or `authority`)
    #[arg(long, global = true)]
    level: Option<AggregationLevel>,

    /// Wellbeing cost per household per day, in pounds
    #[arg(long, global = true)]
    unit_cost: Option<f64>,

    /// Radius around the works location that households are counted in
    #[arg(long, global = true)]
    buffer_metres: Option<f64>,

    /// Skip writing the archive snapshot
    #[arg(long, global = true)]
    no_archive: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load an input file into the warehouse, replacing the previous load
    Ingest {
        /// Input kind (`permits`, `authorities`, `postcodes`,
        /// `road_network`, `property_links`)
        kind: InputKind,
        /// CSV file; permits also accept JSON events or a zip of them
        path: PathBuf,
    },
    /// Score a reporting period
    Score,
    /// Compute wellbeing costs for a reporting period
    Wellbeing,
    /// Score and then compute wellbeing costs
    Run,
    /// Show loaded inputs and list recent pipeline runs
    Runs {
        /// Number of runs to show
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), BoxError> {
    let multi = street_impact_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    let Some(command) = cli.command else {
        return interactive::run(&config, &multi);
    };

    if matches!(command, Commands::Config) {
        print!("{}", config.to_toml_string()?);
        println!();
        println!("# warehouse: {}", warehouse_path(&config).display());
        return Ok(());
    }

    let conn = open_warehouse(&config)?;

    match command {
        Commands::Ingest { kind, path } => {
            let result = pipeline::ingest(&conn, kind, &path, cli.period, &multi)?;
            print_import(&result);
        }
        Commands::Score => {
            let period = pipeline::resolve_period(&conn, cli.period)?;
            let outcome = pipeline::score(&conn, &config, period, &multi)?;
            print_score(period, &outcome);
        }
        Commands::Wellbeing => {
            let period = pipeline::resolve_period(&conn, cli.period)?;
            let run = pipeline::wellbeing(&conn, &config, period)?;
            print_wellbeing(period, &run);
        }
        Commands::Run => {
            let period = pipeline::resolve_period(&conn, cli.period)?;
            let outcome = pipeline::score(&conn, &config, period, &multi)?;
            print_score(period, &outcome);
            let run = pipeline::wellbeing(&conn, &config, period)?;
            print_wellbeing(period, &run);
        }
        Commands::Runs { limit } => print_runs(&conn, limit)?,
        Commands::Config => {}
    }

    Ok(())
}

/// Defaults, then the config file and environment, then flags.
fn resolve_config(cli: &Cli) -> Result<ImpactConfig, BoxError> {
    let mut config = ImpactConfig::load(cli.config.as_deref())?;

    if let Some(db) = &cli.db {
        config.warehouse.path = Some(db.clone());
    }
    if let Some(variant) = cli.variant {
        config.scoring.variant = variant;
    }
    if let Some(level) = cli.level {
        config.scoring.level = level;
    }
    if let Some(unit_cost) = cli.unit_cost {
        config.wellbeing.unit_cost = unit_cost;
    }
    if let Some(buffer_metres) = cli.buffer_metres {
        config.wellbeing.buffer_metres = buffer_metres;
    }
    if cli.no_archive {
        config.archive.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

fn warehouse_path(config: &ImpactConfig) -> PathBuf {
    config
        .warehouse
        .path
        .clone()
        .unwrap_or_else(paths::default_warehouse_path)
}

fn open_warehouse(config: &ImpactConfig) -> Result<Connection, BoxError> {
    let path = warehouse_path(config);
    log::info!("Using warehouse {}", path.display());
    Ok(street_impact_database::open(&path)?)
}

fn print_import(result: &ImportResult) {
    println!();
    println!("Ingested {}", result.kind);
    println!("  Read:     {}", result.records_read);
    println!("  Loaded:   {}", result.records_loaded);
    println!("  Skipped:  {}", result.records_skipped);
    println!("  Duration: {:.1}s", result.duration.as_secs_f64());
}

fn print_score(period: ReportingPeriod, outcome: &ScoreOutcome) {
    let summary = &outcome.summary;
    println!();
    println!("Scored {period}");
    println!("  Permits read:       {}", summary.permits_read);
    println!("  Out of scope:       {}", summary.permits_out_of_scope);
    println!("  Duplicates removed: {}", summary.duplicates_removed);
    println!("  Permits scored:     {}", summary.permits_scored);
    println!("  Entities:           {}", summary.entities);
    if !summary.authorities_without_metrics.is_empty() {
        println!(
            "  Unweighted authorities: {}",
            summary.authorities_without_metrics.join(", ")
        );
    }
    if let Some(key) = &outcome.snapshot_key {
        println!("  Archive snapshot:   {key}");
    }

    if !summary.category_counts.is_empty() {
        println!();
        println!("{:<24} ENTITIES", "CATEGORY");
        println!("{}", "-".repeat(34));
        for (category, count) in &summary.category_counts {
            println!("{category:<24} {count}");
        }
    }
}

fn print_wellbeing(period: ReportingPeriod, run: &WellbeingRun) {
    println!();
    println!("Wellbeing impacts for {period}");
    println!("  Permits costed: {}", run.impacts.len());
    println!("  Total cost:     £{:.2}", run.total_cost());

    if !run.excluded.is_empty() {
        println!();
        println!("{:<20} PERMITS", "EXCLUDED");
        println!("{}", "-".repeat(28));
        for (reason, count) in &run.excluded {
            println!("{:<20} {count}", reason.to_string());
        }
    }

    let by_sector = run.cost_by_sector();
    if !by_sector.is_empty() {
        println!();
        println!("{:<24} {:>14}", "PROMOTER SECTOR", "COST");
        println!("{}", "-".repeat(39));
        for (sector, cost) in &by_sector {
            println!("{sector:<24} {:>14}", format!("£{cost:.2}"));
        }
    }
}

fn print_status(conn: &Connection) -> Result<(), BoxError> {
    let status = pipeline::status(conn)?;

    println!("{:<16} {:>10}  SOURCE", "INPUT", "ROWS");
    println!("{}", "-".repeat(60));
    for input in &status.inputs {
        println!(
            "{:<16} {:>10}  {}",
            input.kind.to_string(),
            input.rows,
            input.source.as_deref().unwrap_or("-"),
        );
    }
    println!();
    println!(
        "Last scored period: {}",
        status.last_scored_period.as_deref().unwrap_or("-")
    );
    println!();

    Ok(())
}

fn print_runs(conn: &Connection, limit: usize) -> Result<(), BoxError> {
    print_status(conn)?;

    let runs = run_log::recent_runs(conn, limit)?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<10} {:<8} {:<19}  {:>8} {:>9}  STATUS",
        "RUN ID", "COMMAND", "PERIOD", "STARTED", "ROWS", "SECONDS"
    );
    println!("{}", "-".repeat(110));
    for run in &runs {
        println!(
            "{:<36}  {:<10} {:<8} {:<19}  {:>8} {:>9.1}  {}",
            run.run_id,
            run.command,
            run.period.as_deref().unwrap_or("-"),
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.rows_processed,
            run.duration_seconds,
            run.status,
        );
        if let Some(message) = &run.error_message {
            println!("    {message}");
        }
    }

    let snapshots = outputs::archive_snapshots(conn)?;
    if !snapshots.is_empty() {
        println!();
        println!("{:<10} ROWS", "SNAPSHOT");
        println!("{}", "-".repeat(20));
        for (key, rows) in &snapshots {
            println!("{key:<10} {rows}");
        }
    }

    Ok(())
}
