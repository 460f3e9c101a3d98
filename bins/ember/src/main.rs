//! ember: batch driver for the PM2.5 health burden pipeline.
//!
//! Imports raw datasets into RocksDB, recomputes the excess burden and
//! decomposition tables, switches the canonical attribution method, and
//! validates or exports the committed output.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ember_core::types::Method;
use ember_engine::{run_attribution, run_decomposition, switch_canonical, validate, LookupIndex};
use ember_model::GemmModel;
use ember_store::export::{export_decomposition, export_excess};
use ember_store::import::import_file;
use ember_store::{Dataset, LogFormat, PipelineConfig, RocksStore};
use tracing::{error, info};

/// Fire and non-fire PM2.5 health burden attribution.
#[derive(Parser, Debug)]
#[command(name = "ember", version, about = "PM2.5 health burden attribution and decomposition")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace one raw dataset from a JSON lines file.
    Import {
        /// pollution, population, baseline, bootstrap-bins or precomputed-bins
        dataset: Dataset,
        file: PathBuf,
    },
    /// Recompute the excess burden table.
    Attribute {
        /// Make this method canonical once the table is committed
        #[arg(long)]
        canonical: Option<Method>,
    },
    /// Recompute the decomposition table.
    Decompose {
        #[arg(long)]
        start_year: Option<u16>,
        #[arg(long)]
        end_year: Option<u16>,
    },
    /// Attribute, then decompose.
    Run {
        #[arg(long)]
        canonical: Option<Method>,
    },
    /// Select the method backing the legacy excess burden fields.
    SwitchMethod { method: Method },
    /// Check committed tables; exits non-zero on problems.
    Validate,
    /// Write an output table as JSON lines.
    Export {
        table: ExportTable,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ExportTable {
    Excess,
    Decomposition,
}

fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(1);
        }
    };
    init_logging(&config.log_level, config.log_format);

    match execute(cli.command, &config) {
        Ok(true) => {}
        Ok(false) => process::exit(2),
        Err(e) => {
            error!("{e:#}");
            process::exit(1);
        }
    }
}

/// Layer CLI flags over the file and environment configuration.
fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }
    Ok(config)
}

fn open_store(config: &PipelineConfig) -> Result<RocksStore> {
    fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("failed to create data directory: {}", config.data_dir.display()))?;
    let path = config.db_path();
    info!(path = %path.display(), "opening database");
    RocksStore::open(&path).with_context(|| format!("failed to open database: {}", path.display()))
}

fn build_index(store: &RocksStore, config: &PipelineConfig) -> Result<LookupIndex> {
    LookupIndex::build(store, &config.baseline).context("failed to build lookup index")
}

/// Run one command. `Ok(false)` means it completed but found problems.
fn execute(command: Command, config: &PipelineConfig) -> Result<bool> {
    let mut store = open_store(config)?;
    let model = GemmModel::new();

    match command {
        Command::Import { dataset, file } => {
            let manifest = import_file(&mut store, dataset, &file, config.batch_size)
                .with_context(|| format!("failed to import {dataset} from {}", file.display()))?;
            println!("imported {} rows into {dataset}", manifest.rows);
        }
        Command::Attribute { canonical } => {
            let index = build_index(&store, config)?;
            attribute(&index, &model, &mut store, config, canonical)?;
        }
        Command::Decompose { start_year, end_year } => {
            let start = start_year.unwrap_or(config.start_year);
            let end = end_year.unwrap_or(config.end_year);
            if start >= end {
                bail!("start year {start} must precede end year {end}");
            }
            let index = build_index(&store, config)?;
            decompose(&index, &model, &mut store, config, start, end)?;
        }
        Command::Run { canonical } => {
            let index = build_index(&store, config)?;
            attribute(&index, &model, &mut store, config, canonical)?;
            decompose(&index, &model, &mut store, config, config.start_year, config.end_year)?;
        }
        Command::SwitchMethod { method } => {
            let previous = switch_canonical(&mut store, method).context("failed to switch method")?;
            println!("canonical method: {previous} -> {method}");
        }
        Command::Validate => {
            let report = validate(&store).context("validation failed to run")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to render report")?
            );
            return Ok(report.is_clean());
        }
        Command::Export { table, output } => {
            let rows = match &output {
                Some(path) => export_to(&store, table, create_output(path)?)?,
                None => export_to(&store, table, BufWriter::new(io::stdout().lock()))?,
            };
            info!(?table, rows, "exported table");
        }
    }
    Ok(true)
}

fn attribute(
    index: &LookupIndex,
    model: &GemmModel,
    store: &mut RocksStore,
    config: &PipelineConfig,
    canonical: Option<Method>,
) -> Result<()> {
    let report = run_attribution(index, model, store, config.batch_size, canonical)
        .context("attribution stage failed")?;
    println!(
        "excess burden: {} rows from {} county-years ({} skipped)",
        report.manifest.rows,
        report.stats.county_years,
        report.stats.skipped()
    );
    Ok(())
}

fn decompose(
    index: &LookupIndex,
    model: &GemmModel,
    store: &mut RocksStore,
    config: &PipelineConfig,
    start: u16,
    end: u16,
) -> Result<()> {
    let report = run_decomposition(index, model, store, config.batch_size, start, end)
        .context("decomposition stage failed")?;
    println!(
        "decomposition {start}-{end}: {} rows from {} counties ({} skipped)",
        report.manifest.rows,
        report.stats.counties,
        report.stats.skipped()
    );
    Ok(())
}

fn create_output(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn export_to<W: Write>(store: &RocksStore, table: ExportTable, writer: W) -> Result<u64> {
    let rows = match table {
        ExportTable::Excess => export_excess(store, writer),
        ExportTable::Decomposition => export_decomposition(store, writer),
    };
    rows.context("export failed")
}

/// Initialize the tracing subscriber. `RUST_LOG` overrides `level_str`.
fn init_logging(level_str: &str, format: LogFormat) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(io::stderr))
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .with_writer(io::stderr),
            )
            .init(),
    }
}
