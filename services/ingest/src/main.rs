//! Ingest Service - one run of the geospatial event pipeline
//!
//! Responsibilities:
//! - Discover and download the latest event export
//! - Load the region boundary dataset (HTTP or local file)
//! - Normalize, spatially filter and code-map the records
//! - Upsert facts and dimension tables into PostGIS in one transaction
//!
//! Usage:
//!   # Full run against the database in DB_URL:
//!   cargo run --bin ingest
//!
//!   # Process without writing anything:
//!   cargo run --bin ingest -- --dry-run
//!
//!   # Offline boundaries, parallel filter:
//!   cargo run --bin ingest -- --boundary-file data/counties.json --parallel

mod config;
mod store;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use collector::{
    http_client, FileBoundarySource, HttpBoundarySource, HttpFeedSource, ZipExtractor,
};
use pipeline::{
    BoundaryOptions, BoundarySource, CodeTables, IngestError, MemoryStore, RunOptions, RunSummary,
};
use tracing::{error, info};

use crate::config::Config;
use crate::store::PgStore;

#[derive(Parser, Debug)]
#[command(name = "ingest", about = "Ingests the latest geolocated event export")]
struct Args {
    /// Dry run - process everything but keep the output in memory
    #[arg(long, default_value = "false")]
    dry_run: bool,

    /// Read the boundary dataset from this file instead of BOUNDARY_URL
    #[arg(long)]
    boundary_file: Option<PathBuf>,

    /// Feature property holding the region id (default: the feature `id`)
    #[arg(long)]
    region_id_property: Option<String>,

    /// Run the spatial filter on all cores
    #[arg(long, default_value = "false")]
    parallel: bool,

    /// Code tables file (overrides CODE_TABLES_PATH)
    #[arg(long)]
    code_tables: Option<PathBuf>,
}

/// Process exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<IngestError>() {
        Some(IngestError::Retrieval(_)) => 2,
        Some(IngestError::Extraction(_)) => 3,
        Some(IngestError::MalformedFeed(_)) => 4,
        Some(IngestError::BoundaryParse(_)) => 5,
        Some(IngestError::Persistence(_)) => 6,
        Some(IngestError::Workspace(_)) => 7,
        None => 1,
    }
}

fn category(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<IngestError>()
        .map(IngestError::category)
        .unwrap_or("configuration")
}

async fn load_code_tables(path: &PathBuf) -> Result<CodeTables> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read code tables {}", path.display()))?;
    let tables = CodeTables::from_json(&content)
        .with_context(|| format!("Failed to parse code tables {}", path.display()))?;
    info!(
        path = %path.display(),
        version = %tables.version,
        root_codes = tables.event_root_codes.len(),
        countries = tables.country_fips_to_iso2.len(),
        "Code tables loaded"
    );
    Ok(tables)
}

async fn execute(args: Args, config: Config) -> Result<RunSummary> {
    let tables_path = args
        .code_tables
        .clone()
        .unwrap_or_else(|| config.code_tables_path.clone());
    let tables = load_code_tables(&tables_path).await?;

    let client = http_client(config.http_timeout).context("Failed to build HTTP client")?;
    let feed = HttpFeedSource::new(client.clone(), config.discovery_url.clone());
    let boundaries: Box<dyn BoundarySource> = match &args.boundary_file {
        Some(path) => Box::new(FileBoundarySource::new(path)),
        None => Box::new(HttpBoundarySource::new(client, config.boundary_url.clone())),
    };
    let extractor = ZipExtractor::new();

    let options = RunOptions {
        work_dir: config.work_dir.clone(),
        boundary: BoundaryOptions {
            region_id_property: args.region_id_property.clone(),
        },
        parallel: args.parallel,
    };

    let summary = if args.dry_run {
        info!("Dry run - output stays in memory");
        let mut store = MemoryStore::new();
        let summary = pipeline::run(
            &feed,
            boundaries.as_ref(),
            &extractor,
            &mut store,
            &tables,
            &options,
        )
        .await?;
        info!(
            facts = store.fact_count(),
            dimensions = store.dimension_count(),
            "Dry run - nothing written to the database"
        );
        summary
    } else {
        let db_url = config.require_db_url()?;
        let mut store = PgStore::connect(db_url, config.db_max_connections)
            .await
            .map_err(IngestError::from)?;
        pipeline::run(
            &feed,
            boundaries.as_ref(),
            &extractor,
            &mut store,
            &tables,
            &options,
        )
        .await?
    };

    Ok(summary)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if let Err(e) = telemetry::init_tracing(telemetry::DEFAULT_FILTER) {
        eprintln!("{:#}", e);
        return ExitCode::from(1);
    }

    let result = match Config::from_env() {
        Ok(config) => execute(args, config).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                retained = summary.retained,
                "=== Ingestion Complete ==="
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(category = category(&e), "Ingestion failed: {:#}", e);
            eprintln!("ingest failed [{}]: {:#}", category(&e), e);
            ExitCode::from(exit_code(&e))
        }
    }
}
