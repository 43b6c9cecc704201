//! Environmental Risk Report CLI
//!
//! Scores observation records per location, or as one area, and writes the
//! context payloads.
//!
//! Usage:
//!   assess-risk --observations data/observations.json \
//!               --output risk_report.json --geojson
//!   assess-risk -i data/block_samples.json --area lower-manhattan

use anyhow::{Context, Result};
use clap::Parser;
use risk_engine::{EngineConfig, RiskEngine};
use risk_report::{build_area_report, build_point_report, load_observations, to_geojson};
use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "assess-risk",
    about = "Compute urban environmental risk reports from observation files"
)]
struct Args {
    /// Path to observations JSON file
    #[arg(short = 'i', long)]
    observations: PathBuf,

    /// Engine configuration (curves, weights, thresholds)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON file
    #[arg(short, long, default_value = "risk_report.json")]
    output: PathBuf,

    /// Assess all locations as sample points of one area with this id
    #[arg(long)]
    area: Option<String>,

    /// Also output GeoJSON
    #[arg(long)]
    geojson: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", "=".repeat(60));
    info!("Urban Environmental Risk Report");
    info!("{}", "=".repeat(60));

    let engine_config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading engine configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let engine = RiskEngine::new(engine_config)?;

    let input = load_observations(&args.observations)
        .with_context(|| format!("loading observations from {}", args.observations.display()))?;

    let report = match &args.area {
        Some(area_id) => build_area_report(&engine, area_id, input)?,
        None => build_point_report(&engine, input)?,
    };

    info!("\nWriting output to {:?}", args.output);
    let file = File::create(&args.output)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &report)?;

    if args.geojson {
        let geojson_path = args.output.with_extension("geojson");
        info!("Writing GeoJSON to {:?}", geojson_path);
        let geojson = to_geojson(&report);
        let file = File::create(&geojson_path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &geojson)?;
    }

    // Summary
    info!("\n{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    if let Some(area_id) = &report.area_id {
        info!("Area: {}", area_id);
        for payload in &report.payloads {
            info!(
                "  Overall risk {:.1} ({})",
                payload.ml_analysis.overall_risk_score,
                payload.ml_analysis.overall_level
            );
        }
    }
    for loc in &report.locations {
        info!(
            "  {:>9.4}, {:>9.4} | {:5.1} | {}",
            loc.coordinates.lat(),
            loc.coordinates.lng(),
            loc.overall_score,
            loc.overall_level
        );
    }
    info!("Locations assessed: {}", report.locations.len());
    info!("Locations skipped: {}", report.skipped_locations.len());
    info!("Records skipped: {}", report.skipped_records);

    Ok(())
}
