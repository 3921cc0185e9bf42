//! Conjunction Screening CLI
//!
//! Runs one screening cycle over a catalog and writes the JSON cycle report.
//!
//! Usage:
//!   conjunction-screen --catalog data/catalog.tle \
//!                      --config config/screening.json \
//!                      --output report.json

use anyhow::Result;
use clap::{Parser, ValueEnum};
use collision_avoidance::config::PropagationModel;
use collision_avoidance::{CollisionAssessment, ScreeningConfig};
use screening_cli::loader;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    TwoBody,
    TwoBodyJ2,
    Sgp4,
}

impl From<Backend> for PropagationModel {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::TwoBody => PropagationModel::TwoBody,
            Backend::TwoBodyJ2 => PropagationModel::TwoBodyJ2,
            Backend::Sgp4 => PropagationModel::Sgp4,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "conjunction-screen",
    about = "Screen a satellite catalog for conjunctions and plan avoidance maneuvers"
)]
struct Args {
    /// Catalog file: JSON element sets or TLE text
    #[arg(short, long)]
    catalog: PathBuf,

    /// Screening configuration JSON (defaults when omitted)
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Output JSON file (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the configured propagation backend
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Override the worker thread count (0 = all cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so the report can be piped from stdout
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{}", "=".repeat(60));
    info!("Conjunction Screening");
    info!("{}", "=".repeat(60));

    let mut config = match &args.config {
        Some(path) => ScreeningConfig::from_json_file(path)?,
        None => ScreeningConfig::default(),
    };
    if let Some(backend) = args.backend {
        config.propagation.model = backend.into();
    }
    if let Some(workers) = args.workers {
        config.execution.worker_threads = workers;
    }

    let assessment = CollisionAssessment::new(config)?;
    let catalog = loader::load_catalog(&args.catalog)?;
    let report = assessment.run_cycle(&catalog)?;

    match &args.output {
        Some(path) => {
            info!("Writing report to {:?}", path);
            let writer = BufWriter::new(File::create(path)?);
            serde_json::to_writer_pretty(writer, &report)?;
        }
        None => {
            let mut writer = BufWriter::new(io::stdout().lock());
            serde_json::to_writer_pretty(&mut writer, &report)?;
            writeln!(writer)?;
        }
    }

    info!("{}", "=".repeat(60));
    info!("SUMMARY");
    info!("{}", "=".repeat(60));
    info!("Backend: {}", report.propagator);
    info!("Satellites screened: {}", report.satellites_screened);
    info!("Conjunction events: {}", report.events.len());
    for event in &report.events {
        info!(
            "  {} x {} | TCA {} | {:.3} km | {:?}",
            event.primary_object,
            event.secondary_object,
            event.tca,
            event.miss_distance_km,
            event.risk_level()
        );
    }
    info!("Maneuver plans: {}", report.plans.len());
    for plan in &report.plans {
        info!(
            "  {} burns {:.3} m/s {:?} at {} → {:.3} km",
            plan.target_object,
            plan.delta_v_magnitude_m_s,
            plan.maneuver_type,
            plan.burn_epoch,
            plan.new_miss_distance_km
        );
    }
    if !report.maneuver_failures.is_empty() {
        warn!("Maneuver failures: {}", report.maneuver_failures.len());
    }
    if !report.warnings.is_empty() {
        warn!("Cycle warnings: {}", report.warnings.len());
    }
    if report.timed_out {
        warn!("Cycle stopped early; report is partial");
    }

    Ok(())
}
