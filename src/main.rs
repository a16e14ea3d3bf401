//! meter-ocr - read a meter photo once and print the readings

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use meter_ocr::{MeterConfig, MeterOcr};

/// meter-ocr - numeric readings from meter photos
#[derive(Parser, Debug)]
#[command(name = "meter-ocr")]
#[command(about = "Reads numeric values off a photo of a meter display")]
struct Args {
    /// Configuration file (JSON, or TOML with a .toml extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum number of readings to emit
    #[arg(short, long, default_value = "16")]
    max_reads: usize,

    /// Print readings as JSON lines
    #[arg(long)]
    json: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match args.config {
        Some(path) => path,
        None => default_config_path()?,
    };
    info!("Loading configuration from {:?}", config_path);

    let config = MeterConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration {:?}", config_path))?;
    let meter = MeterOcr::new(&config).context("Invalid meter configuration")?;

    if let Err(e) = meter.open() {
        warn!("{}", e);
    }

    let readings = meter.read(args.max_reads).context("Read cycle failed")?;
    if readings.is_empty() {
        warn!("No readings this cycle");
    }

    for reading in &readings {
        if args.json {
            println!("{}", serde_json::to_string(reading)?);
        } else {
            println!("{}\t{}\t{}", reading.time.to_rfc3339(), reading.identifier, reading.value);
        }
    }

    Ok(())
}

/// `meter.json` in the per-user configuration directory
fn default_config_path() -> Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("org", "meter-ocr", "meter-ocr")
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    Ok(proj_dirs.config_dir().join("meter.json"))
}
