use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{info, warn};
use outlier_recovery::export::flatten_results;
use outlier_recovery::{AdaptiveBoundsAlgorithm, FilterConfig, ObservationRow, OutlierFilter, RowIndex};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON array of observations: bare numbers or {"index": .., "values": [..]}
    #[arg(short, long)]
    input: PathBuf,

    /// JSON filter configuration (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the flattened results (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InputRecord {
    Value(f64),
    Row(ObservationRow),
}

fn load_observations(path: &Path) -> Result<Vec<ObservationRow>> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read input {}", path.display()))?;
    let records: Vec<InputRecord> =
        serde_json::from_str(&text).with_context(|| format!("Failed to parse input {}", path.display()))?;
    Ok(records
        .into_iter()
        .enumerate()
        .map(|(i, record)| match record {
            InputRecord::Value(v) => ObservationRow::scalar(RowIndex::Sequence(i as i64), v),
            InputRecord::Row(row) => row,
        })
        .collect())
}

fn main() -> Result<()> {
    env_logger::builder()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => FilterConfig::load(path)?,
        None => FilterConfig::default(),
    };
    info!("[Main] Control parameters: {:?}", config.control);

    let observations = load_observations(&args.input)?;
    if observations.is_empty() {
        bail!("No observations in {}", args.input.display());
    }

    let n_calibration = ((observations.len() as f64 * config.calibration_fraction).ceil() as usize)
        .clamp(1, observations.len());
    let calibration: Vec<f64> = observations[..n_calibration]
        .iter()
        .filter_map(|row| row.values.first().copied())
        .filter(|v| v.is_finite())
        .collect();
    if calibration.len() < 4 {
        warn!("[Main] Only {} calibration samples, fit will be poor", calibration.len());
    }

    let mut filter = OutlierFilter::new(
        AdaptiveBoundsAlgorithm::new(config.bound_check),
        config.signal.signal_model()?,
        config.uncertainty.uncertainty_model()?,
        config.control,
    );
    filter
        .calibrate_models(&calibration)
        .context("Model calibration failed")?;

    filter.add_observations(observations);
    filter.update_filter().context("Filtering failed")?;

    let status = filter.status();
    info!(
        "[Main] Filtered {} rows: {} outliers flagged, {} recoveries",
        status.position, status.outliers_flagged, status.recoveries
    );

    let json = serde_json::to_string_pretty(&flatten_results(filter.results()))?;
    match &args.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("[Main] Results written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
