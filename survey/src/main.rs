//! ICEFLOE SURVEY: EM sea ice thickness processing for drifting floes.
//!
//! Converts raw EM induction readings into ice plus snow thickness and geo-references them either with
//! drift-corrected global coordinates or in a coordinate frame fixed to the floe.
//!
//! Parameters can be given on the command line, in a configuration file (TOML/JSON/YAML) passed with
//! `--config`, or both; command line flags take precedence.

mod common;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use common::{init_logger, prepare_output_file, validate_input_file};
use icefloe::calibration::CalibrationCurve;
use icefloe::config::SurveyConfig;
use icefloe::drift::{DriftModel, estimate_drift};
use icefloe::frame::{ReferenceFrame, ReferencePoint};
use icefloe::pipeline::ThicknessPipeline;
use icefloe::{Track, records};
use log::{error, info};
use std::path::{Path, PathBuf};

const LONG_ABOUT: &str = "ICEFLOE SURVEY: EM sea ice thickness processing for drifting floes.

The sensor output is converted to ice plus snow thickness with a log-linear calibration curve fitted
to readings taken at known heights. Positions are then corrected for the drift of the floe:

- thickness: drift-corrected global coordinates. The strategy follows the number of auxiliary GPS
  trackers given: none (uniform drift between two samples at the same spot), one (translation) or
  two (translation and rotation).

- local: coordinates in a frame fixed to the floe, defined by a tracked zero point (origin) and a
  tracked unit point (x axis).

- drift: drift estimates between consecutive fixes of a GPS track.

Survey files are CSV with columns lat,lon,time,data; GPS tracks and reference batches use
lat,lon,time; calibration tables use height,value,ice_thickness.";

/// Command line arguments
#[derive(Parser)]
#[command(
    author,
    version,
    about = "EM sea ice thickness processing for drifting floes.",
    long_about = LONG_ABOUT
)]
struct Cli {
    /// Configuration file (TOML/JSON/YAML); command line flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace) [default: info]
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

/// Top-level commands
#[derive(Subcommand, Clone, Debug)]
enum Command {
    #[command(
        name = "thickness",
        about = "Calibrate readings and correct their positions for floe drift"
    )]
    Thickness(ThicknessArgs),
    #[command(
        name = "local",
        about = "Calibrate readings and express their positions in the floe-local frame"
    )]
    Local(LocalArgs),
    #[command(
        name = "drift",
        about = "Estimate drift between consecutive fixes of a GPS track"
    )]
    Drift(DriftArgs),
    #[command(name = "config", about = "Generate a template configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Survey input/output and calibration arguments
#[derive(Args, Clone, Debug)]
struct SurveyArgs {
    /// Survey CSV (lat,lon,time,data)
    #[arg(short, long, value_parser)]
    input: PathBuf,

    /// Output measurement CSV
    #[arg(short, long, value_parser)]
    output: PathBuf,

    /// Calibration CSV (height,value,ice_thickness)
    #[arg(long)]
    calibration: Option<PathBuf>,

    /// Sensor height above the snow surface during the survey
    #[arg(long)]
    mounting_height: Option<f64>,
}

#[derive(Args, Clone, Debug)]
struct ThicknessArgs {
    #[command(flatten)]
    survey: SurveyArgs,

    /// Auxiliary GPS tracker CSV; repeat for a second tracker
    #[arg(long = "tracker")]
    trackers: Vec<PathBuf>,

    /// Uniform drift: index of the first sample at the reference spot
    #[arg(long)]
    start_index: Option<usize>,

    /// Uniform drift: index of the second sample at the reference spot
    #[arg(long)]
    end_index: Option<usize>,

    /// Tracker resampling interval in seconds
    #[arg(long)]
    frequency: Option<f64>,

    /// Epoch of zero drift for tracker corrections (RFC 3339 or 'YYYY-MM-DD HH:MM:SS')
    #[arg(long)]
    reference_time: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct LocalArgs {
    #[command(flatten)]
    survey: SurveyArgs,

    /// Zero point reference CSV (lat,lon,time)
    #[arg(long)]
    zero: Option<PathBuf>,

    /// Unit point reference CSV (lat,lon,time)
    #[arg(long)]
    unit: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
struct DriftArgs {
    /// GPS track CSV (lat,lon,time)
    #[arg(short, long, value_parser)]
    input: PathBuf,

    /// Output drift estimate CSV
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output file path for the config file
    /// File extension determines format: .json, .yaml/.yml, or .toml
    #[arg(short, long, value_parser)]
    output: PathBuf,
}

impl SurveyArgs {
    fn apply(&self, config: &mut SurveyConfig) {
        if let Some(path) = &self.calibration {
            config.calibration = Some(path.clone());
        }
        if let Some(height) = self.mounting_height {
            config.mounting_height = height;
        }
    }
}
impl ThicknessArgs {
    fn apply(&self, config: &mut SurveyConfig) -> Result<()> {
        self.survey.apply(config);
        if !self.trackers.is_empty() {
            config.trackers = self.trackers.clone();
        }
        if self.start_index.is_some() {
            config.drift.start_index = self.start_index;
        }
        if self.end_index.is_some() {
            config.drift.end_index = self.end_index;
        }
        if let Some(frequency) = self.frequency {
            config.drift.frequency_s = frequency;
        }
        if let Some(time) = &self.reference_time {
            config.drift.reference_time = Some(
                records::parse_time(time)
                    .with_context(|| format!("invalid --reference-time '{}'", time))?,
            );
        }
        Ok(())
    }
}
impl LocalArgs {
    fn apply(&self, config: &mut SurveyConfig) {
        self.survey.apply(config);
        if let Some(path) = &self.zero {
            config.frame.zero = Some(path.clone());
        }
        if let Some(path) = &self.unit {
            config.frame.unit = Some(path.clone());
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<SurveyConfig> {
    match path {
        Some(path) => SurveyConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(SurveyConfig::default()),
    }
}

fn build_pipeline(config: &SurveyConfig) -> Result<ThicknessPipeline> {
    let path = config
        .calibration
        .as_ref()
        .context("no calibration table given (use --calibration or the config file)")?;
    let points = records::read_calibration(path)
        .with_context(|| format!("reading calibration table {}", path.display()))?;
    let curve = CalibrationCurve::fit(&points)
        .with_context(|| format!("fitting calibration curve from {}", path.display()))?;
    info!(
        "Calibration: slope {:.4}, intercept {:.4}, mean ice thickness {:.3}",
        curve.slope, curve.intercept, curve.mean_ice_thickness
    );
    Ok(ThicknessPipeline::new(curve, config.mounting_height))
}

fn read_readings(input: &Path) -> Result<Vec<icefloe::SurveyReading>> {
    validate_input_file(input)?;
    let readings = records::read_readings(input)
        .with_context(|| format!("reading survey data from {}", input.display()))?;
    info!("Read {} readings from {}", readings.len(), input.display());
    Ok(readings)
}

fn run_thickness(args: &ThicknessArgs, mut config: SurveyConfig) -> Result<()> {
    args.apply(&mut config)?;
    let pipeline = build_pipeline(&config)?;
    let readings = read_readings(&args.survey.input)?;
    let trackers = config
        .trackers
        .iter()
        .map(|path| {
            records::read_track(path)
                .with_context(|| format!("reading tracker {}", path.display()))
        })
        .collect::<Result<Vec<Track>>>()?;
    let model = DriftModel::select(trackers, &config.drift);
    info!("Using {} drift correction", model.name());
    let measurements = pipeline.run_with_drift(&readings, &model)?;

    prepare_output_file(&args.survey.output)?;
    records::write_measurements(&args.survey.output, &measurements)
        .with_context(|| format!("writing {}", args.survey.output.display()))?;
    info!(
        "Wrote {} measurements to {}",
        measurements.len(),
        args.survey.output.display()
    );
    Ok(())
}

fn load_reference_frame(config: &SurveyConfig) -> Result<ReferenceFrame> {
    let mut frame = ReferenceFrame::new();
    for (point, path) in [
        (ReferencePoint::Zero, &config.frame.zero),
        (ReferencePoint::Unit, &config.frame.unit),
    ] {
        let path = path
            .as_ref()
            .with_context(|| format!("no {} point reference file given", point))?;
        let batch = records::read_reference(path)
            .with_context(|| format!("reading {} point reference {}", point, path.display()))?;
        let len = frame
            .extend(point, &batch)
            .with_context(|| format!("invalid {} point reference {}", point, path.display()))?;
        info!("Loaded {} {} point fixes", len, point);
    }
    Ok(frame)
}

fn run_local(args: &LocalArgs, mut config: SurveyConfig) -> Result<()> {
    args.apply(&mut config);
    let pipeline = build_pipeline(&config)?;
    let frame = load_reference_frame(&config)?;
    let readings = read_readings(&args.survey.input)?;
    let measurements = pipeline.run_with_frame(&readings, &frame)?;

    prepare_output_file(&args.survey.output)?;
    records::write_measurements(&args.survey.output, &measurements)
        .with_context(|| format!("writing {}", args.survey.output.display()))?;
    info!(
        "Wrote {} floe-local measurements to {}",
        measurements.len(),
        args.survey.output.display()
    );
    Ok(())
}

fn run_drift(args: &DriftArgs) -> Result<()> {
    validate_input_file(&args.input)?;
    let track = records::read_track(&args.input)
        .with_context(|| format!("reading track {}", args.input.display()))?;
    let estimates = estimate_drift(&track)?;
    let total: f64 = estimates.iter().map(|e| e.distance_m).sum();
    let elapsed: f64 = estimates.iter().map(|e| e.elapsed_s).sum();
    info!(
        "Track drifted {:.1} m over {:.0} s ({} fixes)",
        total,
        elapsed,
        track.len()
    );
    prepare_output_file(&args.output)?;
    records::write_drift_estimates(&args.output, &estimates)
        .with_context(|| format!("writing {}", args.output.display()))?;
    Ok(())
}

fn template_config() -> SurveyConfig {
    let mut config = SurveyConfig {
        calibration: Some(PathBuf::from("calibration.csv")),
        ..SurveyConfig::default()
    };
    config.frame.zero = Some(PathBuf::from("zero.csv"));
    config.frame.unit = Some(PathBuf::from("unit.csv"));
    config
}

fn create_config_file(args: &CreateConfigArgs) -> Result<()> {
    prepare_output_file(&args.output)?;
    template_config()
        .to_file(&args.output)
        .with_context(|| format!("writing configuration {}", args.output.display()))?;
    info!("Wrote template configuration to {}", args.output.display());
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // CLI flags take precedence over the config file
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let config_log_file = config.logging.file.as_ref().map(PathBuf::from);
    let log_file = cli.log_file.as_ref().or(config_log_file.as_ref());
    init_logger(&log_level, log_file)?;

    let result = match &cli.command {
        Command::Thickness(args) => run_thickness(args, config),
        Command::Local(args) => run_local(args, config),
        Command::Drift(args) => run_drift(args),
        Command::CreateConfig(args) => create_config_file(args),
    };
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}
