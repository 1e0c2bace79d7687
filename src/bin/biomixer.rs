//! BioMixer CLI - Command-line interface for the BioMixer engine
//!
//! Commands:
//! - resample: Turn a Fitbit intraday response into a uniform series
//! - score: Compute a comfort score with either formula
//! - phase: Show the pattern-selection state for a completed-event count
//! - metrics: Compute awakening slope/stddev locally
//! - doctor: Diagnose configuration and stored state

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use biomixer::analysis::LinearTrendCalculator;
use biomixer::features::Summarizer;
use biomixer::store::MemoryEventStore;
use biomixer::telemetry::parse_intraday;
use biomixer::types::{AwakeningShape, SeriesSummary};
use biomixer::{
    ComfortFormula, ComfortScorer, EngineConfig, EngineError, FetchError, PatternPolicy,
    PolicyState, Resampler, StoreError, BIOMIXER_VERSION, PRODUCER_NAME,
};

/// BioMixer - Adaptive wake-up alarm engine
#[derive(Parser)]
#[command(name = "biomixer")]
#[command(author = "Synheart AI Inc")]
#[command(version = BIOMIXER_VERSION)]
#[command(about = "Heart-rate driven alarm pattern selection and comfort scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resample a Fitbit intraday heart-rate response
    Resample {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Grid step in seconds
        #[arg(long, default_value = "5")]
        step: f64,

        /// Pretty-print the output
        #[arg(long)]
        pretty: bool,
    },

    /// Compute a comfort score
    Score {
        /// Awakening slope (bpm/s)
        #[arg(long)]
        slope: f64,

        /// Post-wake standard deviation (bpm)
        #[arg(long)]
        stddev: f64,

        /// Post-wake intensity (required by the processing formula)
        #[arg(long)]
        intensity: Option<f64>,

        /// Mood rating 1-5 (neutral when omitted)
        #[arg(long)]
        mood: Option<u8>,

        /// Formula to apply
        #[arg(long, value_enum, default_value = "processing")]
        formula: FormulaArg,
    },

    /// Show the pattern-selection state for a completed-event count
    Phase {
        /// Number of completed (scored) events
        completed: usize,

        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Compute awakening metrics from a JSON array of post-wake values
    Metrics {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Diagnose configuration and stored state
    Doctor {
        /// Engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Event store snapshot to check
        #[arg(long)]
        events: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum FormulaArg {
    /// 50/25/25 objective blend, 70/30 with mood
    Processing,
    /// 40/30/30 slope, stability and mood
    Evaluation,
}

impl From<FormulaArg> for ComfortFormula {
    fn from(arg: FormulaArg) -> Self {
        match arg {
            FormulaArg::Processing => ComfortFormula::Processing,
            FormulaArg::Evaluation => ComfortFormula::Evaluation,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), BioMixerCliError> {
    match cli.command {
        Commands::Resample {
            input,
            step,
            pretty,
        } => cmd_resample(&input, step, pretty),

        Commands::Score {
            slope,
            stddev,
            intensity,
            mood,
            formula,
        } => cmd_score(slope, stddev, intensity, mood, formula.into()),

        Commands::Phase { completed, config } => cmd_phase(completed, config.as_deref()),

        Commands::Metrics { input } => cmd_metrics(&input),

        Commands::Doctor {
            config,
            events,
            json,
        } => cmd_doctor(config.as_deref(), events.as_deref(), json),
    }
}

fn read_input(input: &Path) -> Result<String, BioMixerCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, BioMixerCliError> {
    let config = match path {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::default(),
    };
    Ok(config.apply_env())
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), BioMixerCliError> {
    let out = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{}", out);
    Ok(())
}

fn cmd_resample(input: &Path, step: f64, pretty: bool) -> Result<(), BioMixerCliError> {
    let raw = read_input(input)?;
    let samples = parse_intraday(&raw)?;
    let series = Resampler::resample(&samples, step);

    if series.is_empty() {
        return Err(BioMixerCliError::NoData);
    }

    let output = ResampleOutput {
        step_seconds: series.step_seconds,
        data_points: series.len(),
        summary: Summarizer::summarize(series.values()),
        shape: Summarizer::awakening_shape(series.values()),
        values: series.values().to_vec(),
    };
    print_json(&output, pretty)
}

fn cmd_score(
    slope: f64,
    stddev: f64,
    intensity: Option<f64>,
    mood: Option<u8>,
    formula: ComfortFormula,
) -> Result<(), BioMixerCliError> {
    if let Some(mood) = mood {
        if !(1..=5).contains(&mood) {
            return Err(BioMixerCliError::Engine(EngineError::InvalidRating(format!(
                "mood rating must be between 1 and 5, got {mood}"
            ))));
        }
    }

    let comfort_score = match formula {
        ComfortFormula::Processing => {
            let intensity = intensity.ok_or(BioMixerCliError::MissingIntensity)?;
            ComfortScorer::processing_score(slope, stddev, intensity, mood)
        }
        ComfortFormula::Evaluation => {
            ComfortScorer::evaluation_score(Some(slope), Some(stddev), mood)
        }
    };

    print_json(
        &ScoreOutput {
            formula,
            comfort_score,
        },
        false,
    )
}

fn cmd_phase(completed: usize, config: Option<&Path>) -> Result<(), BioMixerCliError> {
    let config = load_config(config)?;
    let policy = PatternPolicy::new(&config.policy);
    let selection = policy.rotation_selection(completed);

    print_json(
        &PhaseOutput {
            completed,
            state: policy.state_for(completed),
            pattern: selection.as_ref().map(|s| s.pattern.to_string()),
            confidence: selection.as_ref().map(|s| s.confidence),
            min_history: policy.min_history(),
        },
        true,
    )
}

fn cmd_metrics(input: &Path) -> Result<(), BioMixerCliError> {
    let raw = read_input(input)?;
    let values: Vec<f64> = serde_json::from_str(&raw)?;
    let metrics = LinearTrendCalculator::compute(&values)?;

    print_json(
        &MetricsOutput {
            awakening_hr_slope: metrics.slope,
            awakening_hr_stddev: metrics.stddev,
            data_points: values.len(),
        },
        false,
    )
}

fn cmd_doctor(
    config: Option<&Path>,
    events: Option<&Path>,
    json: bool,
) -> Result<(), BioMixerCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "biomixer_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("BioMixer version {}", BIOMIXER_VERSION),
    });

    match load_config(config) {
        Ok(engine_config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: match config {
                    Some(path) => format!("Configuration valid ({})", path.display()),
                    None => "Using default configuration".to_string(),
                },
            });

            checks.push(if engine_config.endpoints.client_id.is_empty() {
                DoctorCheck {
                    name: "oauth_client".to_string(),
                    status: CheckStatus::Warning,
                    message: "OAuth client id not set; expired tokens cannot be refreshed"
                        .to_string(),
                }
            } else {
                DoctorCheck {
                    name: "oauth_client".to_string(),
                    status: CheckStatus::Ok,
                    message: "OAuth client id configured".to_string(),
                }
            });

            checks.push(DoctorCheck {
                name: "analysis_service".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "Analysis service at {}",
                    engine_config.endpoints.analysis_base_url
                ),
            });
        }
        Err(e) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: CliError::from(e).message,
            });
        }
    }

    if let Some(events_path) = events {
        if events_path.exists() {
            let check = match fs::read_to_string(events_path) {
                Ok(content) => match MemoryEventStore::from_json(&content) {
                    Ok(store) => DoctorCheck {
                        name: "events".to_string(),
                        status: CheckStatus::Ok,
                        message: format!("Event snapshot valid ({} events)", store.len()),
                    },
                    Err(e) => DoctorCheck {
                        name: "events".to_string(),
                        status: CheckStatus::Error,
                        message: format!("Invalid event snapshot: {}", e),
                    },
                },
                Err(e) => DoctorCheck {
                    name: "events".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read event snapshot: {}", e),
                },
            };
            checks.push(check);
        } else {
            checks.push(DoctorCheck {
                name: "events".to_string(),
                status: CheckStatus::Warning,
                message: "Event snapshot does not exist".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass input files with --input)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: BIOMIXER_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("BioMixer Doctor Report");
        println!("======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(BioMixerCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error types

#[derive(Debug)]
enum BioMixerCliError {
    Io(io::Error),
    Engine(EngineError),
    Fetch(FetchError),
    Store(StoreError),
    Json(serde_json::Error),
    NoData,
    MissingIntensity,
    DoctorFailed,
}

impl From<io::Error> for BioMixerCliError {
    fn from(e: io::Error) -> Self {
        BioMixerCliError::Io(e)
    }
}

impl From<EngineError> for BioMixerCliError {
    fn from(e: EngineError) -> Self {
        BioMixerCliError::Engine(e)
    }
}

impl From<FetchError> for BioMixerCliError {
    fn from(e: FetchError) -> Self {
        BioMixerCliError::Fetch(e)
    }
}

impl From<StoreError> for BioMixerCliError {
    fn from(e: StoreError) -> Self {
        BioMixerCliError::Store(e)
    }
}

impl From<serde_json::Error> for BioMixerCliError {
    fn from(e: serde_json::Error) -> Self {
        BioMixerCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<BioMixerCliError> for CliError {
    fn from(e: BioMixerCliError) -> Self {
        match e {
            BioMixerCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            BioMixerCliError::Engine(EngineError::Config(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'biomixer doctor --config <file>' for details".to_string()),
            },
            BioMixerCliError::Engine(EngineError::MetricsUnavailable(msg)) => CliError {
                code: "METRICS_UNAVAILABLE".to_string(),
                message: msg,
                hint: Some("Provide at least 60 post-wake values".to_string()),
            },
            BioMixerCliError::Engine(e) => CliError {
                code: "ENGINE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            BioMixerCliError::Fetch(e) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(
                    "Ensure input is a Fitbit activities-heart-intraday response".to_string(),
                ),
            },
            BioMixerCliError::Store(e) => CliError {
                code: "STORE_ERROR".to_string(),
                message: e.to_string(),
                hint: None,
            },
            BioMixerCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            BioMixerCliError::NoData => CliError {
                code: "NO_DATA".to_string(),
                message: "No heart-rate samples found in input".to_string(),
                hint: Some("Ensure the response covers the requested window".to_string()),
            },
            BioMixerCliError::MissingIntensity => CliError {
                code: "MISSING_ARGUMENT".to_string(),
                message: "The processing formula needs --intensity".to_string(),
                hint: Some("Pass --intensity or use --formula evaluation".to_string()),
            },
            BioMixerCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Output types

#[derive(Serialize)]
struct ResampleOutput {
    step_seconds: f64,
    data_points: usize,
    summary: SeriesSummary,
    shape: Option<AwakeningShape>,
    values: Vec<f64>,
}

#[derive(Serialize)]
struct ScoreOutput {
    formula: ComfortFormula,
    comfort_score: f64,
}

#[derive(Serialize)]
struct PhaseOutput {
    completed: usize,
    state: PolicyState,
    pattern: Option<String>,
    confidence: Option<f64>,
    min_history: usize,
}

#[derive(Serialize)]
struct MetricsOutput {
    awakening_hr_slope: f64,
    awakening_hr_stddev: f64,
    data_points: usize,
}

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
