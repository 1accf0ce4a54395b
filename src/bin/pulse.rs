//! Pulse CLI - Command-line interface for Synheart Pulse
//!
//! Commands:
//! - decode: Decode one Heart Rate Measurement packet
//! - replay: Replay a recorded packet log through a workout
//! - validate: Validate a recorded packet log
//! - config: Print the effective engine configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use synheart_pulse::replay::{
    parse_ndjson, recording_span, replay, replay_now, validate_records, ReplayRecord,
};
use synheart_pulse::{PacketDecoder, PulseConfig, PulseError, PRODUCER_NAME, PULSE_VERSION};

/// Pulse - Live heart-rate telemetry and workout session engine
#[derive(Parser)]
#[command(name = "pulse")]
#[command(author = "Synheart AI Inc")]
#[command(version = PULSE_VERSION)]
#[command(about = "Decode heart rate packets and replay workouts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode one Heart Rate Measurement packet
    Decode {
        /// Packet bytes as hex (e.g. "164a0004")
        #[arg(long)]
        hex: String,

        /// Device ID recorded on the sample
        #[arg(long, default_value = "cli")]
        device_id: String,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Replay a recorded packet log (NDJSON) through a workout
    Replay {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Replay start instant (RFC 3339); defaults to now
        #[arg(long)]
        origin: Option<DateTime<Utc>>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Validate a recorded packet log
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective engine configuration
    Config {
        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Derive the assumed maximum heart rate from age (220 - age)
        #[arg(long)]
        age: Option<u16>,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), PulseCliError> {
    match cli.command {
        Commands::Decode {
            hex,
            device_id,
            output_format,
        } => cmd_decode(&hex, &device_id, output_format),

        Commands::Replay {
            input,
            config,
            origin,
            output_format,
        } => cmd_replay(&input, config.as_deref(), origin, output_format),

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Config { config, age } => cmd_config(config.as_deref(), age),
    }
}

fn cmd_decode(hex_input: &str, device_id: &str, format: OutputFormat) -> Result<(), PulseCliError> {
    let bytes = hex::decode(hex_input.trim()).map_err(|e| PulseCliError::Hex(e.to_string()))?;
    let sample = PacketDecoder::decode(&bytes, device_id, None, Utc::now()).map_err(PulseError::from)?;

    println!("{}", to_json(&sample, &format)?);
    Ok(())
}

fn cmd_replay(
    input: &Path,
    config: Option<&Path>,
    origin: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> Result<(), PulseCliError> {
    let records = read_records(input)?;
    if records.is_empty() {
        return Err(PulseCliError::NoRecords);
    }
    let config = load_config(config)?;

    log::info!(
        "replaying {} records spanning {:?}",
        records.len(),
        recording_span(&records)
    );
    let report = match origin {
        Some(origin) => replay(&records, config, origin)?,
        None => replay_now(&records, config)?,
    };

    println!("{}", to_json(&report, &format)?);
    Ok(())
}

fn cmd_validate(input: &Path, json: bool) -> Result<(), PulseCliError> {
    let records = read_records(input)?;
    let result = validate_records(&records);

    let report = ValidationReport {
        total_records: records.len(),
        packets: records
            .iter()
            .filter(|r| matches!(r, ReplayRecord::Packet { .. }))
            .count(),
        valid: result.is_ok(),
        error: result.as_ref().err().map(|e| e.to_string()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Records: {}", report.total_records);
        println!("Packets: {}", report.packets);
        match &report.error {
            None => println!("Status:  OK"),
            Some(e) => println!("Status:  INVALID ({e})"),
        }
    }

    result.map_err(PulseCliError::from)
}

fn cmd_config(config: Option<&Path>, age: Option<u16>) -> Result<(), PulseCliError> {
    let mut config = load_config(config)?;
    if let Some(age) = age {
        config.assumed_max_heart_rate = PulseConfig::with_age(age).assumed_max_heart_rate;
        config.validate()?;
    }

    let report = ConfigReport {
        producer: PRODUCER_NAME.to_string(),
        version: PULSE_VERSION.to_string(),
        config,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn read_input(input: &Path) -> Result<String, PulseCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn read_records(input: &Path) -> Result<Vec<ReplayRecord>, PulseCliError> {
    Ok(parse_ndjson(&read_input(input)?)?)
}

fn load_config(path: Option<&Path>) -> Result<PulseConfig, PulseCliError> {
    match path {
        Some(path) => Ok(PulseConfig::from_json(&fs::read_to_string(path)?)?),
        None => Ok(PulseConfig::default()),
    }
}

fn to_json<T: serde::Serialize>(value: &T, format: &OutputFormat) -> Result<String, PulseCliError> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
    })
}

// Error types

#[derive(Debug)]
enum PulseCliError {
    Io(io::Error),
    Pulse(PulseError),
    Json(serde_json::Error),
    Hex(String),
    NoRecords,
}

impl From<io::Error> for PulseCliError {
    fn from(e: io::Error) -> Self {
        PulseCliError::Io(e)
    }
}

impl From<PulseError> for PulseCliError {
    fn from(e: PulseError) -> Self {
        PulseCliError::Pulse(e)
    }
}

impl From<serde_json::Error> for PulseCliError {
    fn from(e: serde_json::Error) -> Self {
        PulseCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<PulseCliError> for CliError {
    fn from(e: PulseCliError) -> Self {
        match e {
            PulseCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            PulseCliError::Pulse(e) => {
                let (code, hint) = match &e {
                    PulseError::Decode(_) => ("DECODE_ERROR", "Check the packet flags and length"),
                    PulseError::Config(_) => ("CONFIG_ERROR", "Run 'pulse config' to see the defaults"),
                    PulseError::Replay(_) => ("REPLAY_ERROR", "Run 'pulse validate' for details"),
                    PulseError::InvalidTransition { .. } | PulseError::NoDevices => (
                        "WORKOUT_ERROR",
                        "Check the order of connect/start/pause/resume/end records",
                    ),
                    PulseError::UnknownDevice(_) => {
                        ("UNKNOWN_DEVICE", "Add a connect record before the device's packets")
                    }
                    PulseError::Json(_) => ("JSON_ERROR", "Check JSON syntax"),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            PulseCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            PulseCliError::Hex(msg) => CliError {
                code: "HEX_ERROR".to_string(),
                message: msg,
                hint: Some("Pass the packet as an even number of hex digits".to_string()),
            },
            PulseCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_records: usize,
    packets: usize,
    valid: bool,
    error: Option<String>,
}

#[derive(serde::Serialize)]
struct ConfigReport {
    producer: String,
    version: String,
    config: PulseConfig,
}
