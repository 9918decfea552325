//! CLI entry point for sensor-logger
//!
//! # Usage
//!
//! Run the logger until Ctrl-C:
//! ```bash
//! sensor-logger run --config config/default.toml
//! ```
//!
//! Print the resolved configuration:
//! ```bash
//! sensor-logger check-config
//! ```
//!
//! Check how a device line is parsed:
//! ```bash
//! sensor-logger parse-line "Temperature: 21.5"
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensor_logger::config::{LoggerConfig, DEFAULT_CONFIG_PATH};
use sensor_logger::error::LoggerResult;
use sensor_logger::hardware::{device_from_config, parse_line, LineKind};
use sensor_logger::logging;
use sensor_logger::pipeline::{JsonLinesSink, Pipeline, ReadingSink};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "sensor-logger")]
#[command(about = "Weather-station sensor logger", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the device and deliver readings until interrupted
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Load, validate and print the resolved configuration
    CheckConfig {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Show how a single device line is classified
    ParseLine {
        /// Raw line, e.g. "Humidity: 40.0"
        line: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::CheckConfig { config } => check_config(config),
        Commands::ParseLine { line } => {
            print_line_kind(&line);
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> Result<LoggerConfig> {
    let config = LoggerConfig::load_from(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn run(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    info!(
        name = %config.application.name,
        device = %config.device.path.display(),
        "Starting sensor logger"
    );

    let device = device_from_config(&config.device)?;
    let output = config.output.path.clone();
    let pipeline = Pipeline::spawn(&config, device, |_| -> LoggerResult<Box<dyn ReadingSink>> {
        let sink: Box<dyn ReadingSink> = match &output {
            Some(path) => Box::new(JsonLinesSink::append_to(path)?),
            None => Box::new(JsonLinesSink::new(std::io::stdout())),
        };
        Ok(sink)
    })?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Interrupt received");

    let summary = pipeline.shutdown().await;
    info!(summary = %serde_json::to_string(&summary)?, "Final statistics");
    Ok(())
}

fn check_config(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    print!("{}", config.to_toml()?);
    Ok(())
}

fn print_line_kind(line: &str) {
    match parse_line(line) {
        LineKind::Blank => println!("blank (ignored, not counted)"),
        LineKind::Damaged => println!("damaged (counted, no value)"),
        LineKind::Reading { name, value } => println!("reading: name={:?} value={}", name, value),
    }
}
