//! Build experiment Action Tables from a configuration file.
//!
//! Usage:
//! ```text
//! cockpit-timeline generate --config config/cockpit.toml --format json
//! cockpit-timeline fit --config config/cockpit.toml --at 2.5
//! cockpit-timeline default-config > cockpit.toml
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cockpit::config::CockpitConfig;
use cockpit::experiment::{StandardExposure, ZStackGenerator};

const DEFAULT_CONFIG: &str = "config/cockpit.toml";

/// Command line arguments for the timeline builder
#[derive(Parser, Debug)]
#[command(
    name = "cockpit-timeline",
    version,
    about = "Computes the timestamped action table of a Z-stack acquisition",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate the action table for one repetition
    Generate {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show the per-channel linear fit of the calibration table
    Fit {
        /// Configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,

        /// Positions to evaluate the calibration at
        #[arg(long, num_args = 1..)]
        at: Vec<f64>,
    },
    /// Print a starting configuration
    DefaultConfig,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn init_tracing(level: &str) {
    // RUST_LOG wins over the configured level. Logs go to stderr so that
    // stdout stays machine-readable.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> Result<CockpitConfig> {
    let config = CockpitConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    init_tracing(&config.logging.level);
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

fn generate(config: &CockpitConfig, format: OutputFormat) -> Result<()> {
    let calibration = config.load_calibration().with_context(|| {
        format!(
            "Failed to load calibration from {}",
            config.calibration.path.display()
        )
    })?;
    let params = config.params()?;

    let generator = ZStackGenerator::new(
        &calibration,
        &config.devices,
        &StandardExposure,
        config.targets.clone(),
    )
    .with_policy(config.policy.clone());
    let table = generator
        .generate(&params)
        .context("Failed to generate Z-stack timeline")?;

    match format {
        OutputFormat::Text => {
            print!("{table}");
            println!(
                "{} actions, {} targets, {} ms",
                table.len(),
                table.targets().len(),
                table.duration()
            );
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&table)?);
        }
    }
    Ok(())
}

fn fit(config: &CockpitConfig, positions: &[f64]) -> Result<()> {
    let calibration = config.load_calibration().with_context(|| {
        format!(
            "Failed to load calibration from {}",
            config.calibration.path.display()
        )
    })?;

    println!(
        "{} samples, {} channels",
        calibration.samples().len(),
        calibration.channels()
    );
    for (channel, line) in calibration.fit().iter().enumerate() {
        println!("channel {:>3}: {}", channel + 1, line);
    }
    for &position in positions {
        let source = if calibration.is_calibrated(position) {
            "sample"
        } else {
            "fit"
        };
        println!("{position} -> {:?} ({source})", calibration.lookup(position));
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Generate { config, format } => {
            let config = load_config(&config)?;
            generate(&config, format)
        }
        Command::Fit { config, at } => {
            let config = load_config(&config)?;
            fit(&config, &at)
        }
        Command::DefaultConfig => {
            print!("{}", CockpitConfig::default().to_toml()?);
            Ok(())
        }
    }
}
