//! dbhad — the DBHA daemon.
//!
//! One binary, two roles:
//! - `detector`: probes its share of the inventory and ships reports
//! - `controller`: runs the dedup → re-verify → admission → execution
//!   pipeline behind the report listener
//!
//! # Usage
//!
//! ```text
//! dbhad --mode detector --config /etc/dbha/detector.yaml
//! dbhad --mode controller --config /etc/dbha/controller.yaml
//! ```

mod controller_mode;
mod detector_mode;
mod services;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use dbha_core::config::{LogConfig, LogFormat};
use dbha_core::{Config, RunMode};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,dbhad=debug,dbha=debug";

#[derive(Parser)]
#[command(name = "dbhad", about = "DBHA detector and controller daemon")]
struct Cli {
    /// Role of this process.
    #[arg(long, value_enum)]
    mode: Mode,

    /// YAML configuration file.
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Detector,
    Controller,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Detector => RunMode::Detector,
            Mode::Controller => RunMode::Controller,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config
        .validate(cli.mode.into())
        .with_context(|| format!("validating {}", cli.config.display()))?;

    init_tracing(&config.log)?;

    match cli.mode {
        Mode::Detector => detector_mode::run_detector(config).await,
        Mode::Controller => controller_mode::run_controller(config).await,
    }
}

/// `RUST_LOG` wins over `log.level`, which wins over the default filter.
fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(log.level.as_deref().unwrap_or(DEFAULT_FILTER))
            .context("parsing log.level")?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match log.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mode_and_config() {
        let cli = Cli::try_parse_from([
            "dbhad",
            "--mode",
            "controller",
            "--config",
            "/etc/dbha/controller.yaml",
        ])
        .unwrap();
        assert_eq!(cli.mode, Mode::Controller);
        assert_eq!(RunMode::from(cli.mode), RunMode::Controller);
        assert_eq!(cli.config, PathBuf::from("/etc/dbha/controller.yaml"));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["dbhad", "--mode", "proxy", "--config", "x.yaml"]).is_err());
    }

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }
}
