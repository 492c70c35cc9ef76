//! kscrape CLI - print a time-bounded slice of a Kafka topic.

use anyhow::Result;
use clap::Parser;
use kscrape_core::config::LogFormat;
use kscrape_core::{Config, Error as CoreError, KafkaError};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution, including stopping at the match count
    Success = 0,
    /// Configuration error (invalid config file, time string or filter)
    ConfigError = 1,
    /// Requested topic does not exist
    TopicNotFound = 2,
    /// Broker unreachable or metadata request timed out
    BrokerUnavailable = 3,
    /// Broker failure while scanning
    PollError = 4,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Convert an error to an exit code by inspecting the core error kind.
    fn from_error(error: &anyhow::Error) -> Self {
        match error.downcast_ref::<CoreError>() {
            Some(CoreError::Config(_)) => ExitCode::ConfigError,
            Some(CoreError::Kafka(KafkaError::TopicNotFound { .. })) => ExitCode::TopicNotFound,
            Some(CoreError::Kafka(KafkaError::BrokerUnavailable { .. })) => {
                ExitCode::BrokerUnavailable
            }
            Some(CoreError::Kafka(_)) => ExitCode::PollError,
            Some(CoreError::Io(_)) => ExitCode::RuntimeError,
            None if error.downcast_ref::<toml::de::Error>().is_some() => ExitCode::ConfigError,
            None => ExitCode::RuntimeError,
        }
    }
}

mod commands;

#[derive(Parser)]
#[command(name = "kscrape")]
#[command(about = "Print the records of a Kafka topic within a time window", long_about = None)]
#[command(version)]
struct Cli {
    /// Bootstrap servers (comma separated)
    #[arg(short, long)]
    bootstrap: Option<String>,

    /// Topic to scrape
    #[arg(short, long)]
    topic: Option<String>,

    /// Start time in ISO-8601 or relative like "-10s", "-1 m" or "5 h ago" (default: one minute ago)
    #[arg(short, long, allow_hyphen_values = true)]
    start: Option<String>,

    /// End time in ISO-8601 or relative like "-10s", "-1 m" or "5 h ago" (default: one minute from now)
    #[arg(short, long, allow_hyphen_values = true)]
    end: Option<String>,

    /// Regular expression a whole key or value must match
    #[arg(short, long)]
    filter: Option<String>,

    /// Print a dot every n records without a match
    #[arg(short, long)]
    progress: Option<u64>,

    /// Stop after this many matching records
    #[arg(short, long)]
    count: Option<u64>,

    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log format comes from the config file when one is readable
    let log_format = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring.log_format)
        .unwrap_or(LogFormat::Text);

    init_logging(log_format, cli.verbose);

    match execute(cli).await {
        Ok(code) => code,
        Err(e) => {
            // Usage mistakes get the message only, broker failures are logged too
            let usage = e
                .downcast_ref::<CoreError>()
                .is_some_and(CoreError::is_usage_error);
            if !usage {
                tracing::error!(error = %e, "Scrape failed");
            }
            eprintln!("Error: {e}");

            ExitCode::from_error(&e)
        }
    }
}

/// Initialize logging on stderr, stdout carries the scraped records.
fn init_logging(log_format: LogFormat, verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }
}

/// Merge CLI flags over the config file and run the scrape.
async fn execute(cli: Cli) -> Result<ExitCode> {
    let mut config = load_config(&cli.config)?;

    if let Some(servers) = cli.bootstrap {
        config.kafka.bootstrap_servers = servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
    }
    if let Some(topic) = cli.topic {
        config.scrape.topic = topic;
    }
    if cli.start.is_some() {
        config.scrape.start = cli.start;
    }
    if cli.end.is_some() {
        config.scrape.end = cli.end;
    }
    if cli.filter.is_some() {
        config.scrape.filter = cli.filter;
    }
    if let Some(progress) = cli.progress {
        config.scrape.progress = progress;
    }
    if cli.count.is_some() {
        config.scrape.count = cli.count;
    }

    commands::scrape::run(config).await
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Ok(Config::from_file(path)?),
        None => Ok(Config::default()),
    }
}
