//! K2S CLI - Kafka to store product synchronization tool.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use k2s_core::config::LogFormat;
use k2s_core::Config;
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
    /// Successful execution
    Success = 0,
    /// Configuration error (unreadable file, invalid values)
    ConfigError = 1,
    /// Kafka-related error (connection, consumer, producer)
    KafkaError = 2,
    /// Entity store error (HTTP transport, status)
    StoreError = 3,
    /// Payload could not be encoded or decoded
    PayloadError = 4,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code, preferring the typed core error.
    fn from_error(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(core) = cause.downcast_ref::<k2s_core::Error>() {
                return match core {
                    k2s_core::Error::Config(_) => ExitCode::ConfigError,
                    k2s_core::Error::Kafka(_) => ExitCode::KafkaError,
                    k2s_core::Error::Store(_) => ExitCode::StoreError,
                    k2s_core::Error::Decode(_) | k2s_core::Error::Serialization(_) => {
                        ExitCode::PayloadError
                    }
                    _ => ExitCode::RuntimeError,
                };
            }
        }
        ExitCode::RuntimeError
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "k2s")]
#[command(about = "Kafka to store product synchronization CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file (defaults apply if it does not exist)
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: PathBuf,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Connection settings that override the configuration file.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Kafka bootstrap servers (comma separated)
    #[arg(long, env = "K2S_BOOTSTRAP_SERVERS")]
    pub bootstrap_servers: Option<String>,

    /// Kafka topic
    #[arg(long, env = "K2S_TOPIC")]
    pub topic: Option<String>,

    /// Kafka consumer group
    #[arg(long, env = "K2S_CONSUMER_GROUP")]
    pub consumer_group: Option<String>,

    /// Store base URL, e.g. http://localhost:8082/api
    #[arg(long, env = "K2S_STORE_URL")]
    pub store_url: Option<String>,

    /// Store Basic auth username
    #[arg(long, env = "K2S_STORE_USERNAME")]
    pub store_username: Option<String>,

    /// Store Basic auth password
    #[arg(long, env = "K2S_STORE_PASSWORD", hide_env_values = true)]
    pub store_password: Option<String>,
}

impl Overrides {
    /// Apply every set override onto `config`.
    pub fn apply(self, config: &mut Config) {
        if let Some(servers) = self.bootstrap_servers {
            config.kafka.bootstrap_servers = servers
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(topic) = self.topic {
            config.kafka.topic = topic;
        }
        if let Some(group) = self.consumer_group {
            config.kafka.consumer_group = group;
        }
        if let Some(url) = self.store_url {
            config.store.base_url = url;
        }
        if let Some(username) = self.store_username {
            config.store.username = username;
        }
        if let Some(password) = self.store_password {
            config.store.password = password;
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Consume product events and reconcile them against the store
    Sync {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Publish products to the topic
    Publish {
        #[command(flatten)]
        overrides: Overrides,

        /// Product document to publish, e.g. '{"id":7,"name":"Hat","price":9.99,"imgUrl":"x"}'
        #[arg(long, conflicts_with = "file")]
        json: Option<String>,

        /// File holding one product document or an array of them
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Show status and health of a running sync
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL
        #[arg(long, default_value = "http://localhost:9090")]
        metrics_url: String,
    },

    /// Validate configuration
    Validate {
        #[command(flatten)]
        overrides: Overrides,
    },
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log settings come from the config file when it parses, defaults otherwise
    let monitoring = std::fs::read_to_string(&cli.config)
        .ok()
        .and_then(|content| Config::from_toml(&content).ok())
        .map(|config| config.monitoring)
        .unwrap_or_default();

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(monitoring.log_level.as_filter()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match monitoring.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Sync { overrides } => {
            let config = load_config(&cli.config, overrides)?;
            commands::sync::run(config).await?;
        }

        Commands::Publish {
            overrides,
            json,
            file,
        } => {
            let config = load_config(&cli.config, overrides)?;
            commands::publish::run(config, json, file).await?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, &metrics_url).await?;
        }

        Commands::Validate { overrides } => {
            let config = load_config(&cli.config, overrides)?;
            config.validate()?;
            println!("Configuration is valid");
        }
    }

    Ok(())
}

/// Load the configuration file, falling back to local-development defaults
/// when it does not exist, then apply overrides.
fn load_config(path: &PathBuf, overrides: Overrides) -> Result<Config> {
    let mut config = if path.exists() {
        Config::from_file(path)?
    } else {
        tracing::info!(path = %path.display(), "Config file not found, using defaults");
        Config::default()
    };
    overrides.apply(&mut config);
    Ok(config)
}
