//! varnishconf: control-plane sidecar for a Varnish cache daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!   config.toml ──▶ config ──▶ HotReloadCoordinator ──▶ ReloadSequencer ──▶ AdminClient ──▶ varnishd
//!        ▲            │              ▲      │                                   │          admin socket
//!        │            ▼              │      ▼                                   ▼
//!     watcher      SIGHUP         startup  artifacts                      challenge auth,
//!                                          (rendered VCL)                 reconnect loop
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::SystemTime;

use clap::{Parser, Subcommand};

use varnishconf::admin::{AdminClient, Command};
use varnishconf::config::watcher::modified_at;
use varnishconf::config::{load_config_or_default, SidecarConfig, DEFAULT_CONFIG_PATH};
use varnishconf::lifecycle::{Sidecar, Signals};
use varnishconf::observability::logging::{init_logging, LogFormat};
use varnishconf::observability::metrics::init_metrics;
use varnishconf::reload::{reload_once, CopyArtifacts};

type BoxError = Box<dyn std::error::Error>;

#[derive(Parser)]
#[command(name = "varnishconf")]
#[command(about = "Keeps a Varnish daemon's VCL and parameters in line with a config file", long_about = None)]
struct Cli {
    /// Path of the TOML configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Run the sidecar until SIGTERM/SIGINT (default)
    Run,
    /// Print the resolved configuration as JSON
    Config,
    /// Reload the daemon once and exit
    Reload,
    /// Check that the admin socket answers
    Ping,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded_at = modified_at(&cli.config);
    let (config, found) = match load_config_or_default(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            let defaults = SidecarConfig::default().observability;
            init_logging(&defaults.log_filter, LogFormat::default());
            tracing::error!(path = %cli.config.display(), error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    init_logging(
        &config.observability.log_filter,
        config.observability.log_format,
    );
    if !found {
        tracing::warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&cli.config, &config, loaded_at).await,
        Commands::Config => print_config(&config),
        Commands::Reload => reload(&config).await,
        Commands::Ping => ping(&config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "varnishconf failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &Path, config: &SidecarConfig, loaded_at: Option<SystemTime>) -> Result<(), BoxError> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %path.display(),
        "varnishconf starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let signals = Signals::register()?;
    let sidecar = Sidecar::start(path, config, loaded_at)?;
    sidecar.run(signals).await;
    Ok(())
}

fn print_config(config: &SidecarConfig) -> Result<(), BoxError> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

async fn reload(config: &SidecarConfig) -> Result<(), BoxError> {
    let reload_config = config.reload_config()?;
    let report = reload_once(config.admin.client_config(), &reload_config, &CopyArtifacts).await?;

    tracing::info!(
        activated = report.activated.as_deref().unwrap_or("-"),
        discarded = report.discarded.len(),
        parameters = report.parameters_set,
        started = report.started,
        "Reload complete"
    );
    Ok(())
}

async fn ping(config: &SidecarConfig) -> Result<(), BoxError> {
    let client = AdminClient::connect(config.admin.client_config());
    let result = client.request(Command::ping()).await;
    client.close();

    println!("{}", result?.text());
    Ok(())
}
