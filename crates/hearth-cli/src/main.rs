//! Command-line interface for the Hearth home controller.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use hearth_core::{env_vars, HearthConfig};
use hearth_devices::{format_value, Controller, DriverBackend, RelayState, SimulatedBackend};

/// Hearth - relays, sensors and music from one small controller.
#[derive(Parser, Debug)]
#[command(name = "hearth")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Action to perform.
    #[command(subcommand)]
    command: Command,

    /// Configuration file (defaults to $HEARTH_CONFIG, then config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use simulated GPIO lines and sensor chips.
    #[arg(long, global = true)]
    simulate: bool,

    /// Verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Start sensor polling and the HTTP API.
    Serve {
        /// Host to bind to (overrides server.host).
        #[arg(long)]
        host: Option<String>,
        /// Port to bind to (overrides server.port).
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Build every configured device and exit.
    Check,
    /// Run one poll cycle and print the readings.
    Poll {
        /// Print readings as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Switch or query a relay.
    Relay {
        /// Relay name.
        name: String,
        /// What to do with it.
        #[arg(value_enum)]
        action: RelayAction,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RelayAction {
    On,
    Off,
    Toggle,
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose)?;

    let path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(env_vars::config_path()));
    let config = HearthConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    let backend = select_backend(args.simulate)?;
    tracing::info!(backend = backend.name(), config = %path.display(), "Bootstrapping controller");
    let controller =
        Controller::bootstrap(&config, backend.as_ref()).context("Device bootstrap failed")?;

    match args.command {
        Command::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.server.host.clone());
            let port = port.unwrap_or(config.server.port);
            run_server(controller, &host, port).await
        }
        Command::Check => run_check(&controller),
        Command::Poll { json } => run_poll(&controller, json).await,
        Command::Relay { name, action } => run_relay(&controller, &name, action).await,
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(format!("{},hyper=warn", level)))?;

    if env_vars::log_json() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
    Ok(())
}

fn select_backend(simulate: bool) -> Result<Box<dyn DriverBackend>> {
    if simulate {
        return Ok(Box::new(SimulatedBackend::new()));
    }

    #[cfg(feature = "hardware")]
    {
        Ok(Box::new(hearth_devices::LinuxBackend))
    }

    #[cfg(not(feature = "hardware"))]
    {
        anyhow::bail!("this build has no hardware backend; rerun with --simulate")
    }
}

async fn run_server(controller: Controller, host: &str, port: u16) -> Result<()> {
    let bind: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", host, port))?;
    hearth_api::run(bind, Arc::new(controller)).await
}

fn run_check(controller: &Controller) -> Result<()> {
    let status = controller.status();
    println!(
        "Configuration OK: {} relays, {} sensors",
        status.relays, status.sensors
    );
    for device in controller.registry().devices() {
        println!("  {:<16} {}", device.name(), device.device_type().as_str());
    }
    Ok(())
}

async fn run_poll(controller: &Controller, json: bool) -> Result<()> {
    let report = controller.poll_once().await;

    let mut readings = Vec::new();
    for sensor in controller.sensor_names() {
        readings.extend(controller.sensor_values(sensor)?);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&readings)?);
    } else {
        for view in &readings {
            let value = match (view.value, &view.error) {
                (Some(v), None) => format_value(v),
                (Some(v), Some(e)) => format!("{} (stale: {})", format_value(v), e),
                (None, Some(e)) => format!("N/A ({})", e),
                (None, None) => "N/A".to_string(),
            };
            println!("{}.{} = {}", view.sensor, view.capability, value);
        }
    }

    tracing::info!(
        ok = report.succeeded,
        failed = report.failed,
        "Poll cycle complete"
    );
    Ok(())
}

async fn run_relay(controller: &Controller, name: &str, action: RelayAction) -> Result<()> {
    let state = match action {
        RelayAction::On => controller.set_relay(name, RelayState::On).await?.state,
        RelayAction::Off => controller.set_relay(name, RelayState::Off).await?.state,
        RelayAction::Toggle => controller.toggle_relay(name).await?.state,
        RelayAction::State => controller.relay_state(name).await?,
    };
    println!("{}: {}", name, state);
    Ok(())
}
