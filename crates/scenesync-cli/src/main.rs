//! SceneSync CLI
//!
//! Drives one sync session from the terminal against the TCP engine.
//!
//! ## Usage
//!
//! ```bash
//! # Serve as master on the configured port (default 8080)
//! scenesync master --port 9000
//!
//! # Connect to a master as slave
//! scenesync slave --host 192.168.1.20 --port 9000
//!
//! # Print the effective configuration
//! scenesync --config scenesync.json config
//!
//! # Also write JSONL logs under ./logs/raw/
//! scenesync -vv --log-dir ./logs master
//! ```
//!
//! Once running, type `help` for the interactive commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scenesync_core::logging::JsonlLayer;
use scenesync_core::{
    AlertFilterView, CoordinatorConfig, DesyncAlert, NetworkRole, RawDesyncAlert, SessionEvent,
    SeverityFilter, SortOrder, SyncSession, SyncTarget, TcpBackend,
};
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;

/// SceneSync - LAN master/slave scene synchronization
#[derive(Parser)]
#[command(name = "scenesync")]
#[command(version = "0.1.0")]
#[command(about = "SceneSync - LAN master/slave scene synchronization")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Configuration file (default: <config dir>/scenesync/config.json if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSONL logs to <DIR>/raw/
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve as master and accept slave connections
    Master {
        /// Port to listen on (default from config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Connect to a master as slave
    Slave {
        /// Master host (default from config)
        #[arg(long)]
        host: Option<String>,
        /// Master port (default from config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the effective configuration as JSON
    Config,
}

/// One line of interactive input
#[derive(Debug, Clone, PartialEq, Eq)]
enum Input {
    Status,
    Start(Option<u16>),
    Stop,
    Connect(Option<String>, Option<u16>),
    Disconnect,
    Reset,
    Toggle(SyncTarget),
    Retry,
    Targets,
    Alerts(SeverityFilter, SortOrder),
    Clear(String),
    ClearAll,
    Inject(String, String),
    Help,
    Quit,
}

const HELP: &str = "\
Commands:
  status                                  Show role, connection and targets
  start [port]                            Start the master server
  stop                                    Stop the master server
  connect [host] [port]                   Connect to a master
  disconnect                              Disconnect from the master
  reset                                   Tear down and clear the role
  toggle <source|preview|program>         Toggle a sync target
  retry                                   Re-send the sync targets
  targets                                 Show sync targets
  alerts [all|warning|error] [newest|oldest]
                                          List desync alerts
  clear <id>                              Clear one alert
  clear-all                               Clear all alerts
  inject <severity> <message>             Publish a desync alert locally
  help                                    Show this help
  quit                                    Shut down and exit";

fn parse_port(s: &str) -> Result<u16> {
    s.parse::<u16>()
        .map_err(|_| anyhow::anyhow!("Invalid port '{}'", s))
}

fn parse_input(line: &str) -> Result<Option<Input>> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let args: Vec<&str> = words.collect();

    let input = match command.to_lowercase().as_str() {
        "status" => Input::Status,
        "start" => Input::Start(args.first().map(|p| parse_port(p)).transpose()?),
        "stop" => Input::Stop,
        "connect" => Input::Connect(
            args.first().map(|h| h.to_string()),
            args.get(1).map(|p| parse_port(p)).transpose()?,
        ),
        "disconnect" => Input::Disconnect,
        "reset" => Input::Reset,
        "toggle" => {
            let target = args
                .first()
                .context("Usage: toggle <source|preview|program>")?;
            Input::Toggle(target.parse::<SyncTarget>()?)
        }
        "retry" => Input::Retry,
        "targets" => Input::Targets,
        "alerts" => {
            let filter = args
                .first()
                .map(|f| f.parse::<SeverityFilter>())
                .transpose()?
                .unwrap_or_default();
            let order = args
                .get(1)
                .map(|o| o.parse::<SortOrder>())
                .transpose()?
                .unwrap_or_default();
            Input::Alerts(filter, order)
        }
        "clear" => Input::Clear(args.first().context("Usage: clear <id>")?.to_string()),
        "clear-all" => Input::ClearAll,
        "inject" => {
            let (severity, message) = args
                .split_first()
                .filter(|(_, message)| !message.is_empty())
                .context("Usage: inject <severity> <message>")?;
            Input::Inject(severity.to_string(), message.join(" "))
        }
        "help" | "?" => Input::Help,
        "quit" | "exit" => Input::Quit,
        other => anyhow::bail!("Unknown command '{}'. Type 'help' for commands.", other),
    };
    Ok(Some(input))
}

fn setup_logging(verbosity: u8, log_dir: Option<&Path>, instance: &str) -> Result<()> {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let jsonl = log_dir
        .map(|dir| JsonlLayer::new(dir, instance))
        .transpose()
        .context("Failed to open log file")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(jsonl)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    Ok(())
}

/// Default config location (<config dir>/scenesync/config.json)
fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("scenesync").join("config.json"))
}

fn load_config(path: Option<&Path>) -> Result<CoordinatorConfig> {
    match path {
        Some(path) => CoordinatorConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => CoordinatorConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => Ok(CoordinatorConfig::default()),
        },
    }
}

fn format_alert(alert: &DesyncAlert) -> String {
    let mut line = format!("[{}] {} {}", alert.severity, alert.id, alert.message);
    if let Some(scene) = &alert.scene_name {
        line.push_str(&format!(" (scene: {})", scene));
    }
    if let Some(source) = &alert.source_name {
        line.push_str(&format!(" (source: {})", source));
    }
    line
}

fn describe_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::RoleSelected { role } => format!("Role selected: {}", role),
        SessionEvent::RoleCleared => "Role cleared".to_string(),
        SessionEvent::StatusChanged { role, status } => format!("{} status: {}", role, status),
        SessionEvent::LifecycleFailed { op, message, .. } => {
            format!("Failed to {}: {}", op, message)
        }
        SessionEvent::AlertReceived(alert) => format!("Alert {}", format_alert(alert)),
        SessionEvent::AlertsCleared { removed } => format!("Cleared {} alert(s)", removed),
        SessionEvent::TargetsChanged { targets, status } => {
            format!("Targets: {} ({})", targets, status)
        }
    }
}

fn print_status(session: &SyncSession) {
    let snapshot = session.snapshot();
    match snapshot.role {
        Some(role) => println!("Role:    {}", role),
        None => println!("Role:    (none)"),
    }
    println!("Status:  {}", snapshot.status);
    println!("Targets: {} ({})", snapshot.targets, snapshot.target_status);
    println!(
        "Alerts:  {} total, {} warning(s), {} error(s), {} other",
        snapshot.alerts.total,
        snapshot.alerts.warnings,
        snapshot.alerts.errors,
        snapshot.alerts.unrecognized
    );
}

/// Run one interactive command
async fn handle_input(
    input: Input,
    session: &SyncSession,
    backend: &TcpBackend,
    launch_role: NetworkRole,
) -> Result<()> {
    let config = session.config();
    match input {
        Input::Status => print_status(session),
        Input::Start(port) => {
            ensure_role(session, launch_role)?;
            session
                .start_as_master(port.unwrap_or(config.master_port))
                .await?;
        }
        Input::Stop => session.stop_as_master().await?,
        Input::Connect(host, port) => {
            ensure_role(session, launch_role)?;
            let host = host.unwrap_or_else(|| config.master_host.clone());
            session
                .connect_as_slave(&host, port.unwrap_or(config.master_port))
                .await?;
        }
        Input::Disconnect => session.disconnect_as_slave().await?,
        Input::Reset => session.reset().await,
        Input::Toggle(target) => {
            session.toggle_target(target).await?;
        }
        Input::Retry => {
            session.retry_targets().await?;
        }
        Input::Targets => {
            let targets = session.targets();
            println!("Targets: {} ({})", targets.targets(), targets.status());
        }
        Input::Alerts(filter, order) => {
            let alerts = session.alert_view(&AlertFilterView::new(filter, order));
            if alerts.is_empty() {
                println!("No alerts ({})", filter);
            }
            for alert in alerts {
                println!("{}", format_alert(&alert));
            }
        }
        Input::Clear(id) => {
            if !session.clear_alert(&id) {
                println!("No alert with id {}", id);
            }
        }
        Input::ClearAll => {
            session.clear_all_alerts();
        }
        Input::Inject(severity, message) => {
            backend.report_desync(RawDesyncAlert::new(severity, message));
        }
        Input::Help => println!("{}", HELP),
        Input::Quit => {}
    }
    Ok(())
}

/// Re-select the launch role after a reset
fn ensure_role(session: &SyncSession, role: NetworkRole) -> Result<()> {
    if session.role().is_none() {
        session.select_role(role)?;
    }
    Ok(())
}

async fn run_interactive(
    session: &SyncSession,
    backend: &TcpBackend,
    role: NetworkRole,
    mut events: broadcast::Receiver<SessionEvent>,
) -> Result<()> {
    println!("Type 'help' for commands. Press Ctrl+C to stop.");
    println!();

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => match parse_input(&text) {
                        Ok(Some(Input::Quit)) => break,
                        Ok(Some(input)) => {
                            if let Err(e) = handle_input(input, session, backend, role).await {
                                debug!(error = %e, "Interactive command failed");
                                eprintln!("Error: {:#}", e);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => eprintln!("Error: {}", e),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin, ending session");
                        eprintln!("Read error: {}", e);
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => println!("* {}", describe_event(&event)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        println!("* ({} events skipped)", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                println!();
                println!("Received shutdown signal...");
                break;
            }
        }
    }

    // Report whatever the last command produced before shutting down
    while let Ok(event) = events.try_recv() {
        println!("* {}", describe_event(&event));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let instance = match &cli.command {
        Commands::Master { .. } => NetworkRole::Master.as_str(),
        Commands::Slave { .. } => NetworkRole::Slave.as_str(),
        Commands::Config => "session",
    };
    setup_logging(cli.verbose, cli.log_dir.as_deref(), instance)?;

    let mut config = load_config(cli.config.as_deref())?;

    let role = match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Master { port } => {
            if let Some(port) = port {
                config.master_port = port;
            }
            NetworkRole::Master
        }
        Commands::Slave { host, port } => {
            if let Some(host) = host {
                config.master_host = host;
            }
            if let Some(port) = port {
                config.master_port = port;
            }
            NetworkRole::Slave
        }
    };

    let backend = Arc::new(TcpBackend::new());
    let session = SyncSession::new(backend.clone(), config.clone())?;
    let events = session.subscribe();
    session.select_role(role)?;

    println!("SceneSync v0.1.0 ({})", role);
    let launched = match role {
        NetworkRole::Master => session.start_as_master(config.master_port).await,
        NetworkRole::Slave => {
            session
                .connect_as_slave(&config.master_host, config.master_port)
                .await
        }
    };
    match launched {
        Ok(()) => println!("Status: {}", session.status()),
        Err(e) => {
            warn!(%role, error = %e, "Initial lifecycle command failed");
            eprintln!("Error: {}", e);
        }
    }

    run_interactive(&session, &backend, role, events).await?;

    println!("Shutting down...");
    info!(%role, "Shutting down session");
    session.shutdown().await;
    Ok(())
}
