use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wavelink::engine::{ProtocolEngine, SidecarEngine};
use wavelink::{Config, Daemon};

/// Wavelink - WhatsApp bridge for AI agents
#[derive(Parser)]
#[command(name = "wavelink", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the bridge service
    Start {
        /// Path to config file
        #[arg(short, long, env = "WAVELINK_CONFIG", default_value = "wavelink.toml")]
        config: PathBuf,
    },
    /// Check the bridge connection status
    Status {
        /// Bridge HTTP address
        #[arg(long, default_value = "http://localhost:8555")]
        addr: String,
    },
    /// Send a text message through a running bridge
    Send {
        /// Recipient (phone number or JID)
        to: String,
        /// Message text
        message: String,
        /// Bridge HTTP address
        #[arg(long, default_value = "http://localhost:8555")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,wavelink=info",
        1 => "info,wavelink=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let result = match cli.command {
        Command::Start { config } => run_start(&config).await,
        Command::Status { addr } => run_status(&addr).await,
        Command::Send { to, message, addr } => run_send(&addr, &to, &message).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Start the bridge: config, engine daemon, then the daemon loop
async fn run_start(config_path: &std::path::Path) -> anyhow::Result<()> {
    let config = Config::load(config_path).context("load config")?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.port,
        data_dir = %config.data_dir.display(),
        "starting wavelink"
    );

    let (engine, events) = SidecarEngine::connect(&config.engine.url, &config.engine.auth_dir)
        .await
        .context("connect to engine daemon")?;
    let engine: Arc<dyn ProtocolEngine> = engine;

    Daemon::new(config)
        .run(engine, events)
        .await
        .context("run bridge")
}

/// Query a running bridge's status endpoint
async fn run_status(addr: &str) -> anyhow::Result<()> {
    let body = reqwest::get(format!("{addr}/status"))
        .await
        .with_context(|| format!("failed to reach bridge at {addr}"))?
        .text()
        .await?;
    println!("{body}");
    Ok(())
}

/// Send a text message via a running bridge's HTTP API
async fn run_send(addr: &str, to: &str, message: &str) -> anyhow::Result<()> {
    let body = reqwest::Client::new()
        .post(format!("{addr}/send/text"))
        .json(&serde_json::json!({ "to": to, "message": message }))
        .send()
        .await
        .context("send failed")?
        .text()
        .await?;
    println!("{body}");
    Ok(())
}
