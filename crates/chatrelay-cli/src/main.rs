use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chatrelay_config::{AppConfig, ConfigLoader};
use chatrelay_gateway::{AppState, GatewayServer};
use chatrelay_security::RedactingWriter;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "chatrelay", version, about = "Streaming chat gateway with local and remote tools")]
struct Cli {
    /// Config file (.yaml, .yml or .toml)
    #[arg(short, long, global = true, env = "CHATRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `chatrelay_agents=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP gateway
    Serve {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Load and print the effective configuration with secrets masked
    CheckConfig,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref(), cli.log_format)?;

    let config = ConfigLoader::new(cli.config.clone())
        .load()
        .context("failed to load configuration")?;

    match cli.command {
        Command::Serve { host, port } => serve(config, host, port).await,
        Command::CheckConfig => check_config(&config),
    }
}

fn init_tracing(level: Option<&str>, format: LogFormat) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).context("invalid --log-level")?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(RedactingWriter::stderr());
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

async fn serve(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.gateway.host,
        port = config.gateway.port,
        "starting chatrelay"
    );
    let state = AppState::from_config(config).context("failed to initialise gateway")?;
    GatewayServer::new(Arc::new(state))
        .run()
        .await
        .context("gateway server failure")?;
    info!("chatrelay stopped");
    Ok(())
}

fn check_config(config: &AppConfig) -> Result<()> {
    let mut masked = config.clone();
    if masked.completion.api_key.is_some() {
        masked.completion.api_key = Some("[REDACTED]".to_string());
    }
    if masked.tools.search_api_key.is_some() {
        masked.tools.search_api_key = Some("[REDACTED]".to_string());
    }
    let rendered = serde_json::to_string_pretty(&masked).context("failed to render configuration")?;
    println!("{rendered}");
    Ok(())
}
