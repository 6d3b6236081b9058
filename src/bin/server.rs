//! Coderoom server
//!
//! Serves the session hub over websocket and the execution API over HTTP.

use clap::Parser;
use coderoom::config::{load_config_with, validate_config, LogConfig};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coderoom-server", version, about = "Coderoom realtime session and execution server")]
struct Args {
    /// Config file (json5 or toml); defaults to the user config directory
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Port (overrides config)
    #[arg(long, short)]
    port: Option<u16>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    dump_config: bool,
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_new(&log.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load config
    let mut config = load_config_with(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if args.dump_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    init_tracing(&config.log);
    info!("Starting {} v{}", coderoom::NAME, coderoom::VERSION);

    let validation = validate_config(&config);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if !validation.valid {
        for issue in &validation.errors {
            error!("{}", issue);
        }
        anyhow::bail!("invalid configuration ({} error(s))", validation.errors.len());
    }

    coderoom::server::run(config).await?;
    Ok(())
}
