//! ---
//! tsc_section: "01-core-functionality"
//! tsc_subsection: "binary"
//! tsc_type: "source"
//! tsc_scope: "code"
//! tsc_description: "Binary entrypoint for the thermoscan daemon."
//! tsc_version: "v0.1.0"
//! tsc_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use thermoscan_common::{init_tracing, RigConfig};
use thermoscan_core::{Command, Dispatcher, Rig};
use thermoscan_msg::{pump_json_lines, JsonLinesTransport, Publisher, Topics};
use tokio::io::BufReader;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const COMMAND_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Thermoscan turntable daemon",
    long_about = "Reads JSON-lines commands on stdin and writes responses, frames and state on stdout."
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DEGREES",
        help = "Declare the starting angle instead of restoring it from the position log"
    )]
    initial_position: Option<f64>,

    #[arg(long, value_name = "ROOT", help = "Override the topic root")]
    topic_root: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the daemon on stdin/stdout")]
    Run,
    #[command(about = "Validate the configuration and print it as TOML")]
    CheckConfig,
    #[command(about = "List accepted commands and their parameters")]
    Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/thermoscan.toml"));
    candidates.push(PathBuf::from("/etc/thermoscan/thermoscan.toml"));

    let loaded = RigConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(position) = cli.initial_position {
        config.motion.initial_position = Some(position);
    }
    if let Some(root) = cli.topic_root {
        config.transport.topic_root = root;
    }
    config.validate()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("thermoscand", &config.logging)?;
            match &loaded.source {
                Some(path) => info!(config_path = %path.display(), "configuration loaded"),
                None => warn!("no configuration file found; running with built-in defaults"),
            }
            run_daemon(config).await?
        }
        Commands::CheckConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Commands => {
            for command in Command::ALL {
                let params = command
                    .params()
                    .iter()
                    .map(|spec| spec.name)
                    .collect::<Vec<_>>()
                    .join(", ");
                println!("{:<24} {}", command.name(), params);
            }
        }
    }

    Ok(())
}

async fn run_daemon(config: RigConfig) -> Result<()> {
    let topics = Topics::new(config.transport.topic_root.clone());
    let publisher =
        Publisher::new(topics.clone()).with_transport(Arc::new(JsonLinesTransport::stdout()));
    let rig = Arc::new(Rig::simulated(config, publisher)?);
    info!(
        position = rig.position().get(),
        source = ?rig.initial_position(),
        sensors = ?rig.frames().sensor_ids().collect::<Vec<_>>(),
        "rig ready"
    );

    let dispatcher = Dispatcher::new(rig);
    dispatcher.start_configured_loops().await?;

    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let reader = tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        match pump_json_lines(stdin, &topics, &tx).await {
            Ok(forwarded) => info!(forwarded, "command input closed"),
            Err(err) => error!(error = %err, "command reader failed"),
        }
    });

    tokio::select! {
        _ = dispatcher.run(rx) => {
            info!("command stream finished");
        }
        result = signal::ctrl_c() => {
            result?;
            info!("shutdown signal received");
            dispatcher.shutdown().await;
        }
    }

    reader.abort();
    info!("thermoscand stopped");
    Ok(())
}
