mod cli;
mod config;

use cli::Cli;
use config::Config;
use mock_api_server::{CommandBridge, Error};
use std::process;
use tokio::io::{self, BufReader};
use tracing::{Instrument, error, info, info_span};

#[tokio::main]
async fn main() {
    setup_logging();

    if let Err(e) = run().await {
        error!("Application error: {}", e);
        process::exit(1);
    }
}

async fn run() -> Result<(), Error> {
    let cli = Cli::parse_args();
    let config = Config::from_cli(cli)?;

    let span = info_span!(
        "mock_api_server",
        bind_address = %config.bind_address,
        port = config.port,
    );

    serve(config).instrument(span).await
}

async fn serve(config: Config) -> Result<(), Error> {
    let start_immediately = config.start_immediately;
    let mut server = config.into_server();
    if start_immediately {
        server.start().await?;
    }

    info!("Waiting for commands on stdin");

    // Replies go to stdout, logs to stderr
    let mut bridge = CommandBridge::new(&mut server);
    bridge
        .serve(BufReader::new(io::stdin()), io::stdout())
        .await?;

    info!("Command channel closed, exiting");
    Ok(())
}

fn setup_logging() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_env("MOCK_API_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
