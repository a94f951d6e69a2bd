use anyhow::Result;
use clap::Parser;

use funnel::{Server, cli::Cli};

fn init_tracing(default_level: &str) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let server = Server::with_config(cli.into_config());
    let shutdown = server.shutdown_handle();

    tokio::spawn(shutdown.stop_on(tokio::signal::ctrl_c()));

    server.start().await?;

    Ok(())
}
