//! # Parley Server
//!
//! A single-room realtime chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Listen on every interface, port 8080
//! parley
//!
//! # Listen on a specific address
//! parley --addr 127.0.0.1:9000
//!
//! # Turn up logging
//! RUST_LOG=parley_core=trace parley
//! ```
//!
//! Open `http://<addr>/` in a browser to chat.

mod config;
mod handlers;
mod metrics;
mod page;

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Realtime chat room server.
#[derive(Debug, Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// The address of the application [default: :8080]
    #[arg(long, value_name = "ADDR")]
    addr: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "parley_server=info,parley_core=info,parley_transport=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load configuration
    let mut config = config::Config::load()?;
    if let Some(addr) = cli.addr {
        config.addr = addr;
    }

    tracing::info!("Starting Parley on {}", config.addr);

    metrics::init_metrics();

    handlers::run_server(config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_addr_flag() {
        let cli = Cli::try_parse_from(["parley", "--addr", "127.0.0.1:9000"]).unwrap();
        assert_eq!(cli.addr.as_deref(), Some("127.0.0.1:9000"));

        let cli = Cli::try_parse_from(["parley"]).unwrap();
        assert!(cli.addr.is_none());

        assert!(Cli::try_parse_from(["parley", "serve"]).is_err());
    }
}
