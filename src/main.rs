//! mcpgate entry point.
//!
//! Loads the server config (file + env overrides), starts the
//! configured backends, serves the REST surface, and on SIGINT/SIGTERM
//! stops every backend concurrently before exiting 0.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio_util::sync::CancellationToken;

use mcpgate::config::loader;
use mcpgate::gateway::Gateway;
use mcpgate::http::{self, AppState};

/// Multiplexing REST gateway for stdio MCP server processes.
#[derive(Parser)]
#[command(name = "mcpgate", version)]
struct Cli {
    /// Config file path (default: $MCP_CONFIG_PATH, else ./mcp_config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Socket address for the REST listener.
    #[arg(long, default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Enable debug logging.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            tracing::error!(error = %e, "gateway failed");
            eprintln!("mcpgate: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = cli.config.unwrap_or_else(loader::config_path);
    let servers = loader::load(&config_path)?;

    let gateway = Gateway::with_defaults();

    // Boot-time autostart: individual failures are logged, not fatal.
    for (id, config) in servers {
        if let Err(e) = gateway.start_server(&id, config).await {
            tracing::warn!(server_id = %id, error = %e, "failed to start configured server");
        }
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("termination signal received");
            shutdown.cancel();
        });
    }

    http::serve(cli.bind, AppState::new(gateway.clone()), shutdown).await?;

    gateway.shutdown_all().await;
    Ok(())
}

/// Resolve on SIGINT or (on Unix) SIGTERM.
async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

/// Tracing to stderr; `--verbose` forces debug, otherwise `RUST_LOG`
/// applies (defaulting to info).
fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
