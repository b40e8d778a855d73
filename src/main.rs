//! `live-listener`: serves the demo HTTP/RPC application from a JSON
//! configuration file and restarts it whenever the file changes.
//!
//! ```text
//! live-listener --config live-listener.json
//! live-listener --config live-listener.json --no-watch   # SIGHUP to re-read
//! ```

use std::path::PathBuf;

use clap::Parser;

use live_listener::lifecycle::{self, Shutdown, StartupOptions};
use live_listener::observability::logging;

#[derive(Debug, Parser)]
#[command(name = "live-listener", version, about = "Configuration-driven listener with restart and rollback")]
struct Cli {
    /// Configuration file; created from defaults when missing.
    #[arg(short, long, default_value = "live-listener.json")]
    config: PathBuf,

    /// Do not watch the file; re-read it only on SIGHUP.
    #[arg(long)]
    no_watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let logging = logging::init_logging("info")?;

    tracing::info!("live-listener v{} starting", env!("CARGO_PKG_VERSION"));

    let options = StartupOptions {
        config_path: cli.config,
        watch: !cli.no_watch,
    };
    lifecycle::run(options, Shutdown::new(), Some(logging)).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
