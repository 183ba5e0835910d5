//! Faro Dispatcher Server
//!
//! Main entry point: loads configuration, wires the PostgreSQL stores and
//! the NATS delivery client, and runs one dispatcher instance until a
//! shutdown signal arrives.

mod startup;

use clap::Parser;
use faro_shared::config::ConfigLoader;

/// CLI arguments for faro-server
#[derive(clap::Parser, Debug)]
#[command(name = "faro-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Faro partitioned outbox dispatcher", long_about = None)]
struct Args {
    /// Path to a .env file with FARO_* variables
    #[arg(long)]
    env_file: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let loader = ConfigLoader::new(args.env_file);
    let config = loader.load()?;

    setup_logging(&config.logging.level, args.debug);

    startup::run(config).await?;

    Ok(())
}

/// Setup logging from the configured level, overridable via `RUST_LOG`.
fn setup_logging(level: &str, debug: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let level = if debug { "debug" } else { level };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(env_filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}
