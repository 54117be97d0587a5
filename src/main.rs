use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use switchyard::board::server::{build_state, start_server};
use switchyard::config::ServerConfig;

#[derive(Parser)]
#[command(name = "switchyard")]
#[command(
    version,
    about = "Work board synchronization server for multi-agent development workflows"
)]
struct Cli {
    /// Port to serve on
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Initialize the database only (don't start the server)
    #[arg(long)]
    init: bool,

    /// Change feed poll interval in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Change feed heartbeat interval in milliseconds
    #[arg(long)]
    heartbeat_interval_ms: Option<u64>,

    /// Enable dev mode (permissive CORS for a local UI dev server, bind on all interfaces)
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("switchyard=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = ServerConfig::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    if let Some(ms) = cli.poll_interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(ms) = cli.heartbeat_interval_ms {
        config.heartbeat_interval_ms = ms;
    }
    if cli.dev {
        config.dev_mode = true;
    }

    if cli.init {
        build_state(&config)?;
        println!("Board database initialized at {}", config.db_path.display());
        return Ok(());
    }

    start_server(config).await?;
    Ok(())
}
