//! termhost-server - background daemon owning the terminal sessions

use anyhow::Result;
use clap::Parser;
use termhost::config::Config;
use termhost::server::ServerListener;
use termhost::session::{ManagerOptions, SessionManager};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "termhost-server")]
#[command(about = "termhost background server daemon")]
struct Cli {
    /// Server name
    #[arg(short, long, default_value = "default")]
    name: String,

    /// Socket path override
    #[arg(long)]
    socket: Option<std::path::PathBuf>,

    /// Config file override
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let socket_path = cli
        .socket
        .unwrap_or_else(|| config.socket_path(&cli.name));

    tracing::info!("Starting termhost server '{}'", cli.name);

    let manager = SessionManager::with_options(ManagerOptions::from(&config))?;
    let server = ServerListener::new(cli.name, socket_path);

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    server.run(manager.clone(), shutdown_rx).await?;
    manager.shutdown().await;

    Ok(())
}
