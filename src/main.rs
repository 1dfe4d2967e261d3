//! termhost - command-line front end for the terminal session server

use anyhow::Result;
use clap::{Parser, Subcommand};
use termhost::client;

#[derive(Parser)]
#[command(name = "termhost")]
#[command(about = "Pseudo-terminal session manager")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Server name
    #[arg(short, long, default_value = "default", global = true)]
    name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the shell new sessions would run
    Shell,
    /// Print platform information as JSON
    Info,
    /// Open a session and attach this terminal to it
    Attach {
        /// Working directory for the session
        #[arg(long)]
        cwd: Option<String>,
    },
    /// List sessions on the server
    List,
    /// Stop the server and every session it owns
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Shell => {
            client::print_shell();
            Ok(())
        }
        Commands::Info => client::print_platform_info(),
        Commands::Attach { cwd } => client::attach(&cli.name, cwd).await,
        Commands::List => client::list_sessions(&cli.name).await,
        Commands::Stop => client::stop_server(&cli.name).await,
    }
}
