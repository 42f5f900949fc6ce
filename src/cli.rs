//! CLI interface for vivoice

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vivoice")]
#[command(about = "Real-time voice assistant and live translation backend")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket/HTTP server
    Serve {
        /// Host to bind
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to bind
        #[arg(long, short, default_value_t = 8000)]
        port: u16,
    },
    /// Print the effective configuration and exit
    Config,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { host, port } => crate::server::start(&host, port).await,
        Commands::Config => {
            let config = crate::config::Config::from_env();
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}
