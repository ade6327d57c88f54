mod auth;
mod client_svc;
mod commands;
mod config;
mod copy_job;
mod error;
mod spo_client;

use clap::Parser;
use commands::Commands;

#[derive(Parser, Debug)]
#[command(
    name = "spoctl",
    about = "Manage SharePoint Online files, folders and property bags",
    author,
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Parse command line arguments
    let cli = Cli::parse();

    // Execute the specified command
    match cli.command {
        Commands::Auth(cmd) => cmd.execute().await,
        Commands::File(cmd) => cmd.execute().await,
        Commands::Folder(cmd) => cmd.execute().await,
        Commands::Propertybag(cmd) => cmd.execute().await,
        Commands::Completions(cmd) => cmd.execute(),
    }
}
