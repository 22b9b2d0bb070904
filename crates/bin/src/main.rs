mod backend;
mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(args)) => {
            init_tracing()?;
            commands::serve::run(&args).await
        }
        Some(Commands::Health(args)) => commands::health::run(&args).await,
        None => {
            // Serve with defaults when no subcommand is given
            init_tracing()?;
            let args = Cli::parse_from(["vaultsync", "serve"]);
            match args.command {
                Some(Commands::Serve(args)) => commands::serve::run(&args).await,
                _ => Ok(()),
            }
        }
    }
}

fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("vaultsync=info".parse()?))
        .init();
    Ok(())
}
