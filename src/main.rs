mod args;
mod commands;
mod error;
mod modem;
mod recovery;
mod rpc;
mod shared;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{AppCommand, Cli};
use commands::{run_location, run_serve, run_status};

// Top-level entrypoint: parse CLI args, set up logging, and dispatch to a command module.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        AppCommand::Serve(args) => run_serve(args),
        AppCommand::Status(args) => run_status(args),
        AppCommand::Location(args) => run_location(args),
    }
}
