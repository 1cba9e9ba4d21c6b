mod channels;
mod cli;
mod connection;
mod content;
mod errors;
mod install;
mod kernel;
mod latch;
mod multiplexer;
mod widget;
mod wire;

use clap::Parser;
use gokernel_core::config::Config;
use gokernel_core::tracker::FileTracker;
use gokernel_core::workspace::Workspace;

use cli::{Cli, Command};
use errors::{Error, Result};
use kernel::Kernel;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "gokernel exited with an error");
        eprintln!("gokernel: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(Command::Install) = cli.command {
        let path = install::install()?;
        println!("installed kernelspec at {}", path.display());
        return Ok(());
    }

    let connection_file = cli
        .connection_file
        .ok_or_else(|| Error::Connection("missing -f/--connection-file (or run `gokernel install`)".to_string()))?;

    let connection = connection::ConnectionInfo::load(&connection_file)?;
    let (shell_channels, control) = channels::bind(&connection)?;

    let config = Config::load()?;
    let workspace = Workspace::new(config.preserve_workspace_on_error)?;
    let tracker = FileTracker::new()?;

    let kernel = Kernel::new(shell_channels, control, workspace, tracker, config);
    kernel.run().await
}
