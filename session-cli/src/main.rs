mod cli;
mod commands;
mod config;
mod error;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
    error::Result,
};
use clap::Parser;
use std::process;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {}", e);
        process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> Result<()> {
    let config_path = args.config.as_deref();

    if let Commands::Config { show, reset } = args.command {
        if reset {
            AppConfig::reset(config_path)?;
            println!("✓ Configuration reset to defaults");
        } else if show {
            let config = AppConfig::load(config_path)?;
            println!("{}", config.show()?);
        } else {
            println!("Use --show to display current configuration or --reset to reset to defaults");
        }
        return Ok(());
    }

    let config = AppConfig::load(config_path)?;
    let executor = CommandExecutor::new(config).await?;

    match args.command {
        Commands::Login { token, refresh_id } => executor.login(&token, &refresh_id).await,
        Commands::Logout => executor.logout().await,
        Commands::Status => executor.status().await,
        Commands::Request {
            method,
            url,
            headers,
            data,
            include,
        } => {
            executor
                .request(&method, &url, &headers, data.as_deref(), include, args.timeout)
                .await
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("sesh=debug,session_client=debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::WARN.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_writer(std::io::stderr),
        )
        .init();
}
