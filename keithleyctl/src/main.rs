//! Keithley CLI
//!
//! Operator tool for slew-limited Keithley 2470 sessions.

use anyhow::Result;
use clap::Parser;
use keithleyctl::cli::{
    handle_beep, handle_config, handle_hold, handle_info, handle_ports, Cli, Commands,
    HoldOptions,
};
use keithleyctl::config::{self, Overrides};
use keithleyctl::shutdown::{watch_signals, StopSignal};
use std::sync::Arc;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    // Build configuration using priority chain: defaults → file → env → CLI args
    let current_limit = match &cli.command {
        Commands::Hold { current_limit, .. } => *current_limit,
        _ => None,
    };
    let overrides = Overrides {
        config: cli.config.clone(),
        resource: cli.resource.clone(),
        mock: cli.mock,
        current_limit,
    };

    let effective = match config::load(&overrides) {
        Ok(effective) => effective,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };
    debug!("Using configuration from {}", effective.path.display());

    let format = cli.format;
    let result = match cli.command {
        Commands::Info => handle_info(&effective.config, &format).await,
        Commands::Beep {
            frequency,
            duration,
        } => handle_beep(&effective.config, frequency, duration, &format).await,
        Commands::Hold {
            voltage,
            interval,
            duration,
            ..
        } => match HoldOptions::new(voltage, interval, duration) {
            Ok(options) => {
                let stop = Arc::new(StopSignal::new());
                let watcher = watch_signals(stop.clone());
                let result = handle_hold(&effective.config, options, stop, &format).await;
                watcher.abort();
                result
            }
            Err(e) => Err(e),
        },
        Commands::Ports => handle_ports(&format),
        Commands::Config { command } => handle_config(command, &effective, &format),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        if cli.verbose {
            eprintln!("Error details: {:?}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
