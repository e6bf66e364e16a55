use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use echo_buddy::log_subscriber::LogSubscriber;
use echo_buddy::probe_loop::ProbeLoop;
use echo_buddy::{echo_call, probe_config};
use futures::executor;
use log::debug;
use ping_crab::helpers::{bootstrap, logging, stop};

/// Keeps sending echo requests to a host and reports every reply (or the lack thereof).
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[clap(flatten)]
    logging: logging::Params,

    #[clap(flatten)]
    echo: echo_call::Params,

    #[clap(flatten)]
    probe: probe_config::Params,
}

fn main() -> Result<ExitCode> {
    bootstrap::run(parse_cli, logging_params, run)
}

/// Parses and validates the command line. Anything the core would reject is reported
/// the clap way, so the process exits before probing.
fn parse_cli() -> Cli {
    let cli = Cli::parse();
    if let Err(e) = cli.probe.to_config() {
        Cli::command().error(ErrorKind::ValueValidation, e).exit();
    }
    cli
}

fn logging_params(cli: &Cli) -> &logging::Params {
    &cli.logging
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.probe.to_config().context("invalid probe configuration")?;

    let sig_handler = stop::new().context("Failed to set up stop signal handling")?;
    let stop_rx = sig_handler.subscribe_stop();
    tokio::spawn(sig_handler.wait_for_signal());

    let mut probe_loop = ProbeLoop::new(config, cli.echo.to_opener(), io::stdout())
        .with_subscriber(Arc::new(LogSubscriber));
    let exit = executor::block_on(probe_loop.execute(stop_rx));
    debug!("Probe loop finished: {:?}", exit);

    Ok(ExitCode::from(exit.code()))
}
