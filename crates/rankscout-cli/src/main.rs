mod cli;
mod commands;
mod error;
mod logging;
mod mock;
mod output;

use clap::Parser;
use rankscout_core::RankscoutConfig;
use std::process::ExitCode;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error[{}]: {error}", error.code());
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => RankscoutConfig::load(path)?,
        None => RankscoutConfig::from_env()?,
    };
    logging::init(&config.logging);

    let result = commands::run(&cli, config).await?;
    output::render(&result, cli.pretty)
}
