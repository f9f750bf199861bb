use clap::Parser;
use rulemover::cli::{Cli, run_cli};
use rulemover::logging;
use rulemover::output::OutputFormatter;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            OutputFormatter::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}
