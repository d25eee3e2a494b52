use std::process::ExitCode;

use clap::Parser;
use layerfe::{cli, logger};

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();

    // Session log (overwrites the previous run's log)
    if let Some(path) = logger::init(args.verbose)
        && args.verbose
    {
        println!("log: {}", path.display());
    }

    cli::run(args)
}
