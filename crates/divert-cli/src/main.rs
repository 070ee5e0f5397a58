//! divert - command-line front end for the WinDivert protocol layer

mod args;
mod commands;
mod logging;

use anyhow::Result;
use clap::Parser;
use tracing::error;

use args::Args;
use commands::Command;

fn main() {
    let args = Args::parse();

    if let Err(e) = logging::init(&args) {
        eprintln!("Failed to initialize logging: {:#}", e);
        std::process::exit(1);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Capture(capture) => commands::capture::execute(capture),
        Command::Param(param) => commands::param::execute(param),
        Command::Version => commands::version::execute(),
    }
}
