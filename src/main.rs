use clap::Parser;
use std::process::ExitCode;

mod cli;
mod commands;

use crate::cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(mode) = cli.color {
        probox::set_color_mode(mode);
    }
    probox::logging::init(cli.verbose);

    commands::dispatch(&cli)
}
