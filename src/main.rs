//! # VMR code flow CLI
//!
//! Binary entry point of `vmr-codeflow`. It parses arguments with `clap`,
//! sets up logging and runs the selected command. All of the flow logic
//! lives in the `vmr_codeflow` library.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
