//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use env_logger::WriteStyle;
use log::LevelFilter;

use vmr_codeflow::vmr_info::VmrInfo;

use crate::commands;

/// VMR code flow - Synchronize component repositories with a virtual mono repo
#[derive(Parser, Debug)]
#[command(name = "vmr-codeflow")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Root of the VMR working tree. Defaults to the current directory.
    #[arg(long, global = true, value_name = "DIR", env = "VMR_PATH")]
    vmr: Option<PathBuf>,

    /// Directory for clones and patches. Defaults to the user cache directory.
    #[arg(long, global = true, value_name = "DIR", env = "VMR_TMP")]
    tmp: Option<PathBuf>,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: ColorChoice,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ColorChoice {
    Auto,
    Always,
    Never,
}

impl From<ColorChoice> for WriteStyle {
    fn from(choice: ColorChoice) -> Self {
        match choice {
            ColorChoice::Auto => WriteStyle::Auto,
            ColorChoice::Always => WriteStyle::Always,
            ColorChoice::Never => WriteStyle::Never,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Flow a repository build into the VMR
    Forwardflow(commands::flow::FlowArgs),

    /// Flow a VMR build back into a repository
    Backflow(commands::flow::FlowArgs),

    /// Report files of the VMR that mapping exclusions should have kept out
    Scan(commands::scan::ScanArgs),

    /// List the source mappings of the VMR
    Mappings,

    /// Print the records of the source manifest
    Manifest,

    /// Regenerate the aggregated third-party notices of the VMR
    Notices(commands::notices::NoticesArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(self.log_level, self.color);

        let vmr_info = self.vmr_info()?;
        match self.command {
            Commands::Forwardflow(args) => commands::forwardflow::execute(&vmr_info, args),
            Commands::Backflow(args) => commands::backflow::execute(&vmr_info, args),
            Commands::Scan(args) => commands::scan::execute(&vmr_info, args),
            Commands::Mappings => commands::mappings::execute(&vmr_info),
            Commands::Manifest => commands::manifest::execute(&vmr_info),
            Commands::Notices(args) => commands::notices::execute(&vmr_info, args),
        }
    }

    fn vmr_info(&self) -> Result<VmrInfo> {
        let vmr = match &self.vmr {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("Failed to get current directory")?,
        };
        let tmp = self.tmp.clone().unwrap_or_else(default_tmp_dir);
        Ok(VmrInfo::new(vmr, tmp))
    }
}

fn default_tmp_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vmr-codeflow")
}

/// `RUST_LOG` takes precedence over `--log-level` when set.
fn init_logging(level: LevelFilter, color: ColorChoice) {
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .write_style(color.into())
        .format_timestamp(None)
        .init();
}
