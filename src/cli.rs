use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// install-extras - Install recorded extra packages into the target system
#[derive(Parser)]
#[command(name = "install-extras")]
#[command(about = "Install packages requested by installer components into the target root")]
#[command(version)]
pub struct Cli {
    /// Configuration file (JSON); built-in defaults when omitted
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Root of the system being installed (overrides the config file)
    #[arg(short, long, global = true)]
    pub target: Option<PathBuf>,

    /// Dry-run mode: resolve the selections without committing anything.
    ///
    /// The sources list is still filtered and restored so the resolution
    /// matches a real run.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install the recorded extra packages (default)
    Install,
    /// Print the recorded package selections
    Selections {
        /// Print as a JSON array
        #[arg(long)]
        json: bool,
    },
    /// Resolve the recorded selections against a cache snapshot
    Simulate {
        /// JSON cache snapshot to resolve against
        #[arg(short, long)]
        snapshot: PathBuf,
    },
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        file: PathBuf,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }
}
