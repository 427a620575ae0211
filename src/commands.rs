//! CLI command definitions
//!
//! Defines the clap commands for the scenario debugger.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run scenarios in parallel under the interactive debugger
    Run(RunArgs),

    /// Parse scenario files and report errors without running them
    Check {
        /// Scenario files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Scenario files to run, one thread each
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Scenario files only reachable through `call`
    #[arg(long = "lib")]
    pub libraries: Vec<PathBuf>,

    /// Set initial breakpoint(s) before the scenarios start (file:line)
    /// Can be specified multiple times: --break login.scn:3 --break pay.scn:7
    #[arg(long = "break", short = 'b')]
    pub initial_breakpoints: Vec<String>,

    /// Pause every thread before its first step
    #[arg(long)]
    pub stop_on_entry: bool,

    /// Configuration file (default: platform config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Run without the interactive console; breakpoints are ignored
    #[arg(long)]
    pub no_debug: bool,
}
