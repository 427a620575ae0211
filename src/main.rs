//! Scenario Debugger - step-through debugging for parallel scenario runs
//!
//! Runs scenario files on parallel OS threads and lets you pause, step,
//! step back and hot-fix each thread from an interactive console.

use clap::Parser;
use scenario_debugger::{cli, commands::Commands, common::logging};

#[derive(Parser)]
#[command(name = "scenario-debugger", about = "Interactive debugger for parallel scenario runs")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Also write logs to the session log file
    #[arg(long, global = true)]
    log_file: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.log_file {
        if let Some(path) = logging::init_file() {
            eprintln!("Logging to {}", path.display());
        }
    } else {
        logging::init_console(cli.verbose);
    }

    if let Err(e) = cli::dispatch(cli.command).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
