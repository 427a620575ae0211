//! CLI command handling
//!
//! Loads scenarios, wires them to a debug session and hands control to the
//! interactive console.

pub mod console;

use std::path::PathBuf;
use std::sync::Arc;

use colored::Colorize;

use crate::commands::{Commands, RunArgs};
use crate::common::{config::Config, Error, Result};
use crate::debug::BreakpointSpec;
use crate::engine::{NoopHook, RuntimeHook};
use crate::script::{load_file, Runner, ScenarioOutcome};
use crate::session::{BreakpointLocation, DebugSession};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Run(args) => run(args).await,
        Commands::Check { files } => check(&files),
    }
}

fn check(files: &[PathBuf]) -> Result<()> {
    let runner = Runner::load(files)?;
    runner.check()?;
    for name in runner.names() {
        let steps = runner.scenario(&name).map_or(0, |s| s.steps.len());
        println!("{} {} ({} steps)", "ok".green(), name, steps);
    }
    Ok(())
}

async fn run(args: RunArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if args.stop_on_entry {
        config.session.stop_on_entry = true;
    }

    let top_level = args
        .files
        .iter()
        .map(|p| load_file(p))
        .collect::<Result<Vec<_>>>()?;
    let names: Vec<String> = top_level.iter().map(|s| s.name.clone()).collect();
    let libraries = args
        .libraries
        .iter()
        .map(|p| load_file(p))
        .collect::<Result<Vec<_>>>()?;
    let runner = Arc::new(Runner::new(top_level.into_iter().chain(libraries)));
    runner.check()?;

    if args.no_debug {
        let outcomes = tokio::task::spawn_blocking(move || {
            runner.run_parallel(&names, || Arc::new(NoopHook) as Arc<dyn RuntimeHook>)
        })
        .await
        .map_err(|e| Error::Internal(format!("scenario runner failed: {}", e)))??;
        return report(&outcomes);
    }

    let (session, events) = DebugSession::new(config);
    for location in &args.initial_breakpoints {
        let location = BreakpointLocation::parse(location)?;
        let breakpoint = session.add_breakpoint(&location.file, BreakpointSpec::at(location.line));
        println!("Breakpoint {} set at {}", breakpoint.id, location);
    }

    let hooks = session.clone();
    let execution = tokio::task::spawn_blocking(move || {
        runner.run_parallel(&names, move || hooks.thread_hook() as Arc<dyn RuntimeHook>)
    });

    let outcomes = console::run(&session, events, execution).await;
    session.disconnect();
    report(&outcomes?)
}

fn report(outcomes: &[ScenarioOutcome]) -> Result<()> {
    println!();
    for outcome in outcomes {
        let status = if outcome.passed {
            "PASS".green()
        } else if outcome.aborted {
            "ABORTED".red()
        } else {
            "FAIL".red()
        };
        println!("{} {}", status, outcome.name);
        for failure in &outcome.failures {
            println!("    {}:{} {}", failure.scenario, failure.line, failure.message.dimmed());
        }
    }

    let failed = outcomes.iter().filter(|o| !o.passed).count();
    if failed > 0 {
        return Err(Error::ScenariosFailed {
            failed,
            total: outcomes.len(),
        });
    }
    println!("{} scenario(s) passed", outcomes.len());
    Ok(())
}
