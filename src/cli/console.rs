//! Interactive debugging console
//!
//! Reads commands from stdin while scenarios run, prints session events as
//! they arrive, and returns once every scenario thread has finished.

use std::sync::Arc;

use colored::Colorize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::dap::{Event, StackFrame, Thread, Variable};
use crate::script::ScenarioOutcome;
use crate::session::{handle_command, BreakpointLocation, Command, DebugSession, Response};

/// A parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Command(Command),
    /// Variables of the selected thread's innermost frame
    Locals { thread_id: i64 },
    Select(i64),
    Help,
    Quit,
}

/// Parse one console line against the currently selected thread
pub fn parse_input(line: &str, selected: Option<i64>) -> Result<Input> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = parts.first() else {
        return Err(Error::Config("Empty command".to_string()));
    };
    let cmd = first.to_lowercase();
    let args = &parts[1..];
    let thread = || selected.ok_or_else(|| Error::Config("No thread selected; use 'thread <id>'".to_string()));

    let input = match cmd.as_str() {
        "continue" | "c" => Input::Command(Command::Continue { thread_id: thread()? }),
        "next" | "n" => Input::Command(Command::Next { thread_id: thread()? }),
        "step" | "s" => Input::Command(Command::StepIn { thread_id: thread()? }),
        "finish" | "out" => Input::Command(Command::StepOut { thread_id: thread()? }),
        "back" => Input::Command(Command::StepBack { thread_id: thread()? }),
        "pause" => Input::Command(Command::Pause { thread_id: thread()? }),
        "interrupt" | "kill" => Input::Command(Command::Interrupt { thread_id: thread()? }),

        "backtrace" | "bt" => Input::Command(Command::StackTrace { thread_id: thread()? }),
        "threads" => Input::Command(Command::Threads),
        "thread" => {
            let id = args
                .first()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Config("Usage: thread <id>".to_string()))?;
            Input::Select(id)
        }
        "vars" | "locals" => match args.first() {
            Some(frame) => Input::Command(Command::Variables {
                frame_id: frame
                    .parse()
                    .map_err(|_| Error::Config(format!("Invalid frame id: {}", frame)))?,
            }),
            None => Input::Locals { thread_id: thread()? },
        },
        "history" => {
            let frame_id = args
                .first()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Config("Usage: history <frame id>".to_string()))?;
            Input::Command(Command::SnapshotHistory { frame_id })
        }
        "set" => {
            let rest = args.join(" ");
            let (name, value) = rest
                .split_once('=')
                .ok_or_else(|| Error::Config("Usage: set <name>=<json>".to_string()))?;
            let value: Value = serde_json::from_str(value.trim())
                .map_err(|e| Error::Config(format!("Invalid JSON value: {}", e)))?;
            Input::Command(Command::SetVariable {
                thread_id: thread()?,
                name: name.trim().to_string(),
                value,
            })
        }

        "break" | "b" => parse_break(args)?,
        "delete" | "d" => {
            let id = args
                .first()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Config("Usage: delete <breakpoint id>".to_string()))?;
            Input::Command(Command::BreakpointRemove { id })
        }
        "breakpoints" | "info" => Input::Command(Command::BreakpointList),
        "output" => Input::Command(Command::GetOutput {
            tail: args.first().and_then(|s| s.parse().ok()),
            clear: false,
        }),

        "help" | "h" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        other => return Err(Error::Config(format!("Unknown command: {}", other))),
    };
    Ok(input)
}

/// `break <file:line> [--condition expr...] [--hit-count N]`
fn parse_break(args: &[&str]) -> Result<Input> {
    let location = args
        .first()
        .ok_or_else(|| Error::Config("break command requires a location".to_string()))?;
    let location = BreakpointLocation::parse(location)?;
    let mut condition = None;
    let mut hit_count = None;

    let mut i = 1;
    while i < args.len() {
        if args[i] == "--condition" && i + 1 < args.len() {
            i += 1;
            let mut parts = Vec::new();
            while i < args.len() && !args[i].starts_with("--") {
                parts.push(args[i]);
                i += 1;
            }
            condition = Some(parts.join(" ").trim_matches('"').to_string());
        } else if args[i] == "--hit-count" && i + 1 < args.len() {
            hit_count = Some(
                args[i + 1]
                    .parse()
                    .map_err(|_| Error::Config(format!("Invalid hit count: {}", args[i + 1])))?,
            );
            i += 2;
        } else {
            i += 1;
        }
    }

    Ok(Input::Command(Command::BreakpointAdd {
        location,
        condition,
        hit_count,
    }))
}

/// Drive the console until the scenario threads finish
pub async fn run(
    session: &Arc<DebugSession>,
    mut events: mpsc::UnboundedReceiver<Event>,
    mut execution: JoinHandle<Result<Vec<ScenarioOutcome>>>,
) -> Result<Vec<ScenarioOutcome>> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut selected: Option<i64> = None;
    let mut request_id = 0u64;

    println!("Type 'help' for commands.");
    loop {
        tokio::select! {
            joined = &mut execution => {
                while let Ok(event) = events.try_recv() {
                    print_event(session, &event, &mut selected);
                }
                return joined.map_err(|e| Error::Internal(format!("scenario runner failed: {}", e)))?;
            }
            Some(event) = events.recv() => print_event(session, &event, &mut selected),
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    request_id += 1;
                    handle_line(session, &line, &mut selected, request_id);
                }
                Ok(None) | Err(_) => {
                    // No more commands can arrive: let every thread run free
                    tracing::info!("Console input closed, detaching");
                    stdin_open = false;
                    session.disconnect();
                }
            },
        }
    }
}

fn handle_line(session: &DebugSession, line: &str, selected: &mut Option<i64>, id: u64) {
    let input = match parse_input(line, *selected) {
        Ok(input) => input,
        Err(e) => {
            eprintln!("{} {}", "error:".red(), e);
            return;
        }
    };

    match input {
        Input::Help => print_help(),
        Input::Quit => {
            for thread in session.threads_view() {
                let _ = session.interrupt(thread.id);
            }
            session.disconnect();
            println!("Interrupted all threads");
        }
        Input::Select(thread_id) => {
            if session.threads_view().iter().any(|t| t.id == thread_id) {
                *selected = Some(thread_id);
                println!("Selected thread {}", thread_id);
            } else {
                eprintln!("{} {}", "error:".red(), Error::ThreadNotFound(thread_id));
            }
        }
        Input::Locals { thread_id } => {
            let frame = session
                .stack_trace(thread_id)
                .and_then(|frames| {
                    frames
                        .first()
                        .map(|f| f.id as u64)
                        .ok_or_else(|| Error::invalid_state("show variables", "not running a scenario"))
                });
            match frame {
                Ok(frame_id) => {
                    let command = Command::Variables { frame_id };
                    let response = handle_command(session, id, command.clone());
                    print_response(&command, &response, *selected);
                }
                Err(e) => eprintln!("{} {}", "error:".red(), e),
            }
        }
        Input::Command(command) => {
            let response = handle_command(session, id, command.clone());
            print_response(&command, &response, *selected);
        }
    }
}

fn print_response(command: &Command, response: &Response, selected: Option<i64>) {
    if let Some(error) = &response.error {
        eprintln!("{} {}", "error:".red(), error.message);
        return;
    }
    let result = response.result.clone().unwrap_or(Value::Null);

    match command {
        Command::Continue { .. }
        | Command::Next { .. }
        | Command::StepIn { .. }
        | Command::StepOut { .. }
        | Command::StepBack { .. } => {}

        Command::Pause { thread_id } => println!("Pausing thread {} at its next step", thread_id),
        Command::Interrupt { thread_id } => println!("Interrupted thread {}", thread_id),

        Command::Threads => {
            let threads: Vec<Thread> = serde_json::from_value(result["threads"].clone()).unwrap_or_default();
            if threads.is_empty() {
                println!("No running threads");
            }
            for thread in threads {
                let marker = if Some(thread.id) == selected { "*" } else { " " };
                println!("{} {} {}", marker, thread.id, thread.name);
            }
        }

        Command::StackTrace { .. } => {
            let frames: Vec<StackFrame> =
                serde_json::from_value(result["stackFrames"].clone()).unwrap_or_default();
            for (i, frame) in frames.iter().enumerate() {
                println!("#{} {}", i, format_frame(frame));
            }
        }

        Command::Variables { .. } => {
            let vars: Vec<Variable> = serde_json::from_value(result["variables"].clone()).unwrap_or_default();
            if vars.is_empty() {
                println!("No variables");
            }
            for var in vars {
                println!("  {} = {}", var.name.cyan(), var.value);
            }
        }

        Command::SnapshotHistory { .. } => {
            let snapshots = result["snapshots"].as_array().cloned().unwrap_or_default();
            if snapshots.is_empty() {
                println!("No snapshots recorded");
            }
            for (i, snapshot) in snapshots.iter().enumerate() {
                println!("  [{}] {}", i + 1, snapshot);
            }
        }

        Command::SetVariable { name, value, .. } => {
            println!("Queued {} = {} (applied on resume)", name, value);
        }

        Command::BreakpointAdd { location, .. } => {
            println!("Breakpoint {} set at {}", result["id"], location);
        }

        Command::BreakpointRemove { id } => println!("Breakpoint {} removed", id),

        Command::BreakpointList => {
            let list = result["breakpoints"].as_array().cloned().unwrap_or_default();
            if list.is_empty() {
                println!("No breakpoints set");
            }
            for bp in list {
                let extras = [
                    bp["condition"].as_str().map(|c| format!("if {}", c)),
                    bp["hitCount"].as_u64().map(|n| format!("hits: {}", n)),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(", ");
                let location = format!("{}:{}", bp["source"].as_str().unwrap_or("?"), bp["line"]);
                if extras.is_empty() {
                    println!("  {} {}", bp["id"], location);
                } else {
                    println!("  {} {} ({})", bp["id"], location, extras);
                }
            }
        }

        Command::GetOutput { .. } => {
            for event in result["output"].as_array().cloned().unwrap_or_default() {
                print!("{}", event["output"].as_str().unwrap_or_default());
            }
        }

        _ => {
            if let Ok(pretty) = serde_json::to_string_pretty(&result) {
                println!("{}", pretty);
            }
        }
    }
}

fn print_event(session: &DebugSession, event: &Event, selected: &mut Option<i64>) {
    tracing::trace!(event = event.name(), thread_id = ?event.thread_id(), "Event received");
    match event {
        Event::Stopped(body) => {
            let thread_id = body.thread_id.unwrap_or_default();
            let what = match body.reason.as_str() {
                "breakpoint" => format!("Stopped at breakpoint {:?}", body.hit_breakpoint_ids),
                "step" => "Step completed".to_string(),
                "exception" => format!("Step failed: {}", body.description.as_deref().unwrap_or("?")),
                "pause" => "Paused".to_string(),
                "entry" => "Stopped at entry".to_string(),
                other => format!("Stopped: {}", other),
            };
            println!("{} {}", format!("[thread {}]", thread_id).bold(), what.yellow());
            if let Ok(frames) = session.stack_trace(thread_id) {
                if let Some(frame) = frames.first() {
                    println!("  at {}", format_frame(frame));
                }
            }
            if selected.is_none() || *selected == Some(thread_id) || !is_running(session, *selected) {
                *selected = Some(thread_id);
            }
        }
        Event::Continued(_) => {}
        Event::Thread(body) => {
            println!("{}", format!("[thread {}] {}", body.thread_id, body.reason).dimmed());
            if body.reason == "exited" && *selected == Some(body.thread_id) {
                *selected = None;
            }
        }
        Event::Output(body) => print!("{}", body.output),
        Event::Terminated(_) => println!("{}", "Debug session terminated".dimmed()),
    }
}

fn is_running(session: &DebugSession, thread_id: Option<i64>) -> bool {
    thread_id.is_some_and(|id| session.threads_view().iter().any(|t| t.id == id))
}

fn format_frame(frame: &StackFrame) -> String {
    let source = frame
        .source
        .as_ref()
        .and_then(|s| s.name.clone().or_else(|| s.path.clone()))
        .unwrap_or_else(|| "?".to_string());
    format!("{} ({}:{}) [frame {}]", frame.name.green(), source, frame.line, frame.id)
}

fn print_help() {
    println!(
        "\
Execution:   c(ontinue)  n(ext)  s(tep)  finish  back  pause  interrupt
Inspection:  bt  vars [frame]  history <frame>  threads  thread <id>  output [n]
Hot-fix:     set <name>=<json>   (applied when the thread resumes)
Breakpoints: break <file:line> [--condition expr] [--hit-count N]  delete <id>  breakpoints
Session:     quit"
    );
}
