//! Command handler
//!
//! Translates front-end commands into session operations.

use serde_json::json;

use crate::common::{error::CommandError, Result};
use crate::debug::BreakpointSpec;

use super::protocol::{Command, Response};
use super::session::DebugSession;

/// Handle a command, wrapping the outcome in a response
pub fn handle_command(session: &DebugSession, id: u64, command: Command) -> Response {
    match handle_command_inner(session, command) {
        Ok(result) => Response::success(id, result),
        Err(e) => {
            tracing::debug!(request = id, error = %e, "Command failed");
            Response::error(id, CommandError::from(&e))
        }
    }
}

fn handle_command_inner(session: &DebugSession, command: Command) -> Result<serde_json::Value> {
    match command {
        // === Execution Control ===
        Command::Continue { thread_id } => {
            session.continue_thread(thread_id)?;
            Ok(json!({ "status": "running", "thread_id": thread_id }))
        }

        Command::Next { thread_id } => {
            session.next(thread_id)?;
            Ok(json!({ "status": "stepping", "thread_id": thread_id }))
        }

        Command::StepIn { thread_id } => {
            session.step_in(thread_id)?;
            Ok(json!({ "status": "stepping", "thread_id": thread_id }))
        }

        Command::StepOut { thread_id } => {
            session.step_out(thread_id)?;
            Ok(json!({ "status": "stepping", "thread_id": thread_id }))
        }

        Command::StepBack { thread_id } => {
            session.step_back(thread_id)?;
            Ok(json!({ "status": "stepping", "thread_id": thread_id }))
        }

        Command::Pause { thread_id } => {
            session.pause(thread_id)?;
            Ok(json!({ "status": "pausing", "thread_id": thread_id }))
        }

        Command::Interrupt { thread_id } => {
            session.interrupt(thread_id)?;
            Ok(json!({ "status": "interrupted", "thread_id": thread_id }))
        }

        // === Breakpoints ===
        Command::SetBreakpoints {
            source,
            breakpoints,
        } => {
            let installed = session.set_breakpoints(&source, &breakpoints);
            Ok(json!({ "breakpoints": installed }))
        }

        Command::BreakpointAdd {
            location,
            condition,
            hit_count,
        } => {
            let breakpoint = session.add_breakpoint(
                &location.file,
                BreakpointSpec {
                    line: location.line,
                    condition,
                    hit_count,
                },
            );
            Ok(serde_json::to_value(breakpoint.to_dap())?)
        }

        Command::BreakpointRemove { id } => {
            session.remove_breakpoint(id)?;
            Ok(json!({ "removed": id }))
        }

        Command::BreakpointList => {
            let breakpoints = session.list_breakpoints();
            Ok(json!({ "breakpoints": breakpoints }))
        }

        // === State Inspection ===
        Command::Threads => Ok(json!({ "threads": session.threads_view() })),

        Command::StackTrace { thread_id } => {
            let frames = session.stack_trace(thread_id)?;
            Ok(json!({ "stackFrames": frames, "totalFrames": frames.len() }))
        }

        Command::Variables { frame_id } => {
            let variables = session.variables(frame_id)?;
            Ok(json!({ "variables": variables }))
        }

        Command::SnapshotHistory { frame_id } => {
            Ok(serde_json::to_value(session.snapshot_history(frame_id)?)?)
        }

        Command::SetVariable {
            thread_id,
            name,
            value,
        } => {
            session.set_variable(thread_id, &name, value.clone())?;
            Ok(json!({ "queued": { "name": name, "value": value } }))
        }

        Command::GetOutput { tail, clear } => {
            let output = session.get_output(tail, clear);
            Ok(json!({ "output": output }))
        }

        // === Session ===
        Command::Capabilities => Ok(serde_json::to_value(session.capabilities())?),

        Command::Disconnect => {
            session.disconnect();
            Ok(json!({ "status": "disconnected" }))
        }
    }
}
