//! Command protocol
//!
//! Requests a debugger front-end issues against a running session, and the
//! response envelope they are answered with.

use serde::{Deserialize, Serialize};

use crate::common::error::CommandError;
use crate::common::Error;
use crate::debug::BreakpointSpec;

/// Request from a debugger front-end
#[derive(Debug, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for matching responses
    pub id: u64,
    /// The command to execute
    pub command: Command,
}

/// Response to a [`Request`]
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// Request ID this response corresponds to
    pub id: u64,
    /// Whether the command succeeded
    pub success: bool,
    /// Result data on success
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error information on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl Response {
    /// Create a success response
    pub fn success(id: u64, result: serde_json::Value) -> Self {
        Self {
            id,
            success: true,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: u64, error: CommandError) -> Self {
        Self {
            id,
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Create a success response with no data
    pub fn ok(id: u64) -> Self {
        Self::success(id, serde_json::json!({}))
    }
}

/// Commands accepted by a debug session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    // === Execution Control ===
    /// Run freely until the next breakpoint
    Continue { thread_id: i64 },

    /// Stop at the next step at the current depth
    Next { thread_id: i64 },

    /// Stop at the very next step
    StepIn { thread_id: i64 },

    /// Stop at the next step of the calling scenario
    StepOut { thread_id: i64 },

    /// Rewind one step
    StepBack { thread_id: i64 },

    /// Stop at the next step
    Pause { thread_id: i64 },

    /// Abort the thread's scenarios
    Interrupt { thread_id: i64 },

    // === Breakpoints ===
    /// Replace the breakpoints of a source
    SetBreakpoints {
        source: String,
        breakpoints: Vec<BreakpointSpec>,
    },

    /// Add one breakpoint, keeping the others of its source
    BreakpointAdd {
        location: BreakpointLocation,
        condition: Option<String>,
        hit_count: Option<u32>,
    },

    /// Remove a breakpoint
    BreakpointRemove { id: u32 },

    /// List all breakpoints
    BreakpointList,

    // === State Inspection ===
    /// List threads running a scenario
    Threads,

    /// Frames of a thread, innermost first
    StackTrace { thread_id: i64 },

    /// Current variables of a frame
    Variables { frame_id: u64 },

    /// Every snapshot recorded for a frame
    SnapshotHistory { frame_id: u64 },

    /// Queue a variable edit applied when the thread resumes
    SetVariable {
        thread_id: i64,
        name: String,
        value: serde_json::Value,
    },

    /// Buffered scenario output
    GetOutput {
        tail: Option<usize>,
        #[serde(default)]
        clear: bool,
    },

    // === Session ===
    /// Advertised capabilities
    Capabilities,

    /// Release every thread and stop debugging
    Disconnect,
}

/// A `file:line` source location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakpointLocation {
    pub file: String,
    pub line: u32,
}

impl BreakpointLocation {
    /// Parse a location string like "login.scn:12"
    pub fn parse(s: &str) -> Result<Self, Error> {
        // The last ':' followed by digits only, so "C:\dir\a.scn:3" works
        let (file, line) = s
            .rsplit_once(':')
            .filter(|(file, line)| {
                !file.is_empty() && !line.is_empty() && line.chars().all(|c| c.is_ascii_digit())
            })
            .ok_or_else(|| Error::InvalidLocation(format!("expected file:line, got '{}'", s)))?;
        let line: u32 = line
            .parse()
            .map_err(|_| Error::InvalidLocation(format!("invalid line number: {}", line)))?;
        if line == 0 {
            return Err(Error::InvalidLocation("line numbers start at 1".to_string()));
        }
        Ok(Self {
            file: file.to_string(),
            line,
        })
    }
}

impl std::fmt::Display for BreakpointLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_parse() {
        let loc = BreakpointLocation::parse("scenarios/login.scn:12").unwrap();
        assert_eq!(loc.file, "scenarios/login.scn");
        assert_eq!(loc.line, 12);

        let loc = BreakpointLocation::parse(r"C:\work\a.scn:3").unwrap();
        assert_eq!(loc.file, r"C:\work\a.scn");

        assert!(BreakpointLocation::parse("login.scn").is_err());
        assert!(BreakpointLocation::parse("login.scn:x").is_err());
        assert!(BreakpointLocation::parse(":4").is_err());
        assert!(BreakpointLocation::parse("a.scn:0").is_err());
    }

    #[test]
    fn test_command_wire_format() {
        let cmd: Command = serde_json::from_str(
            r#"{"type":"set_breakpoints","source":"a.scn","breakpoints":[{"line":3,"hitCount":2}]}"#,
        )
        .unwrap();
        match cmd {
            Command::SetBreakpoints {
                source,
                breakpoints,
            } => {
                assert_eq!(source, "a.scn");
                assert_eq!(breakpoints[0].hit_count, Some(2));
                assert!(breakpoints[0].condition.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }

        let json = serde_json::to_value(Command::StepBack { thread_id: 2 }).unwrap();
        assert_eq!(json["type"], "step_back");
        assert_eq!(json["thread_id"], 2);
    }

    #[test]
    fn test_error_response_shape() {
        let err = Error::ThreadNotFound(9);
        let resp = Response::error(4, CommandError::from(&err));
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "THREAD_NOT_FOUND");
        assert!(json.get("result").is_none());
    }
}
