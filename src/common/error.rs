//! Error types for the scenario debugger
//!
//! Errors raised on the command side are reported back to the debugger
//! client; errors raised on an execution thread are logged and swallowed at
//! the controller boundary so they never abort a test run.

use std::io;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the scenario debugger
#[derive(Error, Debug)]
pub enum Error {
    // === Session Errors ===
    #[error("Debugger client disconnected")]
    Disconnected,

    #[error("Debug session has been detached")]
    SessionDetached,

    // === Thread / Frame Errors ===
    #[error("Thread {0} not found")]
    ThreadNotFound(i64),

    #[error("Frame {0} not found")]
    FrameNotFound(u64),

    #[error("Cannot {action} while thread is {state}")]
    InvalidState { action: String, state: String },

    #[error("Cannot step back: frame {frame_id} has no earlier snapshot")]
    StepBackUnavailable { frame_id: u64 },

    // === Breakpoint Errors ===
    #[error("Invalid breakpoint location: {0}")]
    InvalidLocation(String),

    #[error("Breakpoint {id} not found")]
    BreakpointNotFound { id: u32 },

    // === Script Errors ===
    #[error("{path}:{line}: {message}")]
    ScriptParse {
        path: String,
        line: u32,
        message: String,
    },

    #[error("Scenario '{0}' not found")]
    ScenarioNotFound(String),

    #[error("{failed} of {total} scenario(s) failed")]
    ScenariosFailed { failed: usize, total: usize },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid state error
    pub fn invalid_state(action: &str, state: &str) -> Self {
        Self::InvalidState {
            action: action.to_string(),
            state: state.to_string(),
        }
    }

    /// Create a script parse error
    pub fn script_parse(path: &str, line: u32, message: impl Into<String>) -> Self {
        Self::ScriptParse {
            path: path.to_string(),
            line,
            message: message.into(),
        }
    }
}

/// Serializable error carried in command responses
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CommandError {
    pub code: String,
    pub message: String,
}

impl From<&Error> for CommandError {
    fn from(e: &Error) -> Self {
        let code = match e {
            Error::Disconnected => "DISCONNECTED",
            Error::SessionDetached => "SESSION_DETACHED",
            Error::ThreadNotFound(_) => "THREAD_NOT_FOUND",
            Error::FrameNotFound(_) => "FRAME_NOT_FOUND",
            Error::InvalidState { .. } => "INVALID_STATE",
            Error::StepBackUnavailable { .. } => "STEP_BACK_UNAVAILABLE",
            Error::InvalidLocation(_) => "INVALID_LOCATION",
            Error::BreakpointNotFound { .. } => "BREAKPOINT_NOT_FOUND",
            _ => "INTERNAL_ERROR",
        }
        .to_string();

        Self {
            code,
            message: e.to_string(),
        }
    }
}
