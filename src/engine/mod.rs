//! Host execution engine interface
//!
//! The engine runs scenarios made of steps and calls a [`RuntimeHook`] at
//! four instrumentation points. The hook answers whether a step should run
//! and, when it declines, tells the [`ScenarioContext`] how to reposition
//! (skip, retry, step back or reset).

mod log;

pub use log::{BufferAppender, LogAppender, LogStack};

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

/// Variable bindings of a scenario, by name
pub type Variables = BTreeMap<String, Value>;

/// Shared handle to a scenario context
pub type ContextRef = Arc<dyn ScenarioContext>;

/// A single executable step as seen by the debugger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Source file the step was read from
    pub source: String,
    /// 1-based line number in `source`
    pub line: u32,
    /// Position of the step within its scenario
    pub index: usize,
    /// Step text, for display
    pub text: String,
}

/// Outcome of executing a step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Passed,
    Failed { message: String },
}

impl StepResult {
    /// Create a failed result
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Failure message, if the step failed
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Passed => None,
            Self::Failed { message } => Some(message),
        }
    }
}

/// Runtime state of one scenario invocation, owned by the host engine
///
/// All methods take `&self`: the debugger calls them from the execution
/// thread and, for hot-fix edits, from the command side.
pub trait ScenarioContext: Send + Sync {
    /// Scenario name, shown as the frame name
    fn name(&self) -> &str;

    /// Nesting depth, 0 for a top-level scenario
    fn call_depth(&self) -> usize;

    /// Step currently being executed or about to execute
    fn current_step(&self) -> Option<Step>;

    /// Deep copy of the current variable bindings
    fn variables(&self) -> Variables;

    /// Overwrite a variable binding
    fn set_variable(&self, name: &str, value: Value);

    /// Evaluate an expression against the current variables
    fn evaluate(&self, expression: &str) -> Result<Value, String>;

    /// Move past the failed step without executing it again
    fn skip_step(&self);

    /// Rewind to the failed step so it runs again
    fn retry_step(&self);

    /// Rewind one step, rebuilding live variables from `restore`
    ///
    /// `None` means no step of this frame has completed yet and the
    /// scenario's initial bindings apply.
    fn step_back(&self, restore: Option<&Variables>);

    /// Rewind to the start of the current step
    fn reset_step(&self);

    /// Log output destinations for this scenario
    fn log_appenders(&self) -> &LogStack;
}

/// Lifecycle callbacks invoked by the host engine
pub trait RuntimeHook: Send + Sync {
    /// Called before a scenario starts; `false` vetoes the scenario
    fn before_scenario(&self, _context: &ContextRef) -> bool {
        true
    }

    /// Called after a scenario ends
    fn after_scenario(&self, _context: &ContextRef) {}

    /// Called before each step; `false` means the step must not execute
    fn before_step(&self, _step: &Step, _context: &ContextRef) -> bool {
        true
    }

    /// Called after each executed step
    fn after_step(&self, _result: &StepResult, _context: &ContextRef) {}
}

/// Hook that lets every step run
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl RuntimeHook for NoopHook {}
