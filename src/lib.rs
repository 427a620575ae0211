//! Scenario Debugger - interactive debugging for multi-threaded scenario runs
//!
//! Each execution thread gets a [`debug::DebugThread`] controller that
//! suspends it at step boundaries on breakpoints, pauses and step commands,
//! while a [`session::DebugSession`] reports stops to the debugger client and
//! relays its commands back.

pub mod cli;
pub mod commands;
pub mod common;
pub mod dap;
pub mod debug;
pub mod engine;
pub mod script;
pub mod session;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use session::{BreakpointLocation, Command, DebugSession};
