//! Debug session: shared state, command protocol and dispatch

mod handler;
mod output;
pub mod protocol;
#[allow(clippy::module_inception)]
mod session;

pub use handler::handle_command;
pub use output::{OutputBuffer, OutputEvent};
pub use protocol::{BreakpointLocation, Command, Request, Response};
pub use session::{DebugSession, SnapshotHistory};
