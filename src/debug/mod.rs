//! Thread-level debugging
//!
//! [`DebugThread`] implements the suspension protocol for one execution
//! thread. It relies on a [`SessionHandler`] for events, breakpoints and the
//! shared frame and thread registries.

mod breakpoints;
mod handler;
mod registry;
mod stepping;
mod thread;

#[cfg(test)]
pub(crate) mod testing;

pub use breakpoints::{Breakpoint, BreakpointSpec, BreakpointStore};
pub(crate) use breakpoints::is_truthy;
pub use handler::{SessionHandler, StopReason, ThreadEventKind};
pub use registry::{FrameId, FrameRegistry, ThreadRegistry};
pub use stepping::StepModes;
pub use thread::DebugThread;
