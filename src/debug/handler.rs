//! Contract between thread controllers and the debug session

use crate::common::Result;
use crate::engine::{ContextRef, ScenarioContext, Step};

use super::breakpoints::Breakpoint;
use super::registry::{FrameId, FrameRegistry, ThreadRegistry};

/// Why a thread stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Pause,
    Step,
    Breakpoint,
    Exception,
    Entry,
}

impl StopReason {
    /// DAP `reason` string
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Pause => "pause",
            StopReason::Step => "step",
            StopReason::Breakpoint => "breakpoint",
            StopReason::Exception => "exception",
            StopReason::Entry => "entry",
        }
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadEventKind {
    Started,
    Exited,
}

impl ThreadEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadEventKind::Started => "started",
            ThreadEventKind::Exited => "exited",
        }
    }
}

/// Services a [`DebugThread`](super::DebugThread) needs from its session
///
/// Event methods return an error when the debugger client can no longer be
/// reached. The controller logs it and stops suspending.
pub trait SessionHandler: Send + Sync {
    /// Report that a thread is about to block
    fn stop_event(
        &self,
        thread_id: i64,
        reason: StopReason,
        description: Option<&str>,
        breakpoint_ids: &[u32],
    ) -> Result<()>;

    /// Report that a thread resumed
    fn continue_event(&self, thread_id: i64) -> Result<()>;

    fn thread_event(&self, thread_id: i64, kind: ThreadEventKind) -> Result<()>;

    /// Forward scenario log output
    fn output(&self, text: &str) -> Result<()>;

    fn resolve_breakpoint(&self, step: &Step, line: u32, context: &dyn ScenarioContext) -> Option<Breakpoint>;

    /// Allocate a frame id, unique and increasing for the session
    fn next_frame_id(&self) -> FrameId;

    fn frames(&self) -> &FrameRegistry;

    fn threads(&self) -> &ThreadRegistry;

    /// Called on the command side just before a thread is released
    fn before_resume(&self, _thread_id: i64, _context: Option<&ContextRef>) {}

    /// Whether a debugger client is still listening
    fn is_attached(&self) -> bool {
        true
    }

    /// Pause new top-level threads before their first step
    fn stop_on_entry(&self) -> bool {
        false
    }
}
