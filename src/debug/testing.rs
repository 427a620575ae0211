//! Test doubles for the controller's collaborators

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::common::{Error, Result};
use crate::engine::{BufferAppender, LogStack, ScenarioContext, Step, Variables};

use super::breakpoints::{Breakpoint, BreakpointStore};
use super::handler::{SessionHandler, StopReason, ThreadEventKind};
use super::registry::{FrameId, FrameRegistry, ThreadRegistry};

/// Poll `condition` until it holds, panicking after a few seconds
pub fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Context that records the control requests it receives
pub struct RecordingContext {
    name: String,
    depth: usize,
    vars: Mutex<Variables>,
    initial: Variables,
    controls: Mutex<Vec<&'static str>>,
    base_log: Arc<BufferAppender>,
    logs: LogStack,
}

impl RecordingContext {
    pub fn top_level(name: &str) -> Arc<Self> {
        Self::nested(name, 0)
    }

    pub fn nested(name: &str, depth: usize) -> Arc<Self> {
        let base_log = Arc::new(BufferAppender::new());
        Arc::new(Self {
            name: name.to_string(),
            depth,
            vars: Mutex::new(Variables::new()),
            initial: Variables::new(),
            controls: Mutex::new(Vec::new()),
            logs: LogStack::new(base_log.clone()),
            base_log,
        })
    }

    pub fn controls(&self) -> Vec<&'static str> {
        self.controls.lock().unwrap().clone()
    }

    pub fn log(&self) -> String {
        self.base_log.buffer()
    }

    fn record(&self, control: &'static str) {
        self.controls.lock().unwrap().push(control);
    }
}

impl ScenarioContext for RecordingContext {
    fn name(&self) -> &str {
        &self.name
    }

    fn call_depth(&self) -> usize {
        self.depth
    }

    fn current_step(&self) -> Option<Step> {
        None
    }

    fn variables(&self) -> Variables {
        self.vars.lock().unwrap().clone()
    }

    fn set_variable(&self, name: &str, value: Value) {
        self.vars.lock().unwrap().insert(name.to_string(), value);
    }

    fn evaluate(&self, expression: &str) -> std::result::Result<Value, String> {
        Ok(self
            .vars
            .lock()
            .unwrap()
            .get(expression.trim())
            .cloned()
            .unwrap_or(Value::Null))
    }

    fn skip_step(&self) {
        self.record("skip");
    }

    fn retry_step(&self) {
        self.record("retry");
    }

    fn step_back(&self, restore: Option<&Variables>) {
        *self.vars.lock().unwrap() = restore.cloned().unwrap_or_else(|| self.initial.clone());
        self.record("back");
    }

    fn reset_step(&self) {
        self.record("reset");
    }

    fn log_appenders(&self) -> &LogStack {
        &self.logs
    }
}

/// Session handler that records every event as a line of text
#[derive(Default)]
pub struct RecordingHandler {
    pub breakpoints: BreakpointStore,
    frames: FrameRegistry,
    threads: ThreadRegistry,
    next_frame: AtomicU64,
    events: Mutex<Vec<String>>,
    output: Mutex<String>,
    failing: AtomicBool,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later event fail as if the client went away
    pub fn fail_events(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn stops(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with("stopped"))
            .collect()
    }

    pub fn output_text(&self) -> String {
        self.output.lock().unwrap().clone()
    }

    fn record(&self, event: String) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Disconnected);
        }
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

impl SessionHandler for RecordingHandler {
    fn stop_event(
        &self,
        thread_id: i64,
        reason: StopReason,
        description: Option<&str>,
        breakpoint_ids: &[u32],
    ) -> Result<()> {
        let mut line = format!("stopped {} {}", thread_id, reason);
        if let Some(description) = description {
            line.push(' ');
            line.push_str(description);
        }
        if !breakpoint_ids.is_empty() {
            line.push_str(&format!(" {:?}", breakpoint_ids));
        }
        self.record(line)
    }

    fn continue_event(&self, thread_id: i64) -> Result<()> {
        self.record(format!("continued {}", thread_id))
    }

    fn thread_event(&self, thread_id: i64, kind: ThreadEventKind) -> Result<()> {
        self.record(format!("thread {} {}", thread_id, kind.as_str()))
    }

    fn output(&self, text: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Disconnected);
        }
        self.output.lock().unwrap().push_str(text);
        Ok(())
    }

    fn resolve_breakpoint(&self, step: &Step, line: u32, context: &dyn ScenarioContext) -> Option<Breakpoint> {
        self.breakpoints.resolve(step, line, context)
    }

    fn next_frame_id(&self) -> FrameId {
        self.next_frame.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn frames(&self) -> &FrameRegistry {
        &self.frames
    }

    fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }
}
