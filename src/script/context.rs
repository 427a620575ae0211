//! Runtime state of one scenario invocation

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::debug::is_truthy;
use crate::engine::{BufferAppender, LogAppender, LogStack, ScenarioContext, Step, Variables};

use super::parser::{json_value, Scenario};

/// Repositioning requested by the debugger when a step is declined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Skip,
    Retry,
    Back,
    Reset,
}

#[derive(Debug)]
struct State {
    vars: Variables,
    /// Index of the step under consideration
    pc: usize,
    /// Index of a failed step not yet retried or skipped
    failed: Option<usize>,
    control: Option<Control>,
}

pub struct ScriptContext {
    scenario: Arc<Scenario>,
    depth: usize,
    initial: Variables,
    state: Mutex<State>,
    log_buffer: Arc<BufferAppender>,
    logs: LogStack,
}

impl ScriptContext {
    /// Context for a scenario started by the runner
    pub fn top_level(scenario: Arc<Scenario>) -> Arc<Self> {
        Self::build(scenario, 0, Variables::new(), Arc::new(BufferAppender::new()))
    }

    /// Context for a scenario invoked with `call` from `caller`
    ///
    /// Starts from a copy of the caller's variables and logs into the
    /// caller's buffer.
    pub fn nested(scenario: Arc<Scenario>, caller: &ScriptContext) -> Arc<Self> {
        Self::build(
            scenario,
            caller.depth + 1,
            caller.variables(),
            caller.log_buffer.clone(),
        )
    }

    fn build(scenario: Arc<Scenario>, depth: usize, initial: Variables, log_buffer: Arc<BufferAppender>) -> Arc<Self> {
        let base: Arc<dyn LogAppender> = log_buffer.clone();
        Arc::new(Self {
            scenario,
            depth,
            state: Mutex::new(State {
                vars: initial.clone(),
                pc: 0,
                failed: None,
                control: None,
            }),
            initial,
            logs: LogStack::new(base),
            log_buffer,
        })
    }

    pub fn scenario(&self) -> &Arc<Scenario> {
        &self.scenario
    }

    pub fn pc(&self) -> usize {
        self.lock().pc
    }

    pub fn failed(&self) -> Option<usize> {
        self.lock().failed
    }

    pub fn mark_failed(&self) {
        let mut state = self.lock();
        state.failed = Some(state.pc);
    }

    /// Move to the following step
    pub fn advance(&self) {
        self.lock().pc += 1;
    }

    /// Apply a pending control action, returning it
    pub fn apply_control(&self) -> Option<Control> {
        let mut state = self.lock();
        let control = state.control.take()?;
        state.pc = match control {
            Control::Skip => state.failed.map_or(state.pc + 1, |f| f + 1),
            Control::Retry => state.failed.unwrap_or(state.pc),
            Control::Back => state.pc.saturating_sub(1),
            Control::Reset => state.pc,
        };
        state.failed = None;
        Some(control)
    }

    /// Everything logged by this scenario and the ones it called
    pub fn log(&self) -> String {
        self.log_buffer.buffer()
    }

    /// Replace `${name}` with the variable's JSON rendering
    pub fn interpolate(&self, text: &str) -> String {
        let state = self.lock();
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            match rest[start + 2..].find('}') {
                Some(len) => {
                    let name = &rest[start + 2..start + 2 + len];
                    match state.vars.get(name) {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(value) => out.push_str(&value.to_string()),
                        None => out.push_str("null"),
                    }
                    rest = &rest[start + 3 + len..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }

    fn set_control(&self, control: Control) {
        self.lock().control = Some(control);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScenarioContext for ScriptContext {
    fn name(&self) -> &str {
        &self.scenario.name
    }

    fn call_depth(&self) -> usize {
        self.depth
    }

    fn current_step(&self) -> Option<Step> {
        let pc = self.lock().pc;
        self.scenario.steps.get(pc).map(|s| s.step.clone())
    }

    fn variables(&self) -> Variables {
        self.lock().vars.clone()
    }

    fn set_variable(&self, name: &str, value: Value) {
        self.lock().vars.insert(name.to_string(), value);
    }

    /// `name == json`, `name != json`, or a bare name tested for truthiness
    fn evaluate(&self, expression: &str) -> Result<Value, String> {
        let lookup = |name: &str| {
            self.lock()
                .vars
                .get(name.trim())
                .cloned()
                .unwrap_or(Value::Null)
        };
        if let Some((name, expected)) = expression.split_once("!=") {
            return Ok(Value::Bool(lookup(name) != json_value(expected)?));
        }
        if let Some((name, expected)) = expression.split_once("==") {
            return Ok(Value::Bool(lookup(name) == json_value(expected)?));
        }
        Ok(Value::Bool(is_truthy(&lookup(expression))))
    }

    fn skip_step(&self) {
        self.set_control(Control::Skip);
    }

    fn retry_step(&self) {
        self.set_control(Control::Retry);
    }

    fn step_back(&self, restore: Option<&Variables>) {
        let mut state = self.lock();
        state.vars = restore.cloned().unwrap_or_else(|| self.initial.clone());
        state.control = Some(Control::Back);
    }

    fn reset_step(&self) {
        self.set_control(Control::Reset);
    }

    fn log_appenders(&self) -> &LogStack {
        &self.logs
    }
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("scenario", &self.scenario.name)
            .field("depth", &self.depth)
            .field("state", &*self.lock())
            .finish()
    }
}
