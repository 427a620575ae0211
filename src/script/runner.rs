//! Scenario runner
//!
//! Drives scenarios step by step and calls the [`RuntimeHook`] at each
//! instrumentation point. When the hook declines a step, the context's
//! pending control action decides where execution continues; with no
//! action pending the scenario is aborted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::common::{Error, Result};
use crate::engine::{ContextRef, RuntimeHook, ScenarioContext, StepResult, Variables};

use super::context::ScriptContext;
use super::parser::{load_file, Action, Scenario, ScriptStep};

/// A step failure observed during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepFailure {
    pub scenario: String,
    pub line: u32,
    pub message: String,
}

/// Result of running one top-level scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    pub name: String,
    /// No failure was left unresolved and the run was not aborted
    pub passed: bool,
    pub aborted: bool,
    /// Every failure seen, including ones later retried or skipped
    pub failures: Vec<StepFailure>,
    pub variables: Variables,
    pub log: String,
}

struct RunStatus {
    aborted: bool,
    unresolved_failure: bool,
}

/// Set of loaded scenarios, addressable by name for `call`
#[derive(Debug, Default)]
pub struct Runner {
    scenarios: HashMap<String, Arc<Scenario>>,
}

impl Runner {
    pub fn new(scenarios: impl IntoIterator<Item = Scenario>) -> Self {
        Self {
            scenarios: scenarios
                .into_iter()
                .map(|s| (s.name.clone(), Arc::new(s)))
                .collect(),
        }
    }

    /// Load scenario files
    pub fn load(paths: &[PathBuf]) -> Result<Self> {
        let scenarios = paths
            .iter()
            .map(|p| load_file(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(scenarios))
    }

    pub fn scenario(&self, name: &str) -> Option<&Arc<Scenario>> {
        self.scenarios.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scenarios.keys().cloned().collect();
        names.sort();
        names
    }

    /// Report `call` steps naming a scenario that is not loaded
    pub fn check(&self) -> Result<()> {
        for scenario in self.scenarios.values() {
            for step in &scenario.steps {
                if let Action::Call(target) = &step.action {
                    if !self.scenarios.contains_key(target) {
                        return Err(Error::script_parse(
                            &step.step.source,
                            step.step.line,
                            format!("unknown scenario '{}'", target),
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Run a scenario on the calling thread
    pub fn run(&self, name: &str, hook: &dyn RuntimeHook) -> Result<ScenarioOutcome> {
        let scenario = self
            .scenario(name)
            .ok_or_else(|| Error::ScenarioNotFound(name.to_string()))?
            .clone();
        let context = ScriptContext::top_level(scenario);
        let mut failures = Vec::new();
        let status = self.run_context(&context, hook, &mut failures);

        Ok(ScenarioOutcome {
            name: name.to_string(),
            passed: !status.aborted && !status.unresolved_failure,
            aborted: status.aborted,
            failures,
            variables: context.variables(),
            log: context.log(),
        })
    }

    /// Run each scenario on its own OS thread
    ///
    /// `hook_factory` is called on the spawned thread, so a hook bound to
    /// the native thread can be created there.
    pub fn run_parallel<F>(self: &Arc<Self>, names: &[String], hook_factory: F) -> Result<Vec<ScenarioOutcome>>
    where
        F: Fn() -> Arc<dyn RuntimeHook> + Send + Sync + 'static,
    {
        for name in names {
            if self.scenario(name).is_none() {
                return Err(Error::ScenarioNotFound(name.clone()));
            }
        }

        let factory = Arc::new(hook_factory);
        let handles = names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let runner = Arc::clone(self);
                let factory = Arc::clone(&factory);
                let name = name.clone();
                std::thread::Builder::new()
                    .name(format!("{}#{}", name, i + 1))
                    .spawn(move || {
                        let hook = factory();
                        runner.run(&name, hook.as_ref())
                    })
                    .map_err(Error::Io)
            })
            .collect::<Result<Vec<_>>>()?;

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| Error::Internal("scenario thread panicked".to_string()))
                    .and_then(|outcome| outcome)
            })
            .collect()
    }

    fn run_context(&self, context: &Arc<ScriptContext>, hook: &dyn RuntimeHook, failures: &mut Vec<StepFailure>) -> RunStatus {
        let context_ref: ContextRef = context.clone();
        let mut status = RunStatus {
            aborted: false,
            unresolved_failure: false,
        };
        if !hook.before_scenario(&context_ref) {
            tracing::debug!(scenario = context.name(), "Scenario vetoed");
            status.aborted = true;
            return status;
        }

        let steps = &context.scenario().steps;
        loop {
            let pc = context.pc();
            let Some(step) = steps.get(pc) else {
                break;
            };

            if !hook.before_step(&step.step, &context_ref) {
                if context.apply_control().is_none() {
                    tracing::debug!(scenario = context.name(), line = step.step.line, "Scenario aborted");
                    status.aborted = true;
                    break;
                }
                continue;
            }
            // A failure nobody retried or skipped ends the scenario
            if context.failed().is_some() {
                break;
            }

            let result = match self.execute(step, context, hook, failures) {
                Some(result) => result,
                None => {
                    status.aborted = true;
                    break;
                }
            };
            if let Some(message) = result.error_message() {
                tracing::debug!(scenario = context.name(), line = step.step.line, message, "Step failed");
                failures.push(StepFailure {
                    scenario: context.name().to_string(),
                    line: step.step.line,
                    message: message.to_string(),
                });
                context.mark_failed();
            }

            hook.after_step(&result, &context_ref);
            if context.apply_control().is_none() {
                context.advance();
            }
        }

        status.unresolved_failure = context.failed().is_some();
        hook.after_scenario(&context_ref);
        status
    }

    /// Execute one step; `None` when a called scenario was aborted
    fn execute(
        &self,
        step: &ScriptStep,
        context: &Arc<ScriptContext>,
        hook: &dyn RuntimeHook,
        failures: &mut Vec<StepFailure>,
    ) -> Option<StepResult> {
        let result = match &step.action {
            Action::Set { name, value } => {
                context.set_variable(name, value.clone());
                StepResult::Passed
            }
            Action::Assert { name, expected } => {
                let actual = context
                    .variables()
                    .get(name)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null);
                if &actual == expected {
                    StepResult::Passed
                } else {
                    StepResult::failed(format!("expected {} == {}, got {}", name, expected, actual))
                }
            }
            Action::Print(text) => {
                let line = context.interpolate(text);
                context.log_appenders().append(&format!("{}\n", line));
                StepResult::Passed
            }
            Action::Fail(message) => StepResult::failed(message.clone()),
            Action::Call(target) => {
                let Some(scenario) = self.scenario(target) else {
                    return Some(StepResult::failed(format!("scenario '{}' not found", target)));
                };
                let nested = ScriptContext::nested(scenario.clone(), context);
                let status = self.run_context(&nested, hook, failures);
                if status.aborted {
                    return None;
                }
                if status.unresolved_failure {
                    StepResult::failed(format!("called scenario '{}' failed", target))
                } else {
                    StepResult::Passed
                }
            }
        };
        Some(result)
    }
}
